//! # blop
//!
//! WebSocket broadcast server binary: loads settings, installs logging and
//! metrics, and serves until interrupted.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use blop_server::config::ServerConfig;
use blop_server::metrics::install_recorder;
use blop_server::server::BlopServer;
use blop_settings::{BlopSettings, load_settings, load_settings_from_path};
use clap::Parser;
use tracing::{info, warn};

/// blop WebSocket broadcast server.
#[derive(Parser, Debug)]
#[command(name = "blop", about = "WebSocket broadcast server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.blop/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<BlopSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;

    logging::init(&settings.logging)?;
    let metrics_handle = install_recorder().context("Failed to install metrics recorder")?;

    let server = BlopServer::new(ServerConfig::from(&settings), metrics_handle);
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;
    info!("blop listening on ws://{addr}/ws");

    shutdown_signal().await?;

    info!("Shutting down...");
    let closed = server.shutdown().shutdown();
    let drain_timeout = settings.shutdown.drain_timeout();
    if !server.shutdown().wait(handle, drain_timeout).await {
        warn!(?drain_timeout, "sessions still open after drain timeout");
    }

    info!(closed, "Shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}
