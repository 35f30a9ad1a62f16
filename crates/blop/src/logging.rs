//! Tracing subscriber setup.

use anyhow::{Context, Result, anyhow};
use blop_settings::types::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level directive: {level}")),
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init(settings: &LoggingSettings) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&settings.level)?)
        .with_target(true);

    let installed = if settings.json {
        builder.json().with_span_list(true).try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
