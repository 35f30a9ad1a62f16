//! `BlopServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::limit::{ConnectionLimit, ConnectionSlot};
use crate::metrics::WS_UPGRADES_REFUSED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::serve_session;
use crate::websocket::registry::Registry;
use crate::websocket::transport::{self, accept_key};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions.
    pub registry: Arc<Registry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Upgrade admission against `max_connections`.
    pub limit: ConnectionLimit,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for rendering `/metrics`.
    pub metrics_handle: PrometheusHandle,
}

/// The blop broadcast server.
pub struct BlopServer {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    limit: ConnectionLimit,
    start_time: Instant,
    metrics_handle: PrometheusHandle,
}

impl BlopServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        let registry = Arc::new(Registry::new());
        Self {
            limit: ConnectionLimit::new(config.max_connections),
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new(registry.clone())),
            registry,
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            limit: self.limit.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "blop server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });

        Ok((local_addr, handle))
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the upgrade admission limit.
    pub fn connection_limit(&self) -> &ConnectionLimit {
        &self.limit
    }
}

/// GET /ws
///
/// Shutdown and the connection cap are checked before the upgrade headers.
/// The admission slot travels with the session and is freed when it ends.
async fn ws_handler(State(state): State<AppState>, mut req: Request) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(slot) = state.limit.try_admit() else {
        counter!(WS_UPGRADES_REFUSED_TOTAL).increment(1);
        warn!(
            max_connections = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let accept = match accept_key(req.headers()) {
        Ok(accept) => accept,
        Err(status) => return status.into_response(),
    };
    let Some(on_upgrade) = req.extensions_mut().remove::<OnUpgrade>() else {
        return StatusCode::UPGRADE_REQUIRED.into_response();
    };

    let _ = tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => handle_socket(TokioIo::new(upgraded), state, slot).await,
            Err(e) => warn!(error = %e, "websocket upgrade failed"),
        }
    });

    (
        StatusCode::SWITCHING_PROTOCOLS,
        [
            (header::CONNECTION, "upgrade"),
            (header::UPGRADE, "websocket"),
            (header::SEC_WEBSOCKET_ACCEPT, accept.as_str()),
        ],
    )
        .into_response()
}

async fn handle_socket(io: TokioIo<Upgraded>, state: AppState, _slot: ConnectionSlot) {
    let (sink, frames) = transport::split(io, state.config.max_message_size);
    let _ = serve_session(
        frames,
        Box::new(sink),
        state.registry.clone(),
        state.shutdown.token(),
        state.config.session,
    )
    .await;
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.registry.len()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
