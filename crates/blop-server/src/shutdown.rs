//! Shutdown coordination: a `CancellationToken` for server tasks plus a
//! close-every-socket pass over the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::registry::Registry;

/// Coordinates graceful shutdown of the listener and every session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    registry: Arc<Registry>,
}

impl ShutdownCoordinator {
    /// Create a coordinator for the sessions in `registry`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            token: CancellationToken::new(),
            registry,
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and close every registered socket.
    ///
    /// Each session's read loop then wakes and removes itself. Returns the
    /// number of sockets this call closed; repeated calls close nothing new.
    pub fn shutdown(&self) -> usize {
        self.token.cancel();
        let mut closed = 0;
        self.registry.for_each(|_, session| {
            if session.close() {
                closed += 1;
            }
        });
        info!(closed, "closing all sessions");
        closed
    }

    /// Wait up to `timeout` for `handle`, then for the registry to drain.
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn wait(&self, handle: JoinHandle<()>, timeout: Duration) -> bool {
        let registry = self.registry.clone();
        let drain = async move {
            let _ = handle.await;
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.registry.len(),
                "shutdown timed out after {timeout:?}"
            );
            return false;
        }
        true
    }
}
