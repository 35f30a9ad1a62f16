//! Broadcast fan-out to every registered session.
//!
//! Each recipient gets its own delivery task bounded by a write deadline, so
//! a stalled or dead peer never holds up the others. A failed delivery closes
//! that recipient's socket; its registry entry stays until the recipient's
//! own read loop notices and removes it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::frame::Frame;
use super::registry::Registry;
use super::session::Session;
use crate::metrics::{BROADCAST_DELIVERIES_TOTAL, BROADCAST_FAILURES_TOTAL};

/// Result of one delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was written.
    Delivered,
    /// The write failed or timed out; the recipient's socket was closed.
    Failed,
}

/// In-flight broadcast.
pub struct FanOut {
    /// Number of delivery attempts launched (registry snapshot size).
    pub recipients: usize,
    /// One handle per delivery task; dropping them does not cancel delivery.
    pub deliveries: Vec<JoinHandle<Delivery>>,
}

impl FanOut {
    /// Wait for every delivery and count the successful ones.
    pub async fn delivered(self) -> usize {
        let mut delivered = 0;
        for handle in self.deliveries {
            if matches!(handle.await, Ok(Delivery::Delivered)) {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Send `frame` to every session currently registered, the sender included.
///
/// Returns immediately; delivery happens on spawned tasks.
pub fn fan_out(registry: &Registry, frame: Frame, write_timeout: Duration) -> FanOut {
    let deliveries = registry.for_each_parallel(|session| deliver(session, frame.clone(), write_timeout));
    debug!(recipients = deliveries.len(), "broadcasting");
    FanOut {
        recipients: deliveries.len(),
        deliveries,
    }
}

async fn deliver(session: Arc<Session>, frame: Frame, write_timeout: Duration) -> Delivery {
    match session.send(frame, write_timeout).await {
        Ok(()) => {
            counter!(BROADCAST_DELIVERIES_TOTAL).increment(1);
            Delivery::Delivered
        }
        Err(e) => {
            counter!(BROADCAST_FAILURES_TOTAL).increment(1);
            warn!(session_id = %session.id(), error = %e, "broadcast write failed, closing socket");
            let _ = session.close();
            Delivery::Failed
        }
    }
}
