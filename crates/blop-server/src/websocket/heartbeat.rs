//! Ping handling with pong coalescing.
//!
//! Every ping refreshes the session's read deadline. Only one pong per
//! session is composed at a time; pings arriving while one is in flight are
//! folded into it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use rand::Rng;
use tracing::{debug, trace};

use super::frame::Frame;
use super::registry::Registry;
use super::session::SessionId;
use crate::config::SessionConfig;
use crate::metrics::{PINGS_COALESCED_TOTAL, PONGS_SENT_TOTAL};

/// What happened to one ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingOutcome {
    /// A pong carrying the ping's data was written.
    Ponged,
    /// Another pong was already in flight; none was sent for this ping.
    Coalesced,
    /// The pong write failed or missed its deadline.
    WriteFailed,
    /// The session was no longer registered.
    Unregistered,
}

/// Answer a ping received by session `id`.
///
/// Spawned by the read loop so a slow pong never delays the next read.
pub async fn handle_ping(
    registry: Arc<Registry>,
    id: SessionId,
    payload: Bytes,
    config: SessionConfig,
) -> PingOutcome {
    let Some(session) = registry.get(&id) else {
        return PingOutcome::Unregistered;
    };

    session.extend_read_deadline(config.heartbeat_timeout);

    let Some(_guard) = session.try_acquire_pong() else {
        counter!(PINGS_COALESCED_TOTAL).increment(1);
        trace!(session_id = %id, "pong already in flight, coalescing ping");
        return PingOutcome::Coalesced;
    };

    let jitter = random_jitter(config.pong_jitter);
    if !jitter.is_zero() {
        tokio::time::sleep(jitter).await;
    }

    match session
        .send(Frame::Pong(payload), config.pong_write_timeout)
        .await
    {
        Ok(()) => {
            counter!(PONGS_SENT_TOTAL).increment(1);
            PingOutcome::Ponged
        }
        Err(e) => {
            debug!(session_id = %id, error = %e, "pong write failed");
            PingOutcome::WriteFailed
        }
    }
}

/// Uniform delay in `[0, max]`, or zero when `max` is zero.
fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_possible_truncation)]
    let max_ms = max.as_millis().min(u128::from(u64::MAX)) as u64;
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
