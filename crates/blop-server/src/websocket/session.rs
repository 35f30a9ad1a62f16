//! Per-connection state shared between the read loop, ping replies and
//! broadcast deliveries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::frame::{Frame, FrameSink};
use crate::errors::TransportError;

/// Process-unique session identifier (random 128-bit).
pub type SessionId = Uuid;

/// Read window given to a session before its loop applies the configured one.
const INITIAL_READ_WINDOW: Duration = Duration::from_secs(60);

/// Deadline used when a read window overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Upper bound on sending a close frame while tearing a socket down.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_millis(250);

/// One accepted WebSocket connection.
pub struct Session {
    id: SessionId,
    /// Write half; writers take turns, each bounded by its own deadline.
    sink: tokio::sync::Mutex<Box<dyn FrameSink>>,
    read_deadline: Mutex<Instant>,
    /// Set while a pong is being composed or written.
    pong_in_flight: AtomicBool,
    closed: AtomicBool,
    close_token: CancellationToken,
    connected_at: std::time::Instant,
}

impl Session {
    /// Wrap a socket write half.
    pub fn new(id: SessionId, sink: Box<dyn FrameSink>) -> Self {
        Self {
            id,
            sink: tokio::sync::Mutex::new(sink),
            read_deadline: Mutex::new(Instant::now() + INITIAL_READ_WINDOW),
            pong_in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            connected_at: std::time::Instant::now(),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Instant after which the read loop gives up on this peer.
    pub fn read_deadline(&self) -> Instant {
        *self.read_deadline.lock()
    }

    /// Move the read deadline to `now + window`.
    ///
    /// Windows past what `Instant` can represent saturate about thirty years out.
    pub fn extend_read_deadline(&self, window: Duration) {
        let now = Instant::now();
        *self.read_deadline.lock() = now
            .checked_add(window)
            .unwrap_or_else(|| now + FAR_FUTURE);
    }

    /// Write one frame, failing if it does not complete within `deadline`.
    ///
    /// The deadline covers waiting for a concurrent writer as well as the
    /// write itself.
    pub async fn send(&self, frame: Frame, deadline: Duration) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let write = async {
            let mut sink = self.sink.lock().await;
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            sink.send_frame(frame).await
        };
        match time::timeout(deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::WriteTimeout(deadline)),
        }
    }

    /// Mark the socket closed and wake the read loop.
    ///
    /// Returns `true` only for the call that actually closed it. Later writes
    /// fail with [`TransportError::Closed`]; the registry entry is untouched.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.close_token.cancel();
        debug!(session_id = %self.id, "socket closed");
        true
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the socket has been closed.
    pub async fn closed(&self) {
        self.close_token.cancelled().await;
    }

    /// Best-effort close frame after [`close`](Self::close).
    ///
    /// Skipped when a writer still holds the sink.
    pub async fn send_close_frame(&self) {
        let Ok(mut sink) = self.sink.try_lock() else {
            return;
        };
        match time::timeout(CLOSE_FRAME_TIMEOUT, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session_id = %self.id, error = %e, "close frame failed"),
            Err(_) => debug!(session_id = %self.id, "close frame timed out"),
        }
    }

    /// Try to claim the pong slot without waiting.
    ///
    /// `None` means another pong for this session is already in flight.
    pub fn try_acquire_pong(&self) -> Option<PongGuard<'_>> {
        self.pong_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PongGuard {
                flag: &self.pong_in_flight,
            })
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Holds a session's pong slot; released on drop.
pub struct PongGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for PongGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
