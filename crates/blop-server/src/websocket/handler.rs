//! Per-session read loop.
//!
//! One loop runs per accepted connection. It reads frames until the peer
//! closes, the read deadline passes, or the socket is closed locally, then
//! removes the session from the registry.

use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use super::broadcast::fan_out;
use super::frame::{Frame, FrameSink, envelope};
use super::heartbeat::handle_ping;
use super::registry::Registry;
use super::session::{Session, SessionId};
use crate::config::SessionConfig;
use crate::errors::TransportError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Why a session loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// The peer sent a close frame.
    CloseFrame,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// Reading from the socket failed.
    ReadError(TransportError),
    /// Nothing arrived before the read deadline.
    DeadlineExpired,
    /// The socket was closed locally (shutdown or failed broadcast write).
    SocketClosed,
}

impl SessionExit {
    /// Short label used in logs and the disconnection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::CloseFrame => "close_frame",
            Self::StreamEnded => "stream_ended",
            Self::ReadError(_) => "read_error",
            Self::DeadlineExpired => "deadline_expired",
            Self::SocketClosed => "socket_closed",
        }
    }
}

/// Register `sink`, run its read loop over `frames`, and unregister it.
///
/// A session registered after `shutdown` has fired is closed at once, so
/// an upgrade that raced the shutdown pass still ends with a close frame.
/// Returns once the session is gone from the registry.
pub async fn serve_session<S>(
    mut frames: S,
    sink: Box<dyn FrameSink>,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    config: SessionConfig,
) -> (SessionId, SessionExit)
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let session = registry.register_session(sink);
    let id = session.id();
    if shutdown.is_cancelled() {
        let _ = session.close();
    }
    let span = info_span!("session", session_id = %id);

    let exit = async {
        let started = Instant::now();
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!("client connected");

        let exit = run_session_loop(&mut frames, &session, &registry, config).await;

        let _ = registry.remove(&id);
        // Peer-initiated exits leave the socket to transport teardown.
        if exit == SessionExit::SocketClosed {
            session.send_close_frame().await;
        }

        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => exit.reason()).increment(1);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        match &exit {
            SessionExit::ReadError(e) => info!(error = %e, "client disconnected"),
            other => info!(reason = other.reason(), "client disconnected"),
        }
        exit
    }
    .instrument(span)
    .await;

    (id, exit)
}

/// Read frames for `session` until it ends.
///
/// Any inbound frame moves the read deadline forward. Pings are answered on
/// their own task; data frames are enveloped and broadcast to every session.
pub async fn run_session_loop<S>(
    frames: &mut S,
    session: &Arc<Session>,
    registry: &Arc<Registry>,
    config: SessionConfig,
) -> SessionExit
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    session.extend_read_deadline(config.heartbeat_timeout);

    loop {
        let deadline = session.read_deadline();
        tokio::select! {
            biased;

            () = session.closed() => return SessionExit::SocketClosed,

            () = time::sleep_until(deadline) => {
                // A ping task may have moved the deadline while we slept.
                if session.read_deadline() > deadline {
                    continue;
                }
                return SessionExit::DeadlineExpired;
            }

            next = frames.next() => {
                let frame = match next {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => return SessionExit::ReadError(e),
                    None => return SessionExit::StreamEnded,
                };
                session.extend_read_deadline(config.heartbeat_timeout);

                match frame {
                    Frame::Ping(payload) => {
                        let _ = tokio::spawn(handle_ping(
                            registry.clone(),
                            session.id(),
                            payload,
                            config,
                        ));
                    }
                    Frame::Pong(_) => {}
                    Frame::Close => return SessionExit::CloseFrame,
                    data => {
                        if let Some(out) = envelope(&data) {
                            debug!(kind = ?data.kind(), "broadcasting inbound frame");
                            let _ = fan_out(registry, out, config.broadcast_write_timeout);
                        }
                    }
                }
            }
        }
    }
}
