//! Transport error types.

use std::time::Duration;

use thiserror::Error;

/// Failure reading from or writing to a session socket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The socket was closed locally (shutdown or failed broadcast write).
    #[error("socket closed")]
    Closed,
    /// A write did not complete before its deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// The underlying connection reported an error.
    #[error("socket error: {0}")]
    Socket(String),
    /// The peer broke the framing rules.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    /// An inbound frame or reassembled message exceeded the size limit.
    #[error("message of {0} bytes exceeds the size limit")]
    MessageTooLarge(u64),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Socket(err.to_string())
    }
}
