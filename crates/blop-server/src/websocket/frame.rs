//! Frames exchanged with a session and the socket seam they travel through.
//!
//! The registry, read loop and broadcaster only see [`Frame`], [`FrameSink`]
//! and a `Stream` of frames. The wire format lives in
//! [`transport`](super::transport).

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::errors::TransportError;

/// One WebSocket frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Bytes),
    /// Heartbeat request carrying application data.
    Ping(Bytes),
    /// Heartbeat reply carrying the request's application data.
    Pong(Bytes),
    /// Close control frame.
    Close,
}

/// Type of a data frame, preserved from inbound frame to broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Text frame.
    Text,
    /// Binary frame.
    Binary,
}

impl Frame {
    /// Data-frame type, or `None` for control frames.
    pub fn kind(&self) -> Option<FrameKind> {
        match self {
            Self::Text(_) => Some(FrameKind::Text),
            Self::Binary(_) => Some(FrameKind::Binary),
            Self::Ping(_) | Self::Pong(_) | Self::Close => None,
        }
    }
}

/// Wrap a data frame in the broadcast envelope `MESSAGE[<n>]: <payload>`.
///
/// `<n>` is the payload length in bytes. The outbound frame keeps the
/// inbound frame's type; binary payloads are copied verbatim after the prefix.
/// Control frames have no envelope.
pub fn envelope(frame: &Frame) -> Option<Frame> {
    match frame {
        Frame::Text(text) => Some(Frame::Text(format!("MESSAGE[{}]: {text}", text.len()))),
        Frame::Binary(data) => {
            let prefix = format!("MESSAGE[{}]: ", data.len());
            let mut out = BytesMut::with_capacity(prefix.len() + data.len());
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(data);
            Some(Frame::Binary(out.freeze()))
        }
        Frame::Ping(_) | Frame::Pong(_) | Frame::Close => None,
    }
}

/// Write half of a session socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Send a close frame and flush.
    async fn close(&mut self) -> Result<(), TransportError>;
}
