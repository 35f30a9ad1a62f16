//! RFC 6455 framing over an upgraded HTTP connection.
//!
//! Pings are handed to the read loop like any other frame and never answered
//! here: the only pongs on the wire are the ones the heartbeat handler writes
//! while it holds the session's pong slot.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header};
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::SinkExt;
use futures::stream::{SplitSink, SplitStream, StreamExt};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use super::frame::{Frame, FrameKind, FrameSink};
use crate::errors::TransportError;

/// GUID appended to the client key when deriving `Sec-WebSocket-Accept`.
const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_CONTROL_PAYLOAD: u64 = 125;

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Check the upgrade request headers and derive the `Sec-WebSocket-Accept` value.
///
/// Any missing or malformed header is a `400 Bad Request`.
pub fn accept_key(headers: &HeaderMap) -> Result<String, StatusCode> {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let version_13 = headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .is_some_and(|v| v == "13");
    if !(connection_upgrade && upgrade_websocket && version_13) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(StatusCode::BAD_REQUEST)?;
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
}

/// Server-side frame codec.
///
/// Decodes masked client frames into [`Frame`]s, reassembling fragmented
/// messages; control frames may arrive between fragments and are yielded as
/// they come. Encodes unmasked server frames.
#[derive(Debug)]
pub struct WsCodec {
    max_message_size: usize,
    /// Data message still waiting for its final fragment.
    partial: Option<(FrameKind, BytesMut)>,
}

#[derive(Debug)]
struct FrameHeader {
    fin: bool,
    opcode: u8,
    mask: [u8; 4],
    header_len: usize,
    payload_len: usize,
}

impl WsCodec {
    /// Codec rejecting frames and messages larger than `max_message_size` bytes.
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            partial: None,
        }
    }

    /// Parse the header at the front of `src`, `None` until it is complete.
    fn parse_header(&self, src: &[u8]) -> Result<Option<FrameHeader>, TransportError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let fin = src[0] & 0x80 != 0;
        if src[0] & 0x70 != 0 {
            return Err(TransportError::Protocol("reserved bits set"));
        }
        let opcode = src[0] & 0x0F;
        if src[1] & 0x80 == 0 {
            return Err(TransportError::Protocol("client frame is not masked"));
        }

        let (len, len_bytes) = match src[1] & 0x7F {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([src[2], src[3]])), 2)
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&src[2..10]);
                (u64::from_be_bytes(raw), 8)
            }
            n => (u64::from(n), 0),
        };

        if opcode & 0x08 != 0 && (!fin || len > MAX_CONTROL_PAYLOAD) {
            return Err(TransportError::Protocol("invalid control frame"));
        }
        let payload_len = usize::try_from(len)
            .ok()
            .filter(|n| *n <= self.max_message_size)
            .ok_or(TransportError::MessageTooLarge(len))?;

        let mask_at = 2 + len_bytes;
        if src.len() < mask_at + 4 {
            return Ok(None);
        }
        let mut mask = [0u8; 4];
        mask.copy_from_slice(&src[mask_at..mask_at + 4]);

        Ok(Some(FrameHeader {
            fin,
            opcode,
            mask,
            header_len: mask_at + 4,
            payload_len,
        }))
    }

    /// Fold one unmasked frame into the message being assembled.
    fn assemble(
        &mut self,
        fin: bool,
        opcode: u8,
        payload: BytesMut,
    ) -> Result<Option<Frame>, TransportError> {
        let (kind, buf) = match opcode {
            OP_CLOSE => return Ok(Some(Frame::Close)),
            OP_PING => return Ok(Some(Frame::Ping(payload.freeze()))),
            OP_PONG => return Ok(Some(Frame::Pong(payload.freeze()))),
            OP_TEXT | OP_BINARY if self.partial.is_some() => {
                return Err(TransportError::Protocol("message started before the previous one ended"));
            }
            OP_TEXT => (FrameKind::Text, payload),
            OP_BINARY => (FrameKind::Binary, payload),
            OP_CONTINUATION => {
                let Some((kind, mut buf)) = self.partial.take() else {
                    return Err(TransportError::Protocol("continuation frame without a message"));
                };
                let total = buf.len() + payload.len();
                if total > self.max_message_size {
                    return Err(TransportError::MessageTooLarge(
                        u64::try_from(total).unwrap_or(u64::MAX),
                    ));
                }
                buf.extend_from_slice(&payload);
                (kind, buf)
            }
            _ => return Err(TransportError::Protocol("unknown opcode")),
        };

        if !fin {
            self.partial = Some((kind, buf));
            return Ok(None);
        }
        match kind {
            FrameKind::Text => String::from_utf8(buf.to_vec())
                .map(|text| Some(Frame::Text(text)))
                .map_err(|_| TransportError::Protocol("text message is not valid UTF-8")),
            FrameKind::Binary => Ok(Some(Frame::Binary(buf.freeze()))),
        }
    }
}

impl Decoder for WsCodec {
    type Item = Frame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(header) = self.parse_header(src)? else {
                return Ok(None);
            };
            let frame_len = header.header_len + header.payload_len;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            src.advance(header.header_len);
            let mut payload = src.split_to(header.payload_len);
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= header.mask[i % 4];
            }
            if let Some(frame) = self.assemble(header.fin, header.opcode, payload)? {
                return Ok(Some(frame));
            }
        }
    }
}

impl Encoder<Frame> for WsCodec {
    type Error = TransportError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), TransportError> {
        let (opcode, payload) = match frame {
            Frame::Text(text) => (OP_TEXT, Bytes::from(text)),
            Frame::Binary(data) => (OP_BINARY, data),
            Frame::Ping(data) => (OP_PING, data),
            Frame::Pong(data) => (OP_PONG, data),
            Frame::Close => (OP_CLOSE, Bytes::new()),
        };

        let len = payload.len();
        dst.reserve(len + 10);
        dst.put_u8(0x80 | opcode);
        match (u8::try_from(len), u16::try_from(len)) {
            (Ok(n), _) if n < 126 => dst.put_u8(n),
            (_, Ok(n)) => {
                dst.put_u8(126);
                dst.put_u16(n);
            }
            _ => {
                dst.put_u8(127);
                dst.put_u64(u64::try_from(len).unwrap_or(u64::MAX));
            }
        }
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// An upgraded connection framed with [`WsCodec`].
pub type WsFramed<T> = Framed<T, WsCodec>;

/// Frame `io` and split it into a write half and the inbound frame stream.
pub fn split<T>(
    io: T,
    max_message_size: usize,
) -> (SplitSink<WsFramed<T>, Frame>, SplitStream<WsFramed<T>>)
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, WsCodec::new(max_message_size)).split()
}

#[async_trait]
impl<T> FrameSink for SplitSink<WsFramed<T>, Frame>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.send(frame).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.send(Frame::Close).await?;
        SinkExt::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    const MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    /// Masked frame as a client would write it.
    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![if fin { 0x80 | opcode } else { opcode }];
        match payload.len() {
            n if n < 126 => out.push(0x80 | u8::try_from(n).unwrap()),
            n => {
                out.push(0x80 | 126);
                out.extend_from_slice(&u16::try_from(n).unwrap().to_be_bytes());
            }
        }
        out.extend_from_slice(&MASK);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        out
    }

    fn decode_all(codec: &mut WsCodec, bytes: &[u8]) -> Result<Vec<Frame>, TransportError> {
        let mut buf = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn upgrade_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        let _ = headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        let _ = headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        let _ = headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="),
        );
        headers
    }

    #[test]
    fn accept_key_matches_rfc_sample() {
        assert_eq!(
            accept_key(&upgrade_headers()).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_key_rejects_incomplete_requests() {
        for missing in [
            header::CONNECTION,
            header::UPGRADE,
            header::SEC_WEBSOCKET_VERSION,
            header::SEC_WEBSOCKET_KEY,
        ] {
            let mut headers = upgrade_headers();
            let _ = headers.remove(&missing);
            assert_eq!(accept_key(&headers), Err(StatusCode::BAD_REQUEST), "{missing}");
        }

        let mut headers = upgrade_headers();
        let _ = headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("8"));
        assert_eq!(accept_key(&headers), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn decodes_masked_text() {
        let mut codec = WsCodec::new(1024);
        let frames = decode_all(&mut codec, &client_frame(true, OP_TEXT, b"hello")).unwrap();
        assert_eq!(frames, vec![Frame::Text("hello".into())]);
    }

    #[test]
    fn waits_for_the_rest_of_a_frame() {
        let mut codec = WsCodec::new(1024);
        let bytes = client_frame(true, OP_BINARY, &[7; 200]);
        let mut buf = BytesMut::from(&bytes[..5]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&bytes[5..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Binary(Bytes::from(vec![7; 200])))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn reassembles_fragments_around_a_ping() {
        let mut codec = WsCodec::new(1024);
        let mut bytes = client_frame(false, OP_TEXT, b"hel");
        bytes.extend(client_frame(true, OP_PING, b"t"));
        bytes.extend(client_frame(true, OP_CONTINUATION, b"lo"));

        let frames = decode_all(&mut codec, &bytes).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Ping(Bytes::from_static(b"t")),
                Frame::Text("hello".into()),
            ]
        );
    }

    #[test]
    fn decodes_control_frames() {
        let mut codec = WsCodec::new(1024);
        let mut bytes = client_frame(true, OP_PONG, b"p");
        bytes.extend(client_frame(true, OP_CLOSE, &[0x03, 0xe8]));
        let frames = decode_all(&mut codec, &bytes).unwrap();
        assert_eq!(frames, vec![Frame::Pong(Bytes::from_static(b"p")), Frame::Close]);
    }

    #[test]
    fn rejects_protocol_violations() {
        let unmasked = [0x81, 0x01, b'a'];
        assert!(matches!(
            decode_all(&mut WsCodec::new(1024), &unmasked),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            decode_all(&mut WsCodec::new(1024), &client_frame(true, OP_CONTINUATION, b"x")),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            decode_all(&mut WsCodec::new(1024), &client_frame(false, OP_PING, b"x")),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            decode_all(&mut WsCodec::new(1024), &client_frame(true, OP_TEXT, &[0xff, 0xfe])),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_oversized_frames_and_messages() {
        assert_eq!(
            decode_all(&mut WsCodec::new(4), &client_frame(true, OP_TEXT, b"hello")),
            Err(TransportError::MessageTooLarge(5))
        );

        let mut bytes = client_frame(false, OP_BINARY, b"abc");
        bytes.extend(client_frame(true, OP_CONTINUATION, b"de"));
        assert_eq!(
            decode_all(&mut WsCodec::new(4), &bytes),
            Err(TransportError::MessageTooLarge(5))
        );
    }

    #[test]
    fn encodes_unmasked_server_frames() {
        let mut codec = WsCodec::new(1024);
        let mut dst = BytesMut::new();
        codec
            .encode(Frame::Pong(Bytes::from_static(b"t")), &mut dst)
            .unwrap();
        assert_eq!(&dst[..], &[0x8A, 0x01, b't']);

        dst.clear();
        codec
            .encode(Frame::Binary(Bytes::from(vec![0; 300])), &mut dst)
            .unwrap();
        assert_eq!(&dst[..4], &[0x82, 126, 0x01, 0x2c]);
        assert_eq!(dst.len(), 4 + 300);

        dst.clear();
        codec.encode(Frame::Close, &mut dst).unwrap();
        assert_eq!(&dst[..], &[0x88, 0x00]);
    }

    #[tokio::test]
    async fn ping_reaches_the_reader_without_an_automatic_reply() {
        let (server_io, mut client_io) = tokio::io::duplex(1024);
        let (_sink, mut frames) = split(server_io, 1024);

        client_io
            .write_all(&client_frame(true, OP_PING, b"0"))
            .await
            .unwrap();

        let frame = frames.next().await.unwrap().unwrap();
        assert_eq!(frame, Frame::Ping(Bytes::from_static(b"0")));

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_millis(100), client_io.read(&mut buf)).await;
        assert!(read.is_err(), "server wrote {read:?} without being asked");
    }

    #[tokio::test]
    async fn sink_writes_frames_and_closes() {
        let (server_io, mut client_io) = tokio::io::duplex(1024);
        let (mut sink, _frames) = split(server_io, 1024);

        sink.send_frame(Frame::Text("hi".into())).await.unwrap();
        FrameSink::close(&mut sink).await.unwrap();

        let mut written = Vec::new();
        let _ = client_io.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, vec![0x81, 0x02, b'h', b'i', 0x88, 0x00]);
    }
}
