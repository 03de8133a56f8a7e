//! Pipe protocol framing.
//!
//! Every frame on the duplex stream is enveloped as:
//!
//! ```text
//! [kind:1][length:4][body:length]
//! ```
//!
//! The body layout depends on the kind; see [`kind`]. [`FrameCodec`] plugs
//! this format into `tokio_util::codec` so a raw byte stream can be read and
//! written as a sequence of [`Frame`] values.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Code, FrameError, Status};
use crate::metadata::{Metadata, MetadataValue};

/// Frame kind bytes.
pub mod kind {
    /// `[method:str16][has_deadline:1][deadline_ms:8]?`
    pub const REQUEST_INIT: u8 = 0x01;
    /// `[metadata]`
    pub const HEADERS: u8 = 0x02;
    /// Raw message bytes.
    pub const PAYLOAD: u8 = 0x03;
    /// Empty body.
    pub const CANCEL: u8 = 0x04;
    /// Empty body.
    pub const STREAM_END: u8 = 0x05;
    /// `[metadata][code:1][message:str32]`
    pub const TRAILERS: u8 = 0x06;
}

/// Envelope header size (kind + length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default upper bound for a single frame body (4 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const METADATA_ASCII: u8 = 0;
const METADATA_BINARY: u8 = 1;

/// One unit of the pipe protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Opens a call: the method to invoke and the absolute deadline, if any.
    RequestInit {
        method: String,
        deadline: Option<SystemTime>,
    },
    /// Request or response headers.
    Headers(Metadata),
    /// One serialized message.
    Payload(Bytes),
    /// Client asks the server to abandon the call.
    Cancel,
    /// Client finished sending request messages.
    StreamEnd,
    /// Final metadata and status sent by the server.
    Trailers { metadata: Metadata, status: Status },
}

impl Frame {
    /// The kind byte of this frame.
    pub fn kind(&self) -> u8 {
        match self {
            Frame::RequestInit { .. } => kind::REQUEST_INIT,
            Frame::Headers(_) => kind::HEADERS,
            Frame::Payload(_) => kind::PAYLOAD,
            Frame::Cancel => kind::CANCEL,
            Frame::StreamEnd => kind::STREAM_END,
            Frame::Trailers { .. } => kind::TRAILERS,
        }
    }

    /// Short name used in errors and logs.
    pub fn name(&self) -> &'static str {
        kind_name(self.kind())
    }
}

fn kind_name(kind: u8) -> &'static str {
    match kind {
        kind::REQUEST_INIT => "request_init",
        kind::HEADERS => "headers",
        kind::PAYLOAD => "payload",
        kind::CANCEL => "cancel",
        kind::STREAM_END => "stream_end",
        kind::TRAILERS => "trailers",
        _ => "unknown",
    }
}

/// Append one enveloped frame to `dst`.
///
/// Several frames encoded into the same buffer can be written with a single
/// write, which is how multi-frame commits stay atomic on the stream.
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
    let start = dst.len();
    dst.put_u8(frame.kind());
    dst.put_u32(0); // length, patched below

    match frame {
        Frame::RequestInit { method, deadline } => {
            put_str16(dst, method, "method")?;
            match deadline {
                Some(at) => {
                    dst.put_u8(1);
                    dst.put_u64(unix_millis(*at));
                }
                None => dst.put_u8(0),
            }
        }
        Frame::Headers(metadata) => put_metadata(dst, metadata)?,
        Frame::Payload(payload) => dst.extend_from_slice(payload),
        Frame::Cancel | Frame::StreamEnd => {}
        Frame::Trailers { metadata, status } => {
            put_metadata(dst, metadata)?;
            dst.put_u8(status.code() as u8);
            put_bytes32(dst, status.message().unwrap_or_default().as_bytes());
        }
    }

    let body_len = dst.len() - start - FRAME_HEADER_SIZE;
    let body_len = u32::try_from(body_len).map_err(|_| FrameError::TooLarge {
        size: body_len,
        limit: u32::MAX as usize,
    })?;
    dst[start + 1..start + FRAME_HEADER_SIZE].copy_from_slice(&body_len.to_be_bytes());
    Ok(())
}

/// Decode a frame body of the given kind.
pub fn decode_frame(kind: u8, mut body: Bytes) -> Result<Frame, FrameError> {
    let frame = match kind {
        kind::REQUEST_INIT => {
            let method = get_str16(&mut body, "method")?;
            let deadline = match get_u8(&mut body, "deadline flag")? {
                0 => None,
                _ => {
                    if body.remaining() < 8 {
                        return Err(FrameError::Truncated("deadline"));
                    }
                    let millis = body.get_u64();
                    let at = UNIX_EPOCH
                        .checked_add(Duration::from_millis(millis))
                        .ok_or(FrameError::DeadlineOutOfRange(millis))?;
                    Some(at)
                }
            };
            Frame::RequestInit { method, deadline }
        }
        kind::HEADERS => Frame::Headers(get_metadata(&mut body)?),
        kind::PAYLOAD => return Ok(Frame::Payload(body)),
        kind::CANCEL => Frame::Cancel,
        kind::STREAM_END => Frame::StreamEnd,
        kind::TRAILERS => {
            let metadata = get_metadata(&mut body)?;
            let code = Code::from_wire(get_u8(&mut body, "status code")?);
            let message = get_bytes32(&mut body, "status message")?;
            let message = String::from_utf8(message.to_vec())
                .map_err(|_| FrameError::InvalidUtf8("status message"))?;
            let status = if message.is_empty() {
                Status::from_code(code)
            } else {
                Status::new(code, message)
            };
            Frame::Trailers { metadata, status }
        }
        other => return Err(FrameError::UnknownKind(other)),
    };

    if body.has_remaining() {
        return Err(FrameError::TrailingBytes {
            kind: kind_name(kind),
            count: body.remaining(),
        });
    }
    Ok(frame)
}

/// `tokio_util` codec for [`Frame`] values.
///
/// Putting a byte stream behind this codec is what switches it into
/// message-boundary mode: reads and writes happen in whole frames.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a codec rejecting frame bodies above `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured frame size limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let kind = src[0];
        let length = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if length > self.max_frame_size {
            return Err(FrameError::TooLarge {
                size: length,
                limit: self.max_frame_size,
            });
        }

        let frame_size = FRAME_HEADER_SIZE + length;
        if src.len() < frame_size {
            src.reserve(frame_size - src.len());
            return Ok(None);
        }

        let mut frame_bytes = src.split_to(frame_size);
        frame_bytes.advance(FRAME_HEADER_SIZE);
        decode_frame(kind, frame_bytes.freeze()).map(Some)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let start = dst.len();
        encode_frame(&frame, dst)?;
        let size = dst.len() - start - FRAME_HEADER_SIZE;
        if size > self.max_frame_size {
            dst.truncate(start);
            return Err(FrameError::TooLarge {
                size,
                limit: self.max_frame_size,
            });
        }
        Ok(())
    }
}

fn unix_millis(at: SystemTime) -> u64 {
    // Deadlines before the epoch are already expired; clamp them to it.
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

fn put_str16(dst: &mut BytesMut, value: &str, field: &'static str) -> Result<(), FrameError> {
    let len = u16::try_from(value.len())
        .map_err(|_| FrameError::InvalidMetadata(format!("{field} longer than 65535 bytes")))?;
    dst.put_u16(len);
    dst.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_bytes32(dst: &mut BytesMut, value: &[u8]) {
    dst.put_u32(value.len() as u32);
    dst.extend_from_slice(value);
}

fn put_metadata(dst: &mut BytesMut, metadata: &Metadata) -> Result<(), FrameError> {
    dst.put_u32(metadata.len() as u32);
    for (key, value) in metadata.iter() {
        put_str16(dst, key, "metadata key")?;
        let tag = if value.is_binary() {
            METADATA_BINARY
        } else {
            METADATA_ASCII
        };
        dst.put_u8(tag);
        put_bytes32(dst, value.as_bytes());
    }
    Ok(())
}

fn get_u8(src: &mut Bytes, field: &'static str) -> Result<u8, FrameError> {
    if !src.has_remaining() {
        return Err(FrameError::Truncated(field));
    }
    Ok(src.get_u8())
}

fn get_str16(src: &mut Bytes, field: &'static str) -> Result<String, FrameError> {
    if src.remaining() < 2 {
        return Err(FrameError::Truncated(field));
    }
    let len = src.get_u16() as usize;
    if src.remaining() < len {
        return Err(FrameError::Truncated(field));
    }
    String::from_utf8(src.split_to(len).to_vec()).map_err(|_| FrameError::InvalidUtf8(field))
}

fn get_bytes32(src: &mut Bytes, field: &'static str) -> Result<Bytes, FrameError> {
    if src.remaining() < 4 {
        return Err(FrameError::Truncated(field));
    }
    let len = src.get_u32() as usize;
    if src.remaining() < len {
        return Err(FrameError::Truncated(field));
    }
    Ok(src.split_to(len))
}

fn get_metadata(src: &mut Bytes) -> Result<Metadata, FrameError> {
    if src.remaining() < 4 {
        return Err(FrameError::Truncated("metadata count"));
    }
    let count = src.get_u32();
    let mut metadata = Metadata::new();
    for _ in 0..count {
        let key = get_str16(src, "metadata key")?;
        let tag = get_u8(src, "metadata value kind")?;
        let raw = get_bytes32(src, "metadata value")?;
        let value = match tag {
            METADATA_ASCII => MetadataValue::Ascii(
                String::from_utf8(raw.to_vec())
                    .map_err(|_| FrameError::InvalidUtf8("metadata value"))?,
            ),
            METADATA_BINARY => MetadataValue::Binary(raw),
            other => {
                return Err(FrameError::InvalidMetadata(format!(
                    "unknown value kind {other}"
                )));
            }
        };
        metadata.append(&key, value)?;
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_payload_envelope_layout() {
        let buf = encode(&Frame::Payload(Bytes::from_static(b"hello")));

        assert_eq!(buf[0], kind::PAYLOAD);
        assert_eq!(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]), 5);
        assert_eq!(&buf[5..], b"hello");
    }

    #[test]
    fn test_empty_frames_have_no_body() {
        assert_eq!(&encode(&Frame::Cancel)[..], &[kind::CANCEL, 0, 0, 0, 0]);
        assert_eq!(&encode(&Frame::StreamEnd)[..], &[kind::STREAM_END, 0, 0, 0, 0]);
    }

    #[test]
    fn test_request_init_deadline_millis() {
        let deadline = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let frame = Frame::RequestInit {
            method: "/echo.Echo/Say".into(),
            deadline: Some(deadline),
        };
        let mut buf = encode(&frame);

        let decoded = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_trailers_with_mixed_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("x-reason", "quota").unwrap();
        metadata.insert_bin("detail-bin", vec![0u8, 1, 2]).unwrap();
        let frame = Frame::Trailers {
            metadata,
            status: Status::new(Code::ResourceExhausted, "slow down"),
        };
        let mut buf = encode(&frame);

        let decoded = FrameCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_trailers_without_message() {
        let frame = Frame::Trailers {
            metadata: Metadata::new(),
            status: Status::ok(),
        };
        let mut buf = encode(&frame);

        match FrameCodec::new().decode(&mut buf).unwrap().unwrap() {
            Frame::Trailers { status, .. } => {
                assert!(status.is_ok());
                assert!(status.message().is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let full = encode(&Frame::Payload(Bytes::from_static(b"abcdef")));
        let mut codec = FrameCodec::new();

        let mut partial = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&full[..8]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 8);

        partial.extend_from_slice(&full[8..]);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame, Frame::Payload(Bytes::from_static(b"abcdef")));
    }

    #[test]
    fn test_decoder_yields_frames_in_order() {
        let mut buf = encode(&Frame::Headers(Metadata::new()));
        buf.extend_from_slice(&encode(&Frame::Payload(Bytes::from_static(b"a"))));
        buf.extend_from_slice(&encode(&Frame::Payload(Bytes::from_static(b"b"))));
        let mut codec = FrameCodec::new();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Headers(Metadata::new())));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Payload(Bytes::from_static(b"a"))));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Payload(Bytes::from_static(b"b"))));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decoder_rejects_oversized_frame() {
        let mut buf = encode(&Frame::Payload(Bytes::from(vec![0u8; 64])));
        let mut codec = FrameCodec::with_max_frame_size(16);

        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 64, limit: 16 }));
    }

    #[test]
    fn test_encoder_rejects_oversized_frame() {
        let mut codec = FrameCodec::with_max_frame_size(4);
        let mut buf = BytesMut::new();

        let err = codec
            .encode(Frame::Payload(Bytes::from_static(b"too long")), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_rejects_unknown_kind() {
        let mut buf = BytesMut::from(&[0x7f, 0, 0, 0, 0][..]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::UnknownKind(0x7f)));
    }

    #[test]
    fn test_decoder_rejects_trailing_bytes() {
        let mut buf = BytesMut::from(&[kind::CANCEL, 0, 0, 0, 1, 0xAA][..]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TrailingBytes { kind: "cancel", count: 1 }));
    }

    #[test]
    fn test_decoder_rejects_unrepresentable_deadline() {
        // "/m", deadline flag, u64::MAX millis
        let mut body = vec![0, 2, b'/', b'm', 1];
        body.extend_from_slice(&u64::MAX.to_be_bytes());
        let mut buf = BytesMut::new();
        buf.put_u8(kind::REQUEST_INIT);
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);

        match FrameCodec::new().decode(&mut buf) {
            // platforms whose clock spans the range decode it unchanged
            Ok(Some(Frame::RequestInit { deadline, .. })) => {
                assert_eq!(
                    deadline,
                    UNIX_EPOCH.checked_add(Duration::from_millis(u64::MAX))
                );
            }
            Err(err) => assert!(matches!(err, FrameError::DeadlineOutOfRange(u64::MAX))),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_rejects_truncated_metadata() {
        // headers frame claiming one entry but carrying none
        let mut buf = BytesMut::from(&[kind::HEADERS, 0, 0, 0, 4, 0, 0, 0, 1][..]);
        let err = FrameCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Truncated("metadata key")));
    }
}
