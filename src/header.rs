// ABOUTME: Wire header for RPC messages (method name, message type, sequence id)
// ABOUTME: Realizes the binary codec consumed by the dispatching protocol to classify frames

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::Cursor;

use crate::error::{RpcError, RpcResult};

/// Maximum size of a single RPC message, header and body included.
///
/// Unlike the length-delimited framing `smpp::codec::PduHeader` needs to
/// split a byte stream, a WebSocket message already arrives whole (one
/// `onMessage` == one complete frame). The length field kept here is a
/// sanity bound against a corrupt or malicious encode, not a delimiter.
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// The four RPC message types (Section 3, `MessageHeader`).
#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

/// `(method_name, message_type, sequence_id)` as read by `readMessageBegin`.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub method_name: String,
    pub message_type: MessageType,
    pub sequence_id: i32,
}

/// Reads a `MessageHeader` from the front of an already-fully-received
/// frame, returning the header and the byte offset at which the body
/// starts. Does not consume `buf` in the sense of a streaming codec: the
/// frame is handed to the eventual consumer unmodified, exactly as
/// `ThriftMessageQueue.add` rewinds its `TMemoryBuffer` back to position 0
/// after snooping `readMessageBegin()`.
pub fn peek_header(buf: &[u8]) -> RpcResult<(MessageHeader, usize)> {
    let mut cursor = Cursor::new(buf);

    if cursor.remaining() < 4 {
        return Err(RpcError::FramingViolation {
            reason: "frame shorter than the length prefix".into(),
        });
    }
    let message_length = cursor.get_u32();
    if message_length > MAX_MESSAGE_SIZE {
        return Err(RpcError::FramingViolation {
            reason: format!("message of {message_length} bytes exceeds {MAX_MESSAGE_SIZE}"),
        });
    }
    if message_length as usize != buf.len() {
        return Err(RpcError::FramingViolation {
            reason: format!(
                "declared length {message_length} does not match delivered frame of {} bytes",
                buf.len()
            ),
        });
    }

    if cursor.remaining() < 1 + 4 + 2 {
        return Err(RpcError::FramingViolation {
            reason: "frame truncated before message type/sequence id/name length".into(),
        });
    }
    let message_type = MessageType::try_from(cursor.get_u8()).map_err(|_| RpcError::FramingViolation {
        reason: "unknown message type byte".into(),
    })?;
    let sequence_id = cursor.get_i32();
    let name_len = cursor.get_u16() as usize;

    if cursor.remaining() < name_len {
        return Err(RpcError::FramingViolation {
            reason: "frame truncated inside method name".into(),
        });
    }
    let name_start = cursor.position() as usize;
    let name_bytes = &buf[name_start..name_start + name_len];
    let method_name = std::str::from_utf8(name_bytes)
        .map_err(|_| RpcError::FramingViolation {
            reason: "method name is not valid utf-8".into(),
        })?
        .to_owned();

    let body_offset = name_start + name_len;

    Ok((
        MessageHeader {
            method_name,
            message_type,
            sequence_id,
        },
        body_offset,
    ))
}

/// Writes the header prefix (length placeholder, type, sequence id, method
/// name) into `buf`. The caller appends the encoded body immediately after,
/// then calls [`finalize_length`] once the whole message is in `buf`.
pub fn write_header(buf: &mut BytesMut, method_name: &str, message_type: MessageType, sequence_id: i32) {
    buf.put_u32(0); // patched by finalize_length
    buf.put_u8(message_type.into());
    buf.put_i32(sequence_id);
    buf.put_u16(method_name.len() as u16);
    buf.put_slice(method_name.as_bytes());
}

/// Patches the length prefix written by [`write_header`] now that the full
/// message (header + body) is in `buf`. Mirrors `Encodable::to_bytes`
/// fixing up `command_length` after the rest of the PDU has been encoded.
pub fn finalize_length(buf: &mut BytesMut) {
    let length = buf.len() as u32;
    buf[0..4].copy_from_slice(&length.to_be_bytes());
}

/// Contract for an RPC request/response/exception body. The concrete wire
/// encoding is an external collaborator (Section 1, "out of scope"); this
/// crate only needs a body that can append itself to the outbound buffer.
pub trait RpcEncode {
    fn encode_body(&self, buf: &mut BytesMut) -> RpcResult<()>;
}

/// Contract for decoding a body from the bytes following the header.
pub trait RpcDecode: Sized {
    fn decode_body(buf: &[u8]) -> RpcResult<Self>;
}

impl RpcEncode for () {
    fn encode_body(&self, _buf: &mut BytesMut) -> RpcResult<()> {
        Ok(())
    }
}

impl RpcDecode for () {
    fn decode_body(_buf: &[u8]) -> RpcResult<Self> {
        Ok(())
    }
}

/// A plain UTF-8 string body, useful for simple demo services and as the
/// default exception payload.
impl RpcEncode for String {
    fn encode_body(&self, buf: &mut BytesMut) -> RpcResult<()> {
        buf.put_slice(self.as_bytes());
        Ok(())
    }
}

impl RpcDecode for String {
    fn decode_body(buf: &[u8]) -> RpcResult<Self> {
        String::from_utf8(buf.to_vec()).map_err(|e| RpcError::FramingViolation {
            reason: format!("body is not valid utf-8: {e}"),
        })
    }
}

/// A message already classified into a per-type queue: its decoded header,
/// the whole frame it came from (retained so the consumer can re-read the
/// body through its own codec), and the offset the body starts at.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub header: MessageHeader,
    pub frame: Bytes,
    pub body_offset: usize,
}

impl QueuedMessage {
    pub fn body(&self) -> &[u8] {
        &self.frame[self.body_offset..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_call_header() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, "work", MessageType::Call, 7);
        buf.put_slice(b"hello");
        finalize_length(&mut buf);

        let frame = buf.freeze();
        let (header, body_offset) = peek_header(&frame).unwrap();
        assert_eq!(header.method_name, "work");
        assert_eq!(header.message_type, MessageType::Call);
        assert_eq!(header.sequence_id, 7);
        assert_eq!(&frame[body_offset..], b"hello");
    }

    #[test]
    fn rejects_a_length_mismatch() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, "work", MessageType::Call, 1);
        finalize_length(&mut buf);
        buf.put_slice(b"trailing garbage not covered by the length prefix");

        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, RpcError::FramingViolation { .. }));
    }

    #[test]
    fn rejects_an_unknown_message_type() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u8(99);
        buf.put_i32(1);
        buf.put_u16(0);
        finalize_length(&mut buf);

        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, RpcError::FramingViolation { .. }));
    }

    #[test]
    fn rejects_an_oversized_declared_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_MESSAGE_SIZE + 1);
        let err = peek_header(&buf).unwrap_err();
        assert!(matches!(err, RpcError::FramingViolation { .. }));
    }
}
