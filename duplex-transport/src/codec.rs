//! The frame codec: positional binary encode/decode of a [`Frame`], plus a
//! stateful length-prefix reassembler for transports that hand back raw byte
//! fragments instead of whole messages (TCP, Unix).
//!
//! Wire layout of one frame body (before the 4-byte length prefix a
//! transport adapter wraps it in):
//!
//! ```text
//! u8      kind          (0 = open, 1 = data)
//! u32 BE  channel_id
//! u8      last flag     (0 or 1)
//! u8      has_service
//! [u16 BE len, bytes]   service            (present iff has_service)
//! u16 BE  header_count
//! [u16 BE len, bytes]*  headers
//! u8      has_error
//! [u32 BE len, bytes]   error              (present iff has_error)
//! u32 BE  payload_len
//! bytes   payload
//! ```
//!
//! This is not msgpack; the wire spec explicitly allows any self-describing
//! positional binary encoding, and a hand-rolled one avoids pulling in a new
//! serde-family dependency the teacher's stack never carried.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use duplex_core::buffer::SegmentedBuffer;
use thiserror::Error;

use crate::frame::{Frame, FrameKind};

/// Errors raised while decoding a frame.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated frame")]
    Truncated,
    #[error("invalid frame kind byte: {0}")]
    InvalidKind(u8),
    #[error("invalid utf-8 in frame field")]
    InvalidUtf8,
    #[error("frame body exceeds maximum size")]
    TooLarge,
}

/// Frame bodies over this size are rejected as a protocol violation rather
/// than accepted, to bound the decoder's reassembly buffer.
pub const MAX_FRAME_BODY: usize = 64 * 1024 * 1024;

/// Encode `frame` into its positional binary wire form (frame body only, no
/// length prefix — the transport adapter that carries bytes on the wire
/// owns that framing, see [`crate::message_stream`]).
#[must_use]
pub fn encode_frame(frame: &Frame) -> Bytes {
    let mut out = BytesMut::with_capacity(16 + frame.payload.len());

    out.put_u8(match frame.kind {
        FrameKind::Open => 0,
        FrameKind::Data => 1,
    });
    out.put_u32(frame.channel_id);
    out.put_u8(u8::from(frame.last));

    match &frame.service {
        Some(service) => {
            out.put_u8(1);
            let bytes = service.as_bytes();
            out.put_u16(bytes.len() as u16);
            out.put_slice(bytes);
        }
        None => out.put_u8(0),
    }

    out.put_u16(frame.headers.len() as u16);
    for header in &frame.headers {
        let bytes = header.as_bytes();
        out.put_u16(bytes.len() as u16);
        out.put_slice(bytes);
    }

    match &frame.error {
        Some(error) => {
            out.put_u8(1);
            let bytes = error.as_bytes();
            out.put_u32(bytes.len() as u32);
            out.put_slice(bytes);
        }
        None => out.put_u8(0),
    }

    out.put_u32(frame.payload.len() as u32);
    out.extend_from_slice(&frame.payload);

    out.freeze()
}

/// Decode one complete frame body from `buf`.
pub fn decode_frame(mut buf: &[u8]) -> Result<Frame, CodecError> {
    let kind = take_u8(&mut buf)?;
    let kind = match kind {
        0 => FrameKind::Open,
        1 => FrameKind::Data,
        other => return Err(CodecError::InvalidKind(other)),
    };
    let channel_id = take_u32(&mut buf)?;
    let last = take_u8(&mut buf)? != 0;

    let service = if take_u8(&mut buf)? != 0 {
        Some(take_string(&mut buf, take_u16(&mut buf)? as usize)?)
    } else {
        None
    };

    let header_count = take_u16(&mut buf)?;
    let mut headers = Vec::with_capacity(header_count as usize);
    for _ in 0..header_count {
        let len = take_u16(&mut buf)? as usize;
        headers.push(take_string(&mut buf, len)?);
    }

    let error = if take_u8(&mut buf)? != 0 {
        let len = take_u32(&mut buf)? as usize;
        Some(take_string(&mut buf, len)?)
    } else {
        None
    };

    let payload_len = take_u32(&mut buf)? as usize;
    if payload_len > buf.len() {
        return Err(CodecError::Truncated);
    }
    let payload = Bytes::copy_from_slice(&buf[..payload_len]);

    Ok(Frame {
        kind,
        channel_id,
        service,
        headers,
        error,
        last,
        payload,
    })
}

fn take_u8(buf: &mut &[u8]) -> Result<u8, CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, CodecError> {
    if buf.len() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32, CodecError> {
    if buf.len() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u32())
}

fn take_string(buf: &mut &[u8], len: usize) -> Result<String, CodecError> {
    if buf.len() < len {
        return Err(CodecError::Truncated);
    }
    let s = std::str::from_utf8(&buf[..len])
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    buf.advance(len);
    Ok(s)
}

/// Reassembles 4-byte-length-prefixed messages out of arbitrary byte
/// fragments delivered by a raw stream (TCP/Unix). One accumulated message
/// is exactly one encrypted wire message (see
/// `crate::session::EncryptedTransport`), which in turn decodes to exactly
/// one [`Frame`].
///
/// Modeled directly on the teacher's `ZmtpDecoder`: a fast zero-copy path
/// when the whole message is already buffered, and a slow reassembly path
/// for fragmented reads.
#[derive(Debug, Default)]
pub struct LengthPrefixedReassembler {
    staging: SegmentedBuffer,
    pending_len: Option<usize>,
}

impl LengthPrefixedReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes in.
    pub fn push(&mut self, bytes: Bytes) {
        self.staging.push(bytes);
    }

    /// Pull out one complete message, if enough bytes have been pushed.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, CodecError> {
        loop {
            let len = match self.pending_len {
                Some(len) => len,
                None => {
                    if self.staging.len() < 4 {
                        return Ok(None);
                    }
                    let mut hdr = [0u8; 4];
                    self.staging.copy_prefix(4, &mut hdr);
                    self.staging.advance(4);
                    let len = u32::from_be_bytes(hdr) as usize;
                    if len > MAX_FRAME_BODY {
                        return Err(CodecError::TooLarge);
                    }
                    self.pending_len = Some(len);
                    len
                }
            };

            if self.staging.len() < len {
                return Ok(None);
            }

            let body = self
                .staging
                .take_bytes(len)
                .expect("length check ensures body is buffered");
            self.pending_len = None;
            return Ok(Some(body));
        }
    }
}

/// Prefix a message with its 4-byte big-endian length, ready to write to a
/// raw byte stream.
#[must_use]
pub fn frame_with_length_prefix(body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_open_frame() {
        let frame = Frame::open(42, "echo", vec!["k=v".to_string(), "a=b".to_string()]);
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.channel_id, 42);
        assert_eq!(decoded.service.as_deref(), Some("echo"));
        assert_eq!(decoded.headers, vec!["k=v".to_string(), "a=b".to_string()]);
    }

    #[test]
    fn round_trips_a_data_frame_with_error() {
        let frame = Frame::error_frame(9, "Triggered error in middle", true);
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.error.as_deref(), Some("Triggered error in middle"));
        assert!(decoded.last);
        assert!(decoded.service.is_none());
    }

    #[test]
    fn round_trips_empty_and_nonempty_payload() {
        let frame = Frame::data(1, Bytes::from_static(b"\x01\x02\x03"), true);
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.payload.as_ref(), b"\x01\x02\x03");
    }

    #[test]
    fn truncated_input_is_rejected() {
        let frame = Frame::data(1, Bytes::from_static(b"hello"), false);
        let encoded = encode_frame(&frame);
        let err = decode_frame(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated));
    }

    #[test]
    fn reassembler_handles_fragmented_single_message() {
        let frame = Frame::data(3, Bytes::from_static(b"hello world"), false);
        let body = encode_frame(&frame);
        let wire = frame_with_length_prefix(&body);

        let mut reassembler = LengthPrefixedReassembler::new();
        // Split the wire bytes into two fragments to exercise the slow path.
        let midpoint = wire.len() / 2;
        reassembler.push(wire.slice(..midpoint));
        assert!(reassembler.next_message().unwrap().is_none());
        reassembler.push(wire.slice(midpoint..));
        let msg = reassembler.next_message().unwrap().unwrap();
        assert_eq!(msg, body);
    }

    #[test]
    fn reassembler_handles_back_to_back_messages() {
        let f1 = encode_frame(&Frame::data(1, Bytes::from_static(b"a"), false));
        let f2 = encode_frame(&Frame::data(2, Bytes::from_static(b"b"), false));
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&frame_with_length_prefix(&f1));
        wire.extend_from_slice(&frame_with_length_prefix(&f2));

        let mut reassembler = LengthPrefixedReassembler::new();
        reassembler.push(wire.freeze());
        assert_eq!(reassembler.next_message().unwrap().unwrap(), f1);
        assert_eq!(reassembler.next_message().unwrap().unwrap(), f2);
        assert!(reassembler.next_message().unwrap().is_none());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u32((MAX_FRAME_BODY + 1) as u32);
        let mut reassembler = LengthPrefixedReassembler::new();
        reassembler.push(wire.freeze());
        assert!(matches!(reassembler.next_message(), Err(CodecError::TooLarge)));
    }
}
