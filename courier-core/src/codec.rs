//! Packet framing
//!
//! [`Decoder`] and [`Encoder`] are the contracts the pipeline uses for its
//! first two stages. [`PacketDecoder`] and [`PacketEncoder`] are the default
//! implementations.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! +--------+-----+-------+------------+-----+--------------+
//! | len u32| cmd | flags | session u32| lrc | body (len)   |
//! +--------+-----+-------+------------+-----+--------------+
//! ```
//!
//! `lrc` is the XOR of the ten header bytes before it. A single
//! [`HEARTBEAT_BYTE`](crate::packet::constants::HEARTBEAT_BYTE) is a heartbeat.

use crate::error::CodecError;
use crate::packet::{
    constants::{DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, HEARTBEAT_BYTE},
    Packet,
};
use bytes::{Buf, BufMut, BytesMut};

/// Turns a raw byte stream into packets
///
/// Implementations consume complete frames from `src` and leave partial
/// frames in place for the next read.
pub trait Decoder: Send + 'static {
    /// Decode one packet, or `Ok(None)` when more bytes are needed
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError>;

    /// Decode at end of stream; leftover bytes are a truncated frame
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(CodecError::Truncated {
                remaining: src.len(),
            }),
        }
    }
}

/// Turns outbound packets into bytes
pub trait Encoder: Send + 'static {
    /// Append the encoded packet to `dst`
    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError>;
}

/// Default length-prefixed packet decoder
#[derive(Debug, Clone)]
pub struct PacketDecoder {
    max_frame_size: usize,
}

impl PacketDecoder {
    /// Create a decoder with the default frame limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a decoder rejecting bodies larger than `max_frame_size`
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured body limit
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketDecoder {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == HEARTBEAT_BYTE {
            src.advance(1);
            return Ok(Some(Packet::heartbeat()));
        }

        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let body_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if body_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        let expected = lrc(&src[..HEADER_LEN - 1]);
        let actual = src[HEADER_LEN - 1];
        if expected != actual {
            return Err(CodecError::Checksum { expected, actual });
        }

        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut header = src.split_to(HEADER_LEN);
        header.advance(4);
        let cmd = header.get_u8();
        let flags = header.get_u8();
        let session_id = header.get_u32();
        let body = src.split_to(body_len).freeze();

        Ok(Some(
            Packet::new(cmd, body)
                .with_flags(flags)
                .with_session_id(session_id),
        ))
    }
}

/// Default packet encoder; stateless and shareable
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketEncoder;

impl Encoder for PacketEncoder {
    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        if packet.is_heartbeat() {
            dst.put_u8(HEARTBEAT_BYTE);
            return Ok(());
        }

        let body_len = u32::try_from(packet.body.len()).map_err(|_| CodecError::FrameTooLarge {
            size: packet.body.len(),
            max: u32::MAX as usize,
        })?;

        dst.reserve(packet.encoded_len());
        let start = dst.len();
        dst.put_u32(body_len);
        dst.put_u8(packet.cmd);
        dst.put_u8(packet.flags);
        dst.put_u32(packet.session_id);
        let check = lrc(&dst[start..]);
        dst.put_u8(check);
        dst.put_slice(&packet.body);
        Ok(())
    }
}

fn lrc(header: &[u8]) -> u8 {
    header.iter().fold(0u8, |acc, b| acc ^ b)
}
