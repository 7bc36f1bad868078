//! Application packets
//!
//! A [`Packet`] is the unit that travels between the decoder, the handler and
//! the encoder. The byte layout lives in [`crate::codec`].

use bytes::Bytes;

/// Packet header and wire constants
pub mod constants {
    /// Size of the fixed packet header in bytes
    pub const HEADER_LEN: usize = 11;

    /// A lone byte with this value on the wire is a heartbeat
    pub const HEARTBEAT_BYTE: u8 = 0xDF;

    /// Default maximum body size accepted by the decoder (10 MiB)
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
}

/// Packet flag bits
pub mod flags {
    /// Body is encrypted by the session layer
    pub const CRYPTO: u8 = 0x01;
    /// Body is compressed by the session layer
    pub const COMPRESS: u8 = 0x02;
    /// Sender expects an acknowledgement
    pub const BIZ_ACK: u8 = 0x04;
    /// Sender expects an automatic acknowledgement
    pub const AUTO_ACK: u8 = 0x08;
}

/// A framed application message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command byte, interpreted by the application handler
    pub cmd: u8,
    /// Flag bits, see [`flags`]
    pub flags: u8,
    /// Session identifier assigned by the application
    pub session_id: u32,
    /// Packet body
    pub body: Bytes,
    heartbeat: bool,
}

impl Packet {
    /// Create a packet with the given command and body
    pub fn new(cmd: u8, body: impl Into<Bytes>) -> Self {
        Self {
            cmd,
            flags: 0,
            session_id: 0,
            body: body.into(),
            heartbeat: false,
        }
    }

    /// Create a heartbeat packet
    pub fn heartbeat() -> Self {
        Self {
            cmd: 0,
            flags: 0,
            session_id: 0,
            body: Bytes::new(),
            heartbeat: true,
        }
    }

    /// Set the session identifier
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set flag bits
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Whether this packet is a heartbeat
    pub fn is_heartbeat(&self) -> bool {
        self.heartbeat
    }

    /// Whether a flag bit is set
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Number of bytes this packet occupies on the wire
    pub fn encoded_len(&self) -> usize {
        if self.heartbeat {
            1
        } else {
            constants::HEADER_LEN + self.body.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_builders() {
        let packet = Packet::new(7, &b"hello"[..])
            .with_session_id(42)
            .with_flags(flags::BIZ_ACK | flags::COMPRESS);

        assert_eq!(packet.cmd, 7);
        assert_eq!(packet.session_id, 42);
        assert!(packet.has_flag(flags::BIZ_ACK));
        assert!(!packet.has_flag(flags::CRYPTO));
        assert!(!packet.is_heartbeat());
        assert_eq!(packet.encoded_len(), constants::HEADER_LEN + 5);
    }

    #[test]
    fn test_heartbeat_len() {
        let hb = Packet::heartbeat();
        assert!(hb.is_heartbeat());
        assert_eq!(hb.encoded_len(), 1);
    }
}
