//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for the channel.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for truncated input.
//!
//! No I/O happens here — this is pure data transformation.  Conversation-id
//! matching and sequence validation belong to the receive path in
//! [`crate::connection`].
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Conversation Id                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Reserved    |     Flags     |        Window Size            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Send Timestamp                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Echoed Timestamp                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.  The payload length is
//! implied by the datagram length; the channel preserves datagram
//! boundaries.

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Payload byte 0 is a control opcode rather than stream data.
    pub const CTL: u8 = 0b0000_0010;
    /// Abort the connection.
    pub const RST: u8 = 0b0000_0100;
}

/// Control opcode opening a connection (only opcode defined).
pub const CTL_CONNECT: u8 = 0;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Shortest datagram that carries the conversation id, seq, and ack.
pub const MIN_PREFIX_LEN: usize = 12;

/// Largest datagram the engine will accept or produce.
pub const MAX_PACKET: usize = 65_535;

// Byte offsets of each field within the serialised header.
const OFF_CONV: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_RESERVED: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_WINDOW: usize = 14;
const OFF_TSVAL: usize = 16;
const OFF_TSECR: usize = 20;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    /// Conversation id shared by both ends of one logical connection.
    pub conv: u32,
    /// Sequence number of the first payload byte in this segment.
    pub seq: u32,
    /// Acknowledgement number (next byte expected from the peer).
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Sender's clock when the segment was written, in milliseconds.
    pub tsval: u32,
    /// Most recent peer `tsval` accepted by the sender, echoed back.
    pub tsecr: u32,
}

impl Header {
    pub fn is_ctl(&self) -> bool {
        self.flags & flags::CTL != 0
    }

    pub fn is_rst(&self) -> bool {
        self.flags & flags::RST != 0
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_CONV..OFF_CONV + 4].copy_from_slice(&self.header.conv.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_RESERVED] = 0;
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_TSVAL..OFF_TSVAL + 4].copy_from_slice(&self.header.tsval.to_be_bytes());
        buf[OFF_TSECR..OFF_TSECR + 4].copy_from_slice(&self.header.tsecr.to_be_bytes());

        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`MIN_PREFIX_LEN`],
    /// - `buf` cannot hold the full [`HEADER_LEN`] header, or
    /// - `buf` is longer than [`MAX_PACKET`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < MIN_PREFIX_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TruncatedHeader(buf.len()));
        }
        if buf.len() > MAX_PACKET {
            return Err(PacketError::Oversize(buf.len()));
        }

        Ok(Packet {
            header: Header {
                conv: read_u32(buf, OFF_CONV),
                seq: read_u32(buf, OFF_SEQ),
                ack: read_u32(buf, OFF_ACK),
                flags: buf[OFF_FLAGS],
                window: u16::from_be_bytes([buf[OFF_WINDOW], buf[OFF_WINDOW + 1]]),
                tsval: read_u32(buf, OFF_TSVAL),
                tsecr: read_u32(buf, OFF_TSECR),
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Not even the conversation id, seq, and ack fit.
    #[error("datagram of {0} bytes is shorter than the 12-byte prefix")]
    TooShort(usize),
    /// The fixed prefix is present but the rest of the header is cut off.
    #[error("datagram of {0} bytes truncates the 24-byte header")]
    TruncatedHeader(usize),
    /// Larger than any packet the engine produces.
    #[error("datagram of {0} bytes exceeds the maximum packet size")]
    Oversize(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(seq: u32, ack: u32, flags: u8, window: u16, payload: &[u8]) -> Packet {
        Packet {
            header: Header {
                conv: 7,
                seq,
                ack,
                flags,
                window,
                tsval: 1000,
                tsecr: 900,
            },
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = make_packet(42, 17, flags::CTL, 4096, &[CTL_CONNECT]);
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
        assert!(decoded.header.is_ctl());
        assert!(!decoded.header.is_rst());
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(Packet::decode(&[]), Err(PacketError::TooShort(0)));
    }

    #[test]
    fn decode_below_prefix_returns_error() {
        assert_eq!(
            Packet::decode(&[0u8; MIN_PREFIX_LEN - 1]),
            Err(PacketError::TooShort(MIN_PREFIX_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_header_returns_error() {
        let mut bytes = make_packet(0, 0, 0, 0, b"").encode();
        bytes.pop();
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::TruncatedHeader(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_oversize_returns_error() {
        let bytes = vec![0u8; MAX_PACKET + 1];
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::Oversize(MAX_PACKET + 1))
        );
    }

    #[test]
    fn reserved_byte_is_zero() {
        let bytes = make_packet(1, 2, flags::RST, 10, b"x").encode();
        assert_eq!(bytes[OFF_RESERVED], 0);
        assert_eq!(bytes[OFF_FLAGS], flags::RST);
    }

    #[test]
    fn empty_payload_is_bare_header() {
        let bytes = make_packet(0, 1000, 0, 65535, b"").encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Packet::decode(&bytes).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.header.window, 65535);
    }

    #[test]
    fn fields_big_endian_on_wire() {
        let bytes = make_packet(0x0102_0304, 0x0506_0708, 0, 0x090a, b"").encode();
        assert_eq!(&bytes[OFF_CONV..OFF_CONV + 4], &[0, 0, 0, 7]);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&bytes[OFF_WINDOW..OFF_WINDOW + 2], &[0x09, 0x0a]);
        assert_eq!(&bytes[OFF_TSVAL..OFF_TSVAL + 4], &1000u32.to_be_bytes());
        assert_eq!(&bytes[OFF_TSECR..OFF_TSECR + 4], &900u32.to_be_bytes());
    }
}
