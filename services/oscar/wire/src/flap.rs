//! FLAP framing layer.
//!
//! Every byte on an OSCAR service connection travels inside a FLAP frame:
//!
//! ```text
//! +--------+---------+-------------+-------------+
//! | 0x2A   | channel | u16 seq     | u16 len     |
//! | marker | u8      | big-endian  | big-endian  |
//! +--------+---------+-------------+-------------+
//! | payload (len bytes)                          |
//! +----------------------------------------------+
//! ```
//!
//! The marker byte is the only resynchronization aid the protocol has; if it
//! is ever wrong the stream is unrecoverable and the connection must die.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Size of the fixed FLAP header in bytes.
pub const FLAP_HEADER_SIZE: usize = 6;

/// FLAP start-of-frame marker.
pub const FLAP_MARKER: u8 = 0x2A;

/// Largest payload the u16 length field can carry.
pub const MAX_FLAP_PAYLOAD: usize = u16::MAX as usize;

/// FLAP channel numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Connection negotiation
    Login = 0x01,
    /// SNAC data
    Data = 0x02,
    /// FLAP-level error
    Error = 0x03,
    /// Connection close negotiation
    Close = 0x04,
    /// Keepalive
    Keepalive = 0x05,
}

impl TryFrom<u8> for Channel {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Channel::Login),
            0x02 => Ok(Channel::Data),
            0x03 => Ok(Channel::Error),
            0x04 => Ok(Channel::Close),
            0x05 => Ok(Channel::Keepalive),
            other => Err(WireError::Channel(other)),
        }
    }
}

/// Decoded FLAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlapHeader {
    /// Frame channel
    pub channel: Channel,
    /// Per-connection sequence number
    pub seq: u16,
    /// Payload length in bytes
    pub len: u16,
}

impl FlapHeader {
    /// Encode the 6-byte header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FLAP_HEADER_SIZE);
        buf.put_u8(FLAP_MARKER);
        buf.put_u8(self.channel as u8);
        buf.put_u16(self.seq);
        buf.put_u16(self.len);
    }

    /// Decode a header from exactly [`FLAP_HEADER_SIZE`] bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FLAP_HEADER_SIZE {
            return Err(WireError::Truncated(buf.len()));
        }
        if buf[0] != FLAP_MARKER {
            return Err(WireError::BadMarker(buf[0]));
        }
        Ok(FlapHeader {
            channel: Channel::try_from(buf[1])?,
            seq: u16::from_be_bytes([buf[2], buf[3]]),
            len: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

/// A complete FLAP frame: header plus owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlapFrame {
    /// Frame header
    pub header: FlapHeader,
    /// Payload bytes (`header.len` of them)
    pub payload: Bytes,
}

impl FlapFrame {
    /// Build a frame around `payload`, leaving the sequence number zero.
    ///
    /// Sequence numbers belong to the transmitting connection and are
    /// stamped at send time, not at construction.
    pub fn new(channel: Channel, payload: Bytes) -> Result<Self, WireError> {
        if payload.len() > MAX_FLAP_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        Ok(FlapFrame {
            header: FlapHeader {
                channel,
                seq: 0,
                len: payload.len() as u16,
            },
            payload,
        })
    }

    /// Serialize header and payload into a single buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(FLAP_HEADER_SIZE + self.payload.len());
        self.header.encode(buf);
        buf.put_slice(&self.payload);
    }
}

/// Incremental FLAP decoder over a growable receive buffer.
///
/// `decode` consumes at most one complete frame per call and returns
/// `Ok(None)` while the buffer holds only a partial frame, so callers can
/// interleave socket reads with frame extraction.
#[derive(Debug, Default)]
pub struct FlapDecoder;

impl FlapDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        FlapDecoder
    }

    /// Try to extract one frame from the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FlapFrame>, WireError> {
        if buf.len() < FLAP_HEADER_SIZE {
            return Ok(None);
        }
        let header = FlapHeader::decode(&buf[..FLAP_HEADER_SIZE])?;
        let total = FLAP_HEADER_SIZE + header.len as usize;
        if buf.len() < total {
            return Ok(None);
        }
        buf.advance(FLAP_HEADER_SIZE);
        let payload = buf.split_to(header.len as usize).freeze();
        Ok(Some(FlapFrame { header, payload }))
    }
}
