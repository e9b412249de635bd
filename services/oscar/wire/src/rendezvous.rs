//! Peer-direct (rendezvous) framing.
//!
//! File transfers and direct IM bypass the servers and speak a different
//! framing on their own TCP connection. There is no marker byte and no
//! sequence number:
//!
//! ```text
//! +------------------+----------------+--------------+
//! | 4-byte magic     | u16 header len | u16 type     |
//! | "OFT2" (ASCII)   | incl. these 8  | big-endian   |
//! +------------------+----------------+--------------+
//! | role-specific header (header len - 8 bytes)      |
//! +--------------------------------------------------+
//! ```
//!
//! Transfer payload follows the header as a raw byte stream and is not part
//! of the frame; the send path writes it separately.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// The magic opening every peer-direct frame.
pub const RENDEZVOUS_MAGIC: [u8; 4] = *b"OFT2";

/// Fixed prefix ahead of the role-specific header.
pub const RENDEZVOUS_PREFIX_SIZE: usize = 8;

/// A peer-direct frame: type plus its role-specific header bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousFrame {
    /// Frame type (prompt, acknowledge, done, ...)
    pub frame_type: u16,
    /// Role-specific header, opaque to the framer
    pub header: Bytes,
}

impl RendezvousFrame {
    /// Total size of the frame on the wire.
    pub fn wire_len(&self) -> usize {
        RENDEZVOUS_PREFIX_SIZE + self.header.len()
    }

    /// Serialize magic, length, type, and role header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        let total = self.wire_len();
        if total > u16::MAX as usize {
            return Err(WireError::HeaderLength(u16::MAX));
        }
        buf.reserve(total);
        buf.put_slice(&RENDEZVOUS_MAGIC);
        buf.put_u16(total as u16);
        buf.put_u16(self.frame_type);
        buf.put_slice(&self.header);
        Ok(())
    }
}

/// Incremental peer-direct decoder, same shape as the FLAP one.
#[derive(Debug, Default)]
pub struct RendezvousDecoder;

impl RendezvousDecoder {
    /// Create a decoder.
    pub fn new() -> Self {
        RendezvousDecoder
    }

    /// Try to extract one frame from the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RendezvousFrame>, WireError> {
        if buf.len() < RENDEZVOUS_PREFIX_SIZE {
            return Ok(None);
        }
        if buf[..4] != RENDEZVOUS_MAGIC {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&buf[..4]);
            return Err(WireError::BadMagic(magic));
        }
        let total = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if total < RENDEZVOUS_PREFIX_SIZE {
            return Err(WireError::HeaderLength(total as u16));
        }
        if buf.len() < total {
            return Ok(None);
        }
        let frame_type = u16::from_be_bytes([buf[6], buf[7]]);
        buf.advance(RENDEZVOUS_PREFIX_SIZE);
        let header = buf.split_to(total - RENDEZVOUS_PREFIX_SIZE).freeze();
        Ok(Some(RendezvousFrame { frame_type, header }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = RendezvousFrame {
            frame_type: 0x0101,
            header: Bytes::from_static(&[0xAB; 24]),
        };
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();
        assert_eq!(wire.len(), 32);
        assert_eq!(&wire[..4], b"OFT2");
        assert_eq!(u16::from_be_bytes([wire[4], wire[5]]), 32);

        let mut dec = RendezvousDecoder::new();
        assert_eq!(dec.decode(&mut wire).unwrap().unwrap(), frame);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_incomplete_header_waits() {
        let frame = RendezvousFrame {
            frame_type: 0x0202,
            header: Bytes::from_static(&[1, 2, 3, 4]),
        };
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        let mut dec = RendezvousDecoder::new();
        assert!(dec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = BytesMut::from(&b"OFT9\x00\x08\x00\x01"[..]);
        let mut dec = RendezvousDecoder::new();
        assert!(matches!(
            dec.decode(&mut buf),
            Err(WireError::BadMagic(m)) if &m == b"OFT9"
        ));
    }

    #[test]
    fn test_undersized_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&RENDEZVOUS_MAGIC);
        buf.put_u16(4); // cannot even cover the prefix
        buf.put_u16(0x0001);
        let mut dec = RendezvousDecoder::new();
        assert!(matches!(
            dec.decode(&mut buf),
            Err(WireError::HeaderLength(4))
        ));
    }
}
