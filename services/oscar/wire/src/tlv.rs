//! TLV codec.
//!
//! Nearly every variable-length OSCAR structure is a chain of TLVs:
//!
//! ```text
//! +-------------+-------------+------------------+
//! | u16 type    | u16 length  | value (length B) |
//! +-------------+-------------+------------------+  repeated
//! ```
//!
//! Parsing is truncation-safe: a chain cut off mid-entry yields the
//! fully-contained prefix and never reads past the buffer. One wire quirk is
//! honored on read: some AOL servers emit type `0x0013` with a bogus
//! declared length, but peers interoperate by always treating it as two
//! bytes, so the cursor advances by 2 regardless of what the length field
//! says.

use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use tracing::warn;

use crate::caps::{caps_to_blocks, Capabilities};
use crate::error::WireError;

/// The TLV type whose declared length is ignored on read.
pub const TLV_TYPE_CLAMPED: u16 = 0x0013;

/// A single type-length-value entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Type tag
    pub typ: u16,
    /// Raw value bytes
    pub value: Bytes,
}

impl Tlv {
    /// Serialized size of this entry.
    pub fn wire_len(&self) -> usize {
        4 + self.value.len()
    }

    /// Value as a big-endian u8, if exactly one byte.
    pub fn as_u8(&self) -> Option<u8> {
        (self.value.len() == 1).then(|| self.value[0])
    }

    /// Value as a big-endian u16, if exactly two bytes.
    pub fn as_u16(&self) -> Option<u16> {
        (self.value.len() == 2).then(|| u16::from_be_bytes([self.value[0], self.value[1]]))
    }

    /// Value as a big-endian u32, if exactly four bytes.
    pub fn as_u32(&self) -> Option<u32> {
        (self.value.len() == 4).then(|| {
            u32::from_be_bytes([self.value[0], self.value[1], self.value[2], self.value[3]])
        })
    }

    /// Value as UTF-8 text, lossily converted.
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// An ordered chain of TLV entries.
///
/// Order is always preserved: entries parse in wire order, appends go to the
/// tail, and serialization replays insertion order byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlvChain {
    entries: SmallVec<[Tlv; 8]>,
}

impl TlvChain {
    /// Empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a chain from `buf`, stopping at the first entry that is not
    /// fully contained. Never fails; a short or empty buffer just yields a
    /// shorter chain.
    pub fn parse(buf: &[u8]) -> Self {
        let mut entries = SmallVec::new();
        let mut pos = 0usize;
        while buf.len() - pos >= 4 {
            let typ = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let declared = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
            pos += 4;
            let length = if typ == TLV_TYPE_CLAMPED && declared != 2 {
                warn!(declared, "clamping type-0x0013 tlv length to 2");
                2
            } else {
                declared
            };
            if buf.len() - pos < length {
                // Partial trailing entry, return what is whole.
                break;
            }
            entries.push(Tlv {
                typ,
                value: Bytes::copy_from_slice(&buf[pos..pos + length]),
            });
            pos += length;
        }
        TlvChain { entries }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the chain holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &Tlv> {
        self.entries.iter()
    }

    /// Append a raw entry at the tail.
    pub fn append(&mut self, typ: u16, value: Bytes) {
        self.entries.push(Tlv { typ, value });
    }

    /// Append an entry with no value.
    pub fn append_empty(&mut self, typ: u16) {
        self.append(typ, Bytes::new());
    }

    /// Append a big-endian u8 entry.
    pub fn append_u8(&mut self, typ: u16, value: u8) {
        self.append(typ, Bytes::copy_from_slice(&[value]));
    }

    /// Append a big-endian u16 entry.
    pub fn append_u16(&mut self, typ: u16, value: u16) {
        self.append(typ, Bytes::copy_from_slice(&value.to_be_bytes()));
    }

    /// Append a big-endian u32 entry.
    pub fn append_u32(&mut self, typ: u16, value: u32) {
        self.append(typ, Bytes::copy_from_slice(&value.to_be_bytes()));
    }

    /// Append a text entry.
    pub fn append_str(&mut self, typ: u16, value: &str) {
        self.append(typ, Bytes::copy_from_slice(value.as_bytes()));
    }

    /// Append a capability-block entry built from `caps`.
    pub fn append_capabilities(&mut self, typ: u16, caps: Capabilities) {
        self.append(typ, caps_to_blocks(caps));
    }

    /// The `n`th entry of type `typ`, counting from 1 in chain order.
    pub fn get_nth(&self, typ: u16, n: usize) -> Option<&Tlv> {
        self.entries.iter().filter(|t| t.typ == typ).nth(n.checked_sub(1)?)
    }

    /// First entry of type `typ`.
    pub fn get(&self, typ: u16) -> Option<&Tlv> {
        self.get_nth(typ, 1)
    }

    /// First entry of type `typ` as a u8.
    pub fn get_u8(&self, typ: u16) -> Option<u8> {
        self.get(typ).and_then(Tlv::as_u8)
    }

    /// First entry of type `typ` as a u16.
    pub fn get_u16(&self, typ: u16) -> Option<u16> {
        self.get(typ).and_then(Tlv::as_u16)
    }

    /// First entry of type `typ` as a u32.
    pub fn get_u32(&self, typ: u16) -> Option<u32> {
        self.get(typ).and_then(Tlv::as_u32)
    }

    /// First entry of type `typ` as text.
    pub fn get_str(&self, typ: u16) -> Option<String> {
        self.get(typ).map(Tlv::as_str)
    }

    /// Serialized size of the whole chain.
    pub fn wire_len(&self) -> usize {
        self.entries.iter().map(Tlv::wire_len).sum()
    }

    /// Serialize every entry into `buf`, bounded by `capacity`.
    ///
    /// All or nothing: if the chain does not fit, `buf` is left exactly as
    /// it was and an error comes back. On success returns the number of
    /// bytes written.
    pub fn write_to(&self, buf: &mut BytesMut, capacity: usize) -> Result<usize, WireError> {
        let need = self.wire_len();
        if need > capacity {
            return Err(WireError::ChainTooLarge { need, capacity });
        }
        buf.reserve(need);
        for tlv in &self.entries {
            buf.put_u16(tlv.typ);
            buf.put_u16(tlv.value.len() as u16);
            buf.put_slice(&tlv.value);
        }
        Ok(need)
    }

    /// Serialize into a fresh buffer with no capacity bound.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        for tlv in &self.entries {
            buf.put_u16(tlv.typ);
            buf.put_u16(tlv.value.len() as u16);
            buf.put_slice(&tlv.value);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chain() -> TlvChain {
        let mut chain = TlvChain::new();
        chain.append_u16(0x0001, 0x0010);
        chain.append_str(0x006a, "lobby");
        chain.append_u32(0x00ca, 0x5005_0000);
        chain
    }

    #[test]
    fn test_parse_roundtrip_preserves_order() {
        let chain = sample_chain();
        let wire = chain.to_bytes();
        let parsed = TlvChain::parse(&wire);
        assert_eq!(parsed, chain);
        assert_eq!(parsed.to_bytes(), wire);
    }

    #[test]
    fn test_truncation_returns_whole_prefix() {
        let chain = sample_chain();
        let wire = chain.to_bytes();
        // Drop one byte off the final entry's value.
        let parsed = TlvChain::parse(&wire[..wire.len() - 1]);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get_u16(0x0001), Some(0x0010));
        assert_eq!(parsed.get_str(0x006a).as_deref(), Some("lobby"));
        // Cutting inside a header yields the same prefix.
        let parsed = TlvChain::parse(&wire[..wire.len() - 7]);
        assert_eq!(parsed.len(), 2);
        assert!(TlvChain::parse(&[]).is_empty());
    }

    #[test]
    fn test_type_0x0013_length_clamped() {
        let mut wire = BytesMut::new();
        wire.put_u16(0x0013);
        wire.put_u16(0x0400); // lies about its length
        wire.put_slice(&[0xAA, 0xBB]);
        wire.put_u16(0x0001);
        wire.put_u16(0x0001);
        wire.put_u8(0x77);

        let parsed = TlvChain::parse(&wire);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get_u16(0x0013), Some(0xAABB));
        // Cursor advanced exactly 2, so the next entry still parses.
        assert_eq!(parsed.get_u8(0x0001), Some(0x77));
    }

    #[test]
    fn test_get_nth_is_one_based() {
        let mut chain = TlvChain::new();
        chain.append_u16(0x0003, 1);
        chain.append_u16(0x0009, 9);
        chain.append_u16(0x0003, 2);
        assert_eq!(chain.get_nth(0x0003, 1).unwrap().as_u16(), Some(1));
        assert_eq!(chain.get_nth(0x0003, 2).unwrap().as_u16(), Some(2));
        assert!(chain.get_nth(0x0003, 3).is_none());
        assert!(chain.get_nth(0x0003, 0).is_none());
    }

    #[test]
    fn test_write_to_overflow_leaves_buffer_unmodified() {
        let mut chain = TlvChain::new();
        chain.append(0x0042, Bytes::from_static(&[0u8; 8])); // 12 bytes on the wire
        let mut buf = BytesMut::new();
        buf.put_slice(b"stamp");
        let before = buf.clone();
        match chain.write_to(&mut buf, 10) {
            Err(WireError::ChainTooLarge { need, capacity }) => {
                assert_eq!(need, 12);
                assert_eq!(capacity, 10);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(buf, before);
        // The same chain fits a capacity of 12 exactly.
        assert_eq!(chain.write_to(&mut buf, 12).unwrap(), 12);
    }

    #[test]
    fn test_empty_value_tlv() {
        let mut chain = TlvChain::new();
        chain.append_empty(0x000b);
        let wire = chain.to_bytes();
        assert_eq!(&wire[..], &[0x00, 0x0b, 0x00, 0x00]);
        let parsed = TlvChain::parse(&wire);
        assert_eq!(parsed.get(0x000b).unwrap().value.len(), 0);
    }
}
