//! SNAC command layer.
//!
//! SNACs ride in FLAP channel 2 payloads. Every SNAC starts with a fixed
//! 10-byte header:
//!
//! ```text
//! +-------------+-------------+-------------+------------------+
//! | u16 family  | u16 subtype | u16 flags   | u32 request id   |
//! +-------------+-------------+-------------+------------------+
//! | body (remainder of the FLAP payload)                       |
//! +------------------------------------------------------------+
//! ```
//!
//! All fields big-endian. The request id correlates replies with the
//! request that caused them; servers echo it back unchanged.

use bytes::{BufMut, BytesMut};

use crate::cursor::Reader;
use crate::error::WireError;

/// Size of the fixed SNAC header in bytes.
pub const SNAC_HEADER_SIZE: usize = 10;

/// Generic service controls family.
pub const FAMILY_GENERIC: u16 = 0x0001;
/// Location services family (user info lives here).
pub const FAMILY_LOCATION: u16 = 0x0002;
/// Buddy list family.
pub const FAMILY_BUDDY: u16 = 0x0003;
/// ICBM messaging family.
pub const FAMILY_MESSAGING: u16 = 0x0004;
/// Chat navigation family.
pub const FAMILY_CHATNAV: u16 = 0x000d;
/// Chat room family.
pub const FAMILY_CHAT: u16 = 0x000e;

/// Decoded SNAC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnacHeader {
    /// Service family
    pub family: u16,
    /// Command within the family
    pub subtype: u16,
    /// Flag bits (almost always zero)
    pub flags: u16,
    /// Request correlation id
    pub request_id: u32,
}

impl SnacHeader {
    /// Encode the 10-byte header into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(SNAC_HEADER_SIZE);
        buf.put_u16(self.family);
        buf.put_u16(self.subtype);
        buf.put_u16(self.flags);
        buf.put_u32(self.request_id);
    }

    /// Decode a header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        Ok(SnacHeader {
            family: r.u16()?,
            subtype: r.u16()?,
            flags: r.u16()?,
            request_id: r.u32()?,
        })
    }

    /// The protocol event this (family, subtype) pair names.
    pub fn kind(&self) -> SnacKind {
        SnacKind::from_pair(self.family, self.subtype)
    }
}

/// Known protocol events, by (family, subtype) pair.
///
/// Inbound dispatch matches on this enum rather than nesting per-family
/// switches; anything the engine does not recognize lands in `Unknown` and
/// is logged rather than dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnacKind {
    /// 0x0001/0x0001 server-reported error
    ServiceError,
    /// 0x0001/0x0003 families the host supports
    HostOnline,
    /// 0x0001/0x0005 redirect to another service host
    Redirect,
    /// 0x0001/0x000a rate limit parameter change
    RateChange,
    /// 0x0001/0x0010 warning level notification
    EvilNotify,
    /// 0x0001/0x0013 message of the day
    Motd,
    /// 0x0002/0x0005 user info request
    UserInfoRequest,
    /// 0x0002/0x0006 user info reply
    UserInfo,
    /// 0x0003/0x000b buddy arrived
    Oncoming,
    /// 0x0003/0x000c buddy departed
    Offgoing,
    /// 0x0004/0x0007 incoming instant message
    IncomingIm,
    /// 0x000d/0x0002 chatnav rights request
    ChatNavRightsRequest,
    /// 0x000d/0x0008 chat room creation request
    ChatRoomCreate,
    /// 0x000d/0x0009 chatnav info (rights, exchanges, created rooms)
    ChatNavInfo,
    /// 0x000e/0x0002 room info update
    ChatRoomUpdate,
    /// 0x000e/0x0003 occupant joined
    ChatUserJoin,
    /// 0x000e/0x0004 occupant left
    ChatUserLeave,
    /// 0x000e/0x0006 incoming chat message
    ChatIncomingMsg,
    /// Anything this engine has no name for
    Unknown {
        /// Service family
        family: u16,
        /// Command within the family
        subtype: u16,
    },
}

impl SnacKind {
    /// Map a (family, subtype) pair to its event.
    pub fn from_pair(family: u16, subtype: u16) -> Self {
        match (family, subtype) {
            (FAMILY_GENERIC, 0x0001) => SnacKind::ServiceError,
            (FAMILY_GENERIC, 0x0003) => SnacKind::HostOnline,
            (FAMILY_GENERIC, 0x0005) => SnacKind::Redirect,
            (FAMILY_GENERIC, 0x000a) => SnacKind::RateChange,
            (FAMILY_GENERIC, 0x0010) => SnacKind::EvilNotify,
            (FAMILY_GENERIC, 0x0013) => SnacKind::Motd,
            (FAMILY_LOCATION, 0x0005) => SnacKind::UserInfoRequest,
            (FAMILY_LOCATION, 0x0006) => SnacKind::UserInfo,
            (FAMILY_BUDDY, 0x000b) => SnacKind::Oncoming,
            (FAMILY_BUDDY, 0x000c) => SnacKind::Offgoing,
            (FAMILY_MESSAGING, 0x0007) => SnacKind::IncomingIm,
            (FAMILY_CHATNAV, 0x0002) => SnacKind::ChatNavRightsRequest,
            (FAMILY_CHATNAV, 0x0008) => SnacKind::ChatRoomCreate,
            (FAMILY_CHATNAV, 0x0009) => SnacKind::ChatNavInfo,
            (FAMILY_CHAT, 0x0002) => SnacKind::ChatRoomUpdate,
            (FAMILY_CHAT, 0x0003) => SnacKind::ChatUserJoin,
            (FAMILY_CHAT, 0x0004) => SnacKind::ChatUserLeave,
            (FAMILY_CHAT, 0x0006) => SnacKind::ChatIncomingMsg,
            (family, subtype) => SnacKind::Unknown { family, subtype },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let hdr = SnacHeader {
            family: FAMILY_LOCATION,
            subtype: 0x0006,
            flags: 0,
            request_id: 0x00010001,
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), SNAC_HEADER_SIZE);
        assert_eq!(SnacHeader::decode(&buf).unwrap(), hdr);
    }

    #[test]
    fn test_short_header_truncated() {
        assert!(matches!(
            SnacHeader::decode(&[0x00, 0x01, 0x00]),
            Err(WireError::Truncated(_))
        ));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SnacKind::from_pair(0x0002, 0x0006), SnacKind::UserInfo);
        assert_eq!(SnacKind::from_pair(0x000e, 0x0002), SnacKind::ChatRoomUpdate);
        assert_eq!(
            SnacKind::from_pair(0x00ff, 0x0042),
            SnacKind::Unknown {
                family: 0x00ff,
                subtype: 0x0042
            }
        );
    }
}
