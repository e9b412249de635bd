//! User info blocks.
//!
//! Presence-carrying SNACs embed a variable-length user info block:
//!
//! ```text
//! +--------+----------------+------------------+---------------+
//! | u8 len | screen name    | u16 warn level   | u16 tlv count |
//! +--------+----------------+------------------+---------------+
//! | exactly `tlv count` TLVs                                   |
//! +------------------------------------------------------------+
//! ```
//!
//! Unlike a bare TLV chain the block is bounded by a count, not a length,
//! so the parser reports how many bytes it consumed; callers with several
//! back-to-back blocks (chat occupant lists) resume from there. One wire
//! quirk: servers pad with zero-length type-0x0000 entries that do not
//! count against the TLV count.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::caps::{blocks_to_caps, caps_to_blocks, Capabilities};
use crate::cursor::Reader;
use crate::error::WireError;

/// User info TLV: class flags (u16).
const INFO_CLASS: u16 = 0x0001;
/// User info TLV: account creation time (u32 unix).
const INFO_MEMBER_SINCE: u16 = 0x0002;
/// User info TLV: session start time (u32 unix).
const INFO_ONLINE_SINCE: u16 = 0x0003;
/// User info TLV: idle time (u16 minutes).
const INFO_IDLE: u16 = 0x0004;
/// User info TLV: capability blocks.
const INFO_CAPABILITIES: u16 = 0x000d;
/// User info TLV: session length (u32 seconds).
const INFO_SESSION_LEN: u16 = 0x000f;

bitflags! {
    /// Account class bits carried in TLV 0x0001.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UserClass: u16 {
        /// Unconfirmed account
        const UNCONFIRMED = 0x0001;
        /// AOL staff
        const ADMINISTRATOR = 0x0002;
        /// AOL member account
        const AOL = 0x0004;
        /// Commercial account
        const COMMERCIAL = 0x0008;
        /// Free account
        const FREE = 0x0010;
        /// Away flag set
        const AWAY = 0x0020;
    }
}

/// Decoded user info block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// Screen name
    pub screen_name: String,
    /// Warning level, in hundredths of a percent
    pub warn_level: u16,
    /// Account class flags
    pub class: UserClass,
    /// Account creation time (unix), zero when absent
    pub member_since: u32,
    /// Session start time (unix), zero when absent
    pub online_since: u32,
    /// Idle time in minutes, zero when absent
    pub idle_minutes: u16,
    /// Session length in seconds, zero when absent
    pub session_len: u32,
    /// Advertised capabilities
    pub capabilities: Capabilities,
}

impl UserInfo {
    /// Parse one block from the front of `buf`, returning it together with
    /// the number of bytes consumed.
    pub fn parse(buf: &[u8]) -> Result<(UserInfo, usize), WireError> {
        let mut r = Reader::new(buf);
        let name_len = r.u8()? as usize;
        let name = r.bytes(name_len)?;
        let mut info = UserInfo {
            screen_name: String::from_utf8_lossy(name).into_owned(),
            warn_level: r.u16()?,
            ..UserInfo::default()
        };
        let tlv_count = r.u16()?;
        let mut seen = 0u16;
        while seen < tlv_count {
            let typ = r.u16()?;
            let len = r.u16()? as usize;
            if typ == 0x0000 && len == 0 {
                // Alignment padding, does not count against tlv_count.
                continue;
            }
            let value = r.bytes(len)?;
            let mut v = Reader::new(value);
            match typ {
                INFO_CLASS => info.class = UserClass::from_bits_retain(v.u16()?),
                INFO_MEMBER_SINCE => info.member_since = v.u32()?,
                INFO_ONLINE_SINCE => info.online_since = v.u32()?,
                INFO_IDLE => info.idle_minutes = v.u16()?,
                INFO_CAPABILITIES => info.capabilities = blocks_to_caps(value),
                INFO_SESSION_LEN => info.session_len = v.u32()?,
                other => warn!(typ = other, len, "unknown user info tlv"),
            }
            seen += 1;
        }
        Ok((info, r.position()))
    }

    /// Parse back-to-back blocks until `buf` is exhausted.
    pub fn parse_list(buf: &[u8]) -> Result<Vec<UserInfo>, WireError> {
        let mut out = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            let (info, used) = UserInfo::parse(rest)?;
            out.push(info);
            rest = &rest[used..];
        }
        Ok(out)
    }

    /// Serialize the block in canonical TLV order: class, member-since,
    /// online-since, idle, capabilities, session length.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let name = self.screen_name.as_bytes();
        if name.len() > u8::MAX as usize {
            return Err(WireError::NameTooLong(name.len()));
        }
        let caps = caps_to_blocks(self.capabilities);
        let tlv_count: u16 = if caps.is_empty() { 5 } else { 6 };

        let mut buf = BytesMut::with_capacity(5 + name.len() + 22 * 6 + caps.len());
        buf.put_u8(name.len() as u8);
        buf.put_slice(name);
        buf.put_u16(self.warn_level);
        buf.put_u16(tlv_count);

        buf.put_u16(INFO_CLASS);
        buf.put_u16(2);
        buf.put_u16(self.class.bits());
        buf.put_u16(INFO_MEMBER_SINCE);
        buf.put_u16(4);
        buf.put_u32(self.member_since);
        buf.put_u16(INFO_ONLINE_SINCE);
        buf.put_u16(4);
        buf.put_u32(self.online_since);
        buf.put_u16(INFO_IDLE);
        buf.put_u16(2);
        buf.put_u16(self.idle_minutes);
        if !caps.is_empty() {
            buf.put_u16(INFO_CAPABILITIES);
            buf.put_u16(caps.len() as u16);
            buf.put_slice(&caps);
        }
        buf.put_u16(INFO_SESSION_LEN);
        buf.put_u16(4);
        buf.put_u32(self.session_len);
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UserInfo {
        UserInfo {
            screen_name: "testuser".into(),
            warn_level: 30,
            class: UserClass::FREE,
            member_since: 0x3000_0000,
            online_since: 0x3800_0000,
            idle_minutes: 7,
            session_len: 5400,
            capabilities: Capabilities::CHAT | Capabilities::SEND_FILE,
        }
    }

    #[test]
    fn test_roundtrip_consumes_everything() {
        let info = sample();
        let wire = info.encode().unwrap();
        let (parsed, used) = UserInfo::parse(&wire).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(used, wire.len());
    }

    #[test]
    fn test_zero_length_padding_skipped() {
        let mut wire = BytesMut::new();
        wire.put_u8(2);
        wire.put_slice(b"ab");
        wire.put_u16(0);
        wire.put_u16(1); // one real tlv
        wire.put_u16(0x0000); // padding entry
        wire.put_u16(0x0000);
        wire.put_u16(0x0004); // idle
        wire.put_u16(0x0002);
        wire.put_u16(42);
        wire.put_u8(0xEE); // trailing byte that must not be consumed

        let (info, used) = UserInfo::parse(&wire).unwrap();
        assert_eq!(info.screen_name, "ab");
        assert_eq!(info.idle_minutes, 42);
        assert_eq!(used, wire.len() - 1);
    }

    #[test]
    fn test_unknown_tlv_counts_and_skips() {
        let mut wire = BytesMut::new();
        wire.put_u8(1);
        wire.put_u8(b'x');
        wire.put_u16(0);
        wire.put_u16(2);
        wire.put_u16(0x00ff); // not a known info tlv
        wire.put_u16(0x0003);
        wire.put_slice(&[1, 2, 3]);
        wire.put_u16(0x0004);
        wire.put_u16(0x0002);
        wire.put_u16(9);

        let (info, used) = UserInfo::parse(&wire).unwrap();
        assert_eq!(info.idle_minutes, 9);
        assert_eq!(used, wire.len());
    }

    #[test]
    fn test_truncated_block_errors() {
        let wire = sample().encode().unwrap();
        assert!(UserInfo::parse(&wire[..wire.len() - 3]).is_err());
    }

    #[test]
    fn test_parse_list_back_to_back() {
        let mut wire = BytesMut::new();
        for name in ["one", "two", "three"] {
            let info = UserInfo {
                screen_name: name.into(),
                ..UserInfo::default()
            };
            wire.put_slice(&info.encode().unwrap());
        }
        let list = UserInfo::parse_list(&wire).unwrap();
        let names: Vec<_> = list.iter().map(|u| u.screen_name.as_str()).collect();
        assert_eq!(names, ["one", "two", "three"]);
    }
}
