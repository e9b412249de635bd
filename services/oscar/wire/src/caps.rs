//! Capability blocks.
//!
//! Clients advertise features as a run of opaque 16-byte blocks inside a
//! user-info TLV. The blocks are compared byte-for-byte against a static
//! table; their internal structure looks GUID-ish but the byte order is a
//! historical accident and must never be reinterpreted numerically.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

bitflags! {
    /// Feature bits a user advertises.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u16 {
        /// Buddy icon transfer
        const BUDDY_ICON = 0x0001;
        /// Voice chat
        const VOICE = 0x0002;
        /// Direct IM with inline images
        const IM_IMAGE = 0x0004;
        /// Chat rooms
        const CHAT = 0x0008;
        /// Remote file browsing
        const GET_FILE = 0x0010;
        /// File transfer
        const SEND_FILE = 0x0020;
        /// At least one block the engine did not recognize
        const UNKNOWN = 0x8000;
    }
}

/// The known capability blocks, in canonical emission order.
pub static CAPABILITY_BLOCKS: &[(Capabilities, [u8; 16])] = &[
    (
        Capabilities::BUDDY_ICON,
        [
            0x09, 0x46, 0x13, 0x46, 0x4c, 0x7f, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
    (
        Capabilities::VOICE,
        [
            0x09, 0x46, 0x13, 0x41, 0x4c, 0x7f, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
    (
        Capabilities::IM_IMAGE,
        [
            0x09, 0x46, 0x13, 0x45, 0x4c, 0x7f, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
    (
        // The odd one out, predating the 0x0946 block family.
        Capabilities::CHAT,
        [
            0x74, 0x8f, 0x24, 0x20, 0x62, 0x87, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
    (
        Capabilities::GET_FILE,
        [
            0x09, 0x46, 0x13, 0x48, 0x4c, 0x7f, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
    (
        Capabilities::SEND_FILE,
        [
            0x09, 0x46, 0x13, 0x43, 0x4c, 0x7f, 0x11, 0xd1, 0x82, 0x22, 0x44, 0x45, 0x53, 0x54,
            0x00, 0x00,
        ],
    ),
];

/// Serialize `caps` as its run of 16-byte blocks, in table order.
///
/// The `UNKNOWN` marker has no block and is silently dropped.
pub fn caps_to_blocks(caps: Capabilities) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 * CAPABILITY_BLOCKS.len());
    for (flag, block) in CAPABILITY_BLOCKS {
        if caps.contains(*flag) {
            buf.put_slice(block);
        }
    }
    buf.freeze()
}

/// Fold a run of 16-byte blocks back into a flag set.
///
/// Unrecognized blocks set `UNKNOWN` and are logged, never an error. A
/// trailing partial block is ignored.
pub fn blocks_to_caps(buf: &[u8]) -> Capabilities {
    let mut caps = Capabilities::empty();
    for block in buf.chunks_exact(16) {
        match CAPABILITY_BLOCKS.iter().find(|(_, b)| b == block) {
            Some((flag, _)) => caps |= *flag,
            None => {
                warn!(block = ?block, "unrecognized capability block");
                caps |= Capabilities::UNKNOWN;
            }
        }
    }
    caps
}
