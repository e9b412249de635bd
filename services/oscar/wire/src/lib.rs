//! Wire codecs for the OSCAR instant-messaging protocol.
//!
//! This crate holds everything that turns bytes into structures and back:
//! FLAP framing, the SNAC command header, the TLV codec, capability blocks,
//! user-info blocks, and peer-direct (rendezvous) framing. It performs no
//! I/O; sockets and queues live in `oscar-session`.
//!
//! ## Features
//!
//! - **Truncation-Safe Parsing**: every decoder walks a bounds-checked
//!   cursor and degrades to a prefix or an error, never an overread
//! - **Zero-Copy I/O**: uses `Bytes`/`BytesMut` for minimal allocations
//! - **Incremental Decoding**: framers return `Ok(None)` on short input so
//!   callers can interleave socket reads with frame extraction
//! - **Quirk Compatible**: honors the wire oddities deployed peers rely on
//!
//! ## Wire Format
//!
//! ```text
//! +--------+---------+---------+---------+
//! | 0x2A   | channel | u16 seq | u16 len |   FLAP, every frame
//! +--------+---------+---------+---------+
//! | u16 family | u16 subtype | u16 flags | u32 request id |   SNAC, ch. 2
//! +------------------------------------------------------+
//! | u16 type | u16 len | value ...                       |   TLVs, nested
//! +------------------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod caps;
pub mod cursor;
pub mod error;
pub mod flap;
pub mod rendezvous;
pub mod snac;
pub mod tlv;
pub mod userinfo;

// Re-export main types
pub use caps::{blocks_to_caps, caps_to_blocks, Capabilities, CAPABILITY_BLOCKS};
pub use cursor::Reader;
pub use error::WireError;
pub use flap::{
    Channel, FlapDecoder, FlapFrame, FlapHeader, FLAP_HEADER_SIZE, FLAP_MARKER, MAX_FLAP_PAYLOAD,
};
pub use rendezvous::{
    RendezvousDecoder, RendezvousFrame, RENDEZVOUS_MAGIC, RENDEZVOUS_PREFIX_SIZE,
};
pub use snac::{
    SnacHeader, SnacKind, FAMILY_BUDDY, FAMILY_CHAT, FAMILY_CHATNAV, FAMILY_GENERIC,
    FAMILY_LOCATION, FAMILY_MESSAGING, SNAC_HEADER_SIZE,
};
pub use tlv::{Tlv, TlvChain, TLV_TYPE_CLAMPED};
pub use userinfo::{UserClass, UserInfo};
