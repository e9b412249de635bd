//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Ran off the end of the buffer
    #[error("truncated at offset {0}")]
    Truncated(usize),

    /// FLAP start marker missing (stream desync)
    #[error("bad start marker {0:#04x}")]
    BadMarker(u8),

    /// Unknown FLAP channel
    #[error("unknown channel {0}")]
    Channel(u8),

    /// Rendezvous magic mismatch
    #[error("bad rendezvous magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// Rendezvous header length out of range
    #[error("rendezvous header length {0} out of range")]
    HeaderLength(u16),

    /// Serialized chain does not fit the destination
    #[error("chain of {need} bytes exceeds capacity {capacity}")]
    ChainTooLarge {
        /// Bytes required
        need: usize,
        /// Bytes available
        capacity: usize,
    },

    /// Frame payload exceeds the FLAP length field
    #[error("payload of {0} bytes exceeds frame limit")]
    PayloadTooLarge(usize),

    /// Screen name longer than the wire allows
    #[error("name of {0} bytes exceeds limit")]
    NameTooLong(usize),

    /// Malformed structure that is not recoverable by skipping
    #[error("malformed {0}")]
    Malformed(&'static str),
}
