//! Session error types.

use oscar_wire::WireError;
use thiserror::Error;

/// Errors from connection and queue operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Socket-level failure
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or codec failure
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    /// Operation on a connection without a live socket
    #[error("connection {0} not connected")]
    NotConnected(u64),

    /// Connection already in a terminal state
    #[error("connection {0} is dead")]
    ConnectionDead(u64),

    /// Peer closed the stream
    #[error("peer closed connection {0}")]
    PeerClosed(u64),

    /// Inbound frame that cannot be parsed at the command layer
    #[error("malformed inbound frame: {0}")]
    MalformedFrame(&'static str),
}
