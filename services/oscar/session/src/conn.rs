//! Connection lifecycle and per-connection state.
//!
//! An OSCAR session talks to several hosts at once: the authorizer, the main
//! service host, the chat navigator, and one socket per joined chat room or
//! active file transfer. Each [`Connection`] owns its socket halves, its
//! transmit sequence counter, and whatever role-private data the connection
//! kind carries.
//!
//! The state machine is one-way: `Offline -> Connecting -> Ready` and from
//! any of those into `Error` or `Closed`. The terminal states are permanent;
//! a dead connection is replaced by opening a new one, never revived.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use oscar_wire::{FlapDecoder, RendezvousDecoder};

use crate::error::SessionError;

/// What a connection is for, with its conventional destination port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnKind {
    /// Authorizer host
    Auth,
    /// Main (BOS) service host
    Service,
    /// Chat navigation service
    ChatNav,
    /// A single chat room
    Chat,
    /// Peer-direct transfer or direct IM
    Rendezvous,
    /// Listening socket awaiting a peer-direct caller
    Listener,
}

impl ConnKind {
    /// Port used when the destination string does not carry one.
    pub fn default_port(&self) -> u16 {
        match self {
            ConnKind::Rendezvous | ConnKind::Listener => 4443,
            _ => 5190,
        }
    }

    /// True for connections framed with the peer-direct header.
    pub fn is_rendezvous(&self) -> bool {
        matches!(self, ConnKind::Rendezvous | ConnKind::Listener)
    }
}

/// Connection lifecycle states.
///
/// A successful `connect()` lands in [`Status::Connecting`]; `Ready` is
/// granted by the negotiation step (`Session::negotiate`), not by the
/// socket opening. Frames enqueued before that always queue, regardless
/// of send policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not yet connected
    Offline,
    /// Socket up, service negotiation not finished
    Connecting,
    /// Fully usable
    Ready,
    /// Died from a transport or framing failure
    Error,
    /// Shut down deliberately
    Closed,
}

impl Status {
    /// Error and Closed are permanent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Error | Status::Closed)
    }
}

/// Role-private data attached to a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnData {
    /// Nothing attached
    #[default]
    None,
    /// Chat connections remember which room they are
    ChatRoom {
        /// Room name
        name: String,
        /// Exchange number
        exchange: u16,
        /// Room instance
        instance: u16,
    },
    /// Transfer state outlives the socket that carried it
    Transfer {
        /// Rendezvous cookie agreed over the server connection
        cookie: [u8; 8],
        /// File being moved, when known
        filename: Option<String>,
    },
}

pub(crate) struct ReadState {
    pub(crate) half: OwnedReadHalf,
    pub(crate) buf: BytesMut,
    pub(crate) flap: FlapDecoder,
    pub(crate) rendezvous: RendezvousDecoder,
}

struct Shared {
    status: Status,
    forced_latency: Duration,
    last_send: Instant,
    data: ConnData,
}

/// One socket to one host, plus everything private to it.
pub struct Connection {
    id: u64,
    kind: ConnKind,
    dest: String,
    shared: Mutex<Shared>,
    seq: AtomicU16,
    pub(crate) reader: tokio::sync::Mutex<Option<ReadState>>,
    pub(crate) writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("dest", &self.dest)
            .field("status", &self.status())
            .finish()
    }
}

/// Split `host[:port]`, falling back to `default_port`.
pub(crate) fn parse_dest(dest: &str, default_port: u16) -> (String, u16) {
    if let Some((host, port)) = dest.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (host.to_string(), port);
        }
    }
    (dest.to_string(), default_port)
}

impl Connection {
    /// Connect to `dest` (`host[:port]`; a port suffix overrides the kind's
    /// default). Always returns a connection: resolution or connect failure
    /// yields one already in `Status::Error` so the caller can inspect and
    /// register it uniformly.
    pub async fn connect(id: u64, kind: ConnKind, dest: &str) -> Connection {
        let (host, port) = parse_dest(dest, kind.default_port());
        let conn = Connection {
            id,
            kind,
            dest: format!("{host}:{port}"),
            shared: Mutex::new(Shared {
                status: Status::Offline,
                forced_latency: Duration::ZERO,
                last_send: Instant::now(),
                data: ConnData::None,
            }),
            seq: AtomicU16::new(0),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        };
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let (rd, wr) = stream.into_split();
                *conn.reader.lock().await = Some(ReadState {
                    half: rd,
                    buf: BytesMut::with_capacity(8 * 1024),
                    flap: FlapDecoder::new(),
                    rendezvous: RendezvousDecoder::new(),
                });
                *conn.writer.lock().await = Some(wr);
                conn.set_status(Status::Connecting);
                debug!(conn = id, ?kind, dest = %conn.dest, "connected");
            }
            Err(e) => {
                error!(conn = id, ?kind, dest = %conn.dest, error = %e, "connect failed");
                conn.set_status(Status::Error);
            }
        }
        conn
    }

    /// Connection id, unique within the session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What this connection is for.
    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    /// Resolved `host:port` string.
    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Status {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Move to `status`. Transitions out of a terminal state are refused.
    pub fn set_status(&self, status: Status) {
        let mut s = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if s.status.is_terminal() && status != s.status {
            warn!(conn = self.id, from = ?s.status, to = ?status, "refusing transition out of terminal state");
            return;
        }
        s.status = status;
    }

    /// Mark service negotiation complete.
    pub fn mark_ready(&self) {
        self.set_status(Status::Ready);
    }

    /// Minimum spacing enforced between transmissions on this connection.
    /// Setting it also restarts the pacing window.
    pub fn set_forced_latency(&self, latency: Duration) {
        let mut s = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        s.forced_latency = latency;
        s.last_send = Instant::now();
    }

    /// Current forced latency.
    pub fn forced_latency(&self) -> Duration {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .forced_latency
    }

    /// How long until the pacing window allows another send. Zero when the
    /// window is already open.
    pub fn pacing_delay(&self) -> Duration {
        let s = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        s.forced_latency
            .checked_sub(s.last_send.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    pub(crate) fn note_send(&self) {
        let mut s = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        s.last_send = Instant::now();
    }

    /// Next transmit sequence number. Only the transmitter calls this, at
    /// the moment the frame actually goes out.
    pub(crate) fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Attach role-private data.
    pub fn set_data(&self, data: ConnData) {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).data = data;
    }

    /// Clone of the role-private data.
    pub fn data(&self) -> ConnData {
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .data
            .clone()
    }

    /// Write `bufs` back to back on the socket. Holding the writer lock for
    /// the whole call is what keeps frames from interleaving.
    pub(crate) async fn write_all(&self, bufs: &[Bytes]) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let wr = guard.as_mut().ok_or(SessionError::NotConnected(self.id))?;
        for buf in bufs {
            wr.write_all(buf).await?;
        }
        Ok(())
    }

    /// Kill the connection after a transport or framing failure.
    pub(crate) async fn kill(&self) {
        self.set_status(Status::Error);
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
    }

    /// Deliberate shutdown. Resets the sequence counter and clears role
    /// data, except transfer state, which survives for resumption.
    pub(crate) async fn shutdown(&self) {
        self.set_status(Status::Closed);
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
        self.seq.store(0, Ordering::SeqCst);
        let mut s = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(s.data, ConnData::Transfer { .. }) {
            s.data = ConnData::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dest_port_suffix() {
        assert_eq!(parse_dest("chat.example.net", 5190), ("chat.example.net".into(), 5190));
        assert_eq!(parse_dest("chat.example.net:9898", 5190), ("chat.example.net".into(), 9898));
        // A non-numeric suffix is part of the host.
        assert_eq!(parse_dest("weird:host", 5190), ("weird:host".into(), 5190));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(ConnKind::Auth.default_port(), 5190);
        assert_eq!(ConnKind::ChatNav.default_port(), 5190);
        assert_eq!(ConnKind::Rendezvous.default_port(), 4443);
    }

    #[tokio::test]
    async fn test_connect_failure_yields_error_status() {
        // Nothing listens on the discard port of localhost in the test env.
        let conn = Connection::connect(1, ConnKind::Service, "127.0.0.1:9").await;
        assert_eq!(conn.status(), Status::Error);
        assert!(conn.writer.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let conn = Connection::connect(2, ConnKind::Service, "127.0.0.1:9").await;
        assert_eq!(conn.status(), Status::Error);
        conn.set_status(Status::Ready);
        assert_eq!(conn.status(), Status::Error);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_transfer_data() {
        let conn = Connection::connect(3, ConnKind::Rendezvous, "127.0.0.1:9").await;
        conn.set_data(ConnData::Transfer {
            cookie: [7; 8],
            filename: Some("notes.txt".into()),
        });
        conn.shutdown().await;
        assert!(matches!(conn.data(), ConnData::Transfer { .. }));

        let conn = Connection::connect(4, ConnKind::Chat, "127.0.0.1:9").await;
        conn.set_data(ConnData::ChatRoom {
            name: "lobby".into(),
            exchange: 4,
            instance: 0,
        });
        conn.shutdown().await;
        assert_eq!(conn.data(), ConnData::None);
    }
}
