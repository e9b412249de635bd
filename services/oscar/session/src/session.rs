//! Session facade.
//!
//! A [`Session`] owns the connection registry, the inbound and outbound
//! queues, and the SNAC dispatcher, and wires the per-frame plumbing
//! between them: FLAP channel 2 payloads go to the dispatcher, channel 4
//! carries the server's close notice, channel 5 is keepalive noise, and
//! channels 1 and 3 are negotiation and FLAP-level errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use oscar_wire::{Channel, TlvChain};

use crate::conn::{ConnData, ConnKind, Connection, Status};
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::rx::{FramePayload, RxQueue};
use crate::tx::{OutboundFrame, SendPolicy, TxQueue};

/// FLAP protocol version sent during channel-1 negotiation.
pub const FLAP_VERSION: u32 = 0x0000_0001;

/// Close-notice TLV: error code.
const TLV_CLOSE_CODE: u16 = 0x0009;
/// Close-notice TLV: human-readable message.
const TLV_CLOSE_MSG: u16 = 0x000b;

/// Knobs a session is built with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// When enqueued frames transmit
    pub policy: SendPolicy,
    /// Forced latency applied to every new connection
    pub forced_latency: Duration,
    /// Age at which an unanswered request is forgotten
    pub request_max_age: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            policy: SendPolicy::Queued,
            forced_latency: Duration::ZERO,
            request_max_age: Duration::from_secs(60),
        }
    }
}

/// One OSCAR session: every connection, queue, and outstanding request.
pub struct Session {
    config: SessionConfig,
    conns: Mutex<Vec<Arc<Connection>>>,
    next_conn_id: AtomicU64,
    /// Inbound queue
    pub rx: RxQueue,
    /// Outbound queue
    pub tx: TxQueue,
    /// SNAC dispatcher
    pub dispatch: Dispatcher,
}

impl Session {
    /// Build a session from `config`.
    pub fn new(config: SessionConfig) -> Self {
        Session {
            tx: TxQueue::new(config.policy),
            rx: RxQueue::new(),
            dispatch: Dispatcher::new(),
            conns: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(0),
            config,
        }
    }

    /// The configuration this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a connection to `dest` and register it. The connection comes
    /// back even when the connect failed; check its status.
    pub async fn open(&self, kind: ConnKind, dest: &str) -> Arc<Connection> {
        let id = self.next_conn_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conn = Arc::new(Connection::connect(id, kind, dest).await);
        if !self.config.forced_latency.is_zero() {
            conn.set_forced_latency(self.config.forced_latency);
        }
        self.conns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&conn));
        conn
    }

    /// Every registered connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.conns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// First usable connection of `kind`; connections still negotiating or
    /// already dead do not count.
    pub fn find_by_kind(&self, kind: ConnKind) -> Option<Arc<Connection>> {
        self.conns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.kind() == kind && c.status() == Status::Ready)
            .cloned()
    }

    /// The chat connection joined to the room called `name`.
    pub fn find_chat_room(&self, name: &str) -> Option<Arc<Connection>> {
        self.conns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| {
                c.kind() == ConnKind::Chat
                    && matches!(c.data(), ConnData::ChatRoom { name: ref n, .. } if n == name)
            })
            .cloned()
    }

    /// Tear a connection down: purge its queued traffic both ways, shut the
    /// socket, and drop it from the registry.
    pub async fn close(&self, conn: &Arc<Connection>) {
        info!(conn = conn.id(), kind = ?conn.kind(), "closing connection");
        self.tx.purge_for_connection(conn.id());
        self.rx.cleanup_for_connection(conn.id());
        conn.shutdown().await;
        self.conns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|c| c.id() != conn.id());
    }

    /// Run FLAP channel-1 negotiation: send the protocol version and mark
    /// the connection ready.
    pub async fn negotiate(&self, conn: &Arc<Connection>) -> Result<(), SessionError> {
        self.tx
            .enqueue(
                conn,
                OutboundFrame::Flap {
                    channel: Channel::Login,
                    payload: Bytes::copy_from_slice(&FLAP_VERSION.to_be_bytes()),
                },
            )
            .await?;
        self.tx.flush().await;
        if conn.status().is_terminal() {
            return Err(SessionError::ConnectionDead(conn.id()));
        }
        conn.mark_ready();
        Ok(())
    }

    /// Empty keepalive frame on channel 5.
    pub async fn send_keepalive(&self, conn: &Arc<Connection>) -> Result<(), SessionError> {
        self.tx
            .enqueue(
                conn,
                OutboundFrame::Flap {
                    channel: Channel::Keepalive,
                    payload: Bytes::new(),
                },
            )
            .await
    }

    /// Drain everything currently readable on `conn` into the inbound
    /// queue. Returns how many frames arrived.
    pub async fn pump(&self, conn: &Arc<Connection>) -> Result<usize, SessionError> {
        let mut n = 0usize;
        while self.rx.read_one(conn).await?.is_some() {
            n += 1;
        }
        Ok(n)
    }

    /// Walk the inbound queue, route every unhandled frame, and collect the
    /// handled ones. Returns how many frames were routed.
    pub async fn dispatch_pending(&self) -> usize {
        let pending = self.rx.unhandled();
        let n = pending.len();
        for (id, conn, payload) in pending {
            match payload {
                FramePayload::Flap(frame) => match frame.header.channel {
                    Channel::Data => {
                        if let Err(e) = self.dispatch.on_frame(Arc::clone(&conn), frame.payload) {
                            warn!(conn = conn.id(), error = %e, "dropping undecodable snac");
                        }
                    }
                    Channel::Close => {
                        self.handle_close_notice(&conn, &frame.payload).await;
                    }
                    Channel::Keepalive => debug!(conn = conn.id(), "keepalive"),
                    Channel::Login => debug!(conn = conn.id(), "negotiation frame"),
                    Channel::Error => {
                        warn!(conn = conn.id(), len = frame.payload.len(), "flap-level error frame")
                    }
                },
                FramePayload::Rendezvous(frame) => {
                    debug!(conn = conn.id(), frame_type = frame.frame_type, "rendezvous frame queued for transfer layer");
                }
            }
            self.rx.mark_handled(id);
        }
        self.rx.purge_handled();
        n
    }

    /// Channel-4 payload is a bare TLV chain explaining why the server is
    /// hanging up.
    async fn handle_close_notice(&self, conn: &Arc<Connection>, payload: &[u8]) {
        let chain = TlvChain::parse(payload);
        let code = chain.get_u16(TLV_CLOSE_CODE);
        let msg = chain.get_str(TLV_CLOSE_MSG);
        warn!(conn = conn.id(), code = ?code, msg = ?msg, "server closed the connection");
        self.close(conn).await;
    }

    /// Forget unanswered requests older than the configured age.
    pub fn reap_stale(&self) -> usize {
        self.dispatch.reap_stale(self.config.request_max_age)
    }
}
