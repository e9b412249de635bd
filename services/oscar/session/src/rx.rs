//! Inbound frame queue.
//!
//! Frames from every connection land in one session-wide queue, in arrival
//! order, and wait there until the dispatch pass walks them. Entries are
//! addressed by id, never by pointer: a consumer that wants to outlive the
//! purge step calls [`RxQueue::keep`] and receives the frame by value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use oscar_wire::{FlapFrame, RendezvousFrame};

use crate::conn::Connection;
use crate::error::SessionError;

/// Payload of an inbound frame, by framing family.
#[derive(Debug, Clone)]
pub enum FramePayload {
    /// Server-connection FLAP frame
    Flap(FlapFrame),
    /// Peer-direct frame
    Rendezvous(RendezvousFrame),
}

/// One queued inbound frame.
#[derive(Debug)]
pub struct QueuedFrame {
    /// Queue-assigned id
    pub id: u64,
    /// Connection the frame arrived on
    pub conn: Arc<Connection>,
    /// Decoded frame
    pub payload: FramePayload,
    /// Set once a dispatch pass has seen the frame
    pub handled: bool,
}

/// Session-wide inbound queue.
#[derive(Default)]
pub struct RxQueue {
    inner: Mutex<Vec<QueuedFrame>>,
    next_id: AtomicU64,
}

impl RxQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull at most one frame off `conn`'s socket.
    ///
    /// Never blocks: returns the queued frame's id, or `Ok(None)` when the
    /// socket has no complete frame buffered. A framing error or transport
    /// failure is fatal to this connection only; the connection is killed
    /// and its queued frames are marked for collection.
    pub async fn read_one(&self, conn: &Arc<Connection>) -> Result<Option<u64>, SessionError> {
        if conn.status().is_terminal() {
            return Err(SessionError::ConnectionDead(conn.id()));
        }
        let mut guard = conn.reader.lock().await;
        let rs = guard
            .as_mut()
            .ok_or(SessionError::NotConnected(conn.id()))?;
        loop {
            // Drain a buffered frame before touching the socket.
            let decoded = if conn.kind().is_rendezvous() {
                rs.rendezvous.decode(&mut rs.buf).map(|f| f.map(FramePayload::Rendezvous))
            } else {
                rs.flap.decode(&mut rs.buf).map(|f| f.map(FramePayload::Flap))
            };
            match decoded {
                Ok(Some(payload)) => {
                    let id = self.enqueue(Arc::clone(conn), payload);
                    return Ok(Some(id));
                }
                Ok(None) => {}
                Err(e) => {
                    // Stream desync: there is no way to find the next frame.
                    error!(conn = conn.id(), error = %e, "framing failure, killing connection");
                    *guard = None;
                    drop(guard);
                    conn.kill().await;
                    self.cleanup_for_connection(conn.id());
                    return Err(e.into());
                }
            }
            match rs.half.try_read_buf(&mut rs.buf) {
                Ok(0) => {
                    debug!(conn = conn.id(), "peer closed");
                    *guard = None;
                    drop(guard);
                    conn.kill().await;
                    self.cleanup_for_connection(conn.id());
                    return Err(SessionError::PeerClosed(conn.id()));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => {
                    error!(conn = conn.id(), error = %e, "read failure, killing connection");
                    *guard = None;
                    drop(guard);
                    conn.kill().await;
                    self.cleanup_for_connection(conn.id());
                    return Err(e.into());
                }
            }
        }
    }

    /// Append a frame, assigning its id.
    pub fn enqueue(&self, conn: Arc<Connection>, payload: FramePayload) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.push(QueuedFrame {
            id,
            conn,
            payload,
            handled: false,
        });
        id
    }

    /// Snapshot of every unhandled frame, in arrival order.
    pub fn unhandled(&self) -> Vec<(u64, Arc<Connection>, FramePayload)> {
        let q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.iter()
            .filter(|f| !f.handled)
            .map(|f| (f.id, Arc::clone(&f.conn), f.payload.clone()))
            .collect()
    }

    /// Mark one frame handled.
    pub fn mark_handled(&self, id: u64) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = q.iter_mut().find(|f| f.id == id) {
            f.handled = true;
        }
    }

    /// Unlink a frame and hand it to the caller. A kept frame can never be
    /// collected by [`purge_handled`](Self::purge_handled).
    pub fn keep(&self, id: u64) -> Option<QueuedFrame> {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let idx = q.iter().position(|f| f.id == id)?;
        Some(q.remove(idx))
    }

    /// Drop every handled frame. Returns how many were collected.
    pub fn purge_handled(&self) -> usize {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = q.len();
        q.retain(|f| !f.handled);
        before - q.len()
    }

    /// Mark everything a dead connection still has queued as handled, so
    /// the next purge collects it.
    pub fn cleanup_for_connection(&self, conn_id: u64) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut n = 0usize;
        for f in q.iter_mut() {
            if f.conn.id() == conn_id && !f.handled {
                f.handled = true;
                n += 1;
            }
        }
        if n > 0 {
            warn!(conn = conn_id, frames = n, "dropping undispatched frames of dead connection");
        }
    }

    /// Frames currently queued (handled or not).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
