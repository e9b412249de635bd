//! Outbound frame queue.
//!
//! Frames are enqueued unframed and unsequenced; the transmitter stamps the
//! per-connection sequence number at the moment a frame actually hits the
//! socket, under that connection's writer lock. Two consequences fall out of
//! that: sequence numbers are strictly monotonic on each wire no matter how
//! sends interleave across connections, and a frame that never transmits
//! never burns a number.
//!
//! Pacing: each connection can carry a forced latency, a minimum spacing
//! between its transmissions. The flusher sleeps out the remainder of the
//! window before each send.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use oscar_wire::{Channel, FlapHeader, RendezvousFrame, WireError, MAX_FLAP_PAYLOAD};

use crate::conn::{Connection, Status};
use crate::error::SessionError;

/// When enqueued frames go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Sit in the queue until the next flush
    #[default]
    Queued,
    /// Transmit synchronously at enqueue time
    Immediate,
}

/// An outbound frame awaiting its sequence number.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// FLAP frame; sequence filled in at transmit time
    Flap {
        /// FLAP channel
        channel: Channel,
        /// Frame payload
        payload: Bytes,
    },
    /// Peer-direct frame; header and payload go out as two writes
    Rendezvous {
        /// Magic/length/type plus role header
        frame: RendezvousFrame,
        /// Raw transfer bytes following the header
        payload: Bytes,
    },
}

struct PendingFrame {
    id: u64,
    conn: Arc<Connection>,
    frame: OutboundFrame,
    sent: bool,
}

/// Session-wide outbound queue.
pub struct TxQueue {
    inner: Mutex<Vec<PendingFrame>>,
    next_id: AtomicU64,
    policy: SendPolicy,
}

impl TxQueue {
    /// Empty queue with the given send policy.
    pub fn new(policy: SendPolicy) -> Self {
        TxQueue {
            inner: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            policy,
        }
    }

    /// The policy this queue was built with.
    pub fn policy(&self) -> SendPolicy {
        self.policy
    }

    /// Hand a frame to the queue.
    ///
    /// Under [`SendPolicy::Immediate`] the frame transmits before this call
    /// returns, unless its connection is still negotiating; nothing may cut
    /// in line during a handshake, so those frames queue regardless.
    pub async fn enqueue(
        &self,
        conn: &Arc<Connection>,
        frame: OutboundFrame,
    ) -> Result<(), SessionError> {
        if conn.status().is_terminal() {
            return Err(SessionError::ConnectionDead(conn.id()));
        }
        if let OutboundFrame::Flap { payload, .. } = &frame {
            if payload.len() > MAX_FLAP_PAYLOAD {
                return Err(WireError::PayloadTooLarge(payload.len()).into());
            }
        }
        if self.policy == SendPolicy::Immediate && conn.status() == Status::Ready {
            return match self.transmit(conn, &frame).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    error!(conn = conn.id(), error = %e, "immediate send failed, killing connection");
                    conn.kill().await;
                    self.purge_for_connection(conn.id());
                    Err(e)
                }
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.push(PendingFrame {
            id,
            conn: Arc::clone(conn),
            frame,
            sent: false,
        });
        trace!(conn = conn.id(), frame = id, "frame queued");
        Ok(())
    }

    /// Transmit every unsent frame, in queue order.
    ///
    /// A send failure kills the owning connection and drops the rest of its
    /// queued frames; other connections' frames still go out. Returns how
    /// many frames were transmitted.
    pub async fn flush(&self) -> usize {
        let mut sent = 0usize;
        loop {
            let next = {
                let q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                q.iter()
                    .find(|f| !f.sent)
                    .map(|f| (f.id, Arc::clone(&f.conn), f.frame.clone()))
            };
            let Some((id, conn, frame)) = next else { break };
            if conn.status().is_terminal() {
                self.purge_for_connection(conn.id());
                continue;
            }
            match self.transmit(&conn, &frame).await {
                Ok(()) => {
                    let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(f) = q.iter_mut().find(|f| f.id == id) {
                        f.sent = true;
                    }
                    sent += 1;
                }
                Err(e) => {
                    error!(conn = conn.id(), error = %e, "send failed, killing connection");
                    conn.kill().await;
                    self.purge_for_connection(conn.id());
                }
            }
        }
        sent
    }

    /// Serialize and write one frame, honoring the pacing window.
    async fn transmit(
        &self,
        conn: &Arc<Connection>,
        frame: &OutboundFrame,
    ) -> Result<(), SessionError> {
        loop {
            let delay = conn.pacing_delay();
            if delay.is_zero() {
                break;
            }
            tokio::time::sleep(delay).await;
        }
        // Writer lock held across sequencing and the write itself, so the
        // wire order always matches the sequence order.
        let mut guard = conn.writer.lock().await;
        let wr = guard
            .as_mut()
            .ok_or(SessionError::NotConnected(conn.id()))?;
        match frame {
            OutboundFrame::Flap { channel, payload } => {
                let header = FlapHeader {
                    channel: *channel,
                    seq: conn.next_seq(),
                    len: payload.len() as u16,
                };
                let mut buf = BytesMut::with_capacity(oscar_wire::FLAP_HEADER_SIZE + payload.len());
                header.encode(&mut buf);
                buf.extend_from_slice(payload);
                tokio::io::AsyncWriteExt::write_all(wr, &buf).await?;
                debug!(conn = conn.id(), channel = ?channel, seq = header.seq, len = header.len, "flap sent");
            }
            OutboundFrame::Rendezvous { frame, payload } => {
                let mut head = BytesMut::new();
                frame.encode(&mut head)?;
                tokio::io::AsyncWriteExt::write_all(wr, &head).await?;
                if !payload.is_empty() {
                    tokio::io::AsyncWriteExt::write_all(wr, payload).await?;
                }
                debug!(conn = conn.id(), frame_type = frame.frame_type, "rendezvous frame sent");
            }
        }
        drop(guard);
        conn.note_send();
        Ok(())
    }

    /// Drop frames already transmitted. Returns how many were collected.
    pub fn purge_sent(&self) -> usize {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = q.len();
        q.retain(|f| !f.sent);
        before - q.len()
    }

    /// Drop every queued frame of one connection, sent or not.
    pub fn purge_for_connection(&self, conn_id: u64) {
        let mut q = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        q.retain(|f| f.conn.id() != conn_id);
    }

    /// Frames currently queued (sent or not).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
