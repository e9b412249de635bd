//! SNAC dispatch and the outstanding-request cache.
//!
//! Outbound requests get a session-global monotonic request id; the cache
//! remembers `(id -> family, subtype, context, issue time)` until the reply
//! arrives echoing the id. Inbound SNACs route by `(family, subtype)` to a
//! registered handler, with the cached context attached when the frame is a
//! correlated reply and without one when the server pushed unsolicited.
//! Servers are free to never answer, so the cache is reaped by age.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use oscar_wire::{Channel, SnacHeader, SnacKind, SNAC_HEADER_SIZE};

use crate::conn::Connection;
use crate::error::SessionError;
use crate::tx::{OutboundFrame, TxQueue};

/// Opaque per-request state threaded from request to reply.
pub type Context = Box<dyn Any + Send>;

/// An inbound SNAC handed to a handler.
pub struct SnacEvent {
    /// Connection the SNAC arrived on
    pub conn: Arc<Connection>,
    /// Parsed SNAC header
    pub header: SnacHeader,
    /// Body bytes after the header
    pub body: Bytes,
    /// Context stored at request time; `None` for unsolicited pushes
    pub context: Option<Context>,
}

impl SnacEvent {
    /// True when this SNAC answered a request we sent.
    pub fn solicited(&self) -> bool {
        self.context.is_some()
    }
}

type Handler = Arc<dyn Fn(SnacEvent) + Send + Sync>;

struct Outstanding {
    family: u16,
    subtype: u16,
    context: Option<Context>,
    issued: Instant,
}

/// Request-id allocator, outstanding cache, and handler table.
pub struct Dispatcher {
    next_id: AtomicU32,
    outstanding: Mutex<HashMap<u32, Outstanding>>,
    handlers: Mutex<HashMap<(u16, u16), Handler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Fresh dispatcher; ids start at 1.
    pub fn new() -> Self {
        Dispatcher {
            next_id: AtomicU32::new(1),
            outstanding: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Register the handler for `(family, subtype)`. Registering the same
    /// pair again replaces the previous handler.
    pub fn register_handler<F>(&self, family: u16, subtype: u16, handler: F)
    where
        F: Fn(SnacEvent) + Send + Sync + 'static,
    {
        let mut h = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if h.insert((family, subtype), Arc::new(handler)).is_some() {
            debug!(family, subtype, "handler replaced");
        }
    }

    /// Build and enqueue a SNAC on FLAP channel 2, recording it in the
    /// outstanding cache. Returns the request id.
    pub async fn send_request(
        &self,
        tx: &TxQueue,
        conn: &Arc<Connection>,
        family: u16,
        subtype: u16,
        flags: u16,
        body: &[u8],
        context: Option<Context>,
    ) -> Result<u32, SessionError> {
        let request_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let header = SnacHeader {
            family,
            subtype,
            flags,
            request_id,
        };
        let mut payload = BytesMut::with_capacity(SNAC_HEADER_SIZE + body.len());
        header.encode(&mut payload);
        payload.put_slice(body);
        tx.enqueue(
            conn,
            OutboundFrame::Flap {
                channel: Channel::Data,
                payload: payload.freeze(),
            },
        )
        .await?;
        let mut o = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        o.insert(
            request_id,
            Outstanding {
                family,
                subtype,
                context,
                issued: Instant::now(),
            },
        );
        debug!(conn = conn.id(), family, subtype, request_id, "request sent");
        Ok(request_id)
    }

    /// Header-only request, no body.
    pub async fn send_basic(
        &self,
        tx: &TxQueue,
        conn: &Arc<Connection>,
        family: u16,
        subtype: u16,
    ) -> Result<u32, SessionError> {
        self.send_request(tx, conn, family, subtype, 0, &[], None).await
    }

    /// Request whose whole body is one big-endian u16.
    pub async fn send_short(
        &self,
        tx: &TxQueue,
        conn: &Arc<Connection>,
        family: u16,
        subtype: u16,
        value: u16,
    ) -> Result<u32, SessionError> {
        self.send_request(tx, conn, family, subtype, 0, &value.to_be_bytes(), None)
            .await
    }

    /// Request whose whole body is one big-endian u32.
    pub async fn send_long(
        &self,
        tx: &TxQueue,
        conn: &Arc<Connection>,
        family: u16,
        subtype: u16,
        value: u32,
    ) -> Result<u32, SessionError> {
        self.send_request(tx, conn, family, subtype, 0, &value.to_be_bytes(), None)
            .await
    }

    /// Route one inbound channel-2 payload.
    ///
    /// A cache hit consumes the record, so a duplicate reply with the same
    /// id dispatches as unsolicited. Unregistered pairs are logged and
    /// dropped.
    pub fn on_frame(&self, conn: Arc<Connection>, payload: Bytes) -> Result<(), SessionError> {
        let header = SnacHeader::decode(&payload)
            .map_err(|_| SessionError::MalformedFrame("short snac header"))?;
        let body = payload.slice(SNAC_HEADER_SIZE..);

        let context = {
            let mut o = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
            match o.remove(&header.request_id) {
                Some(rec) => {
                    debug!(
                        request_id = header.request_id,
                        family = rec.family,
                        subtype = rec.subtype,
                        "reply correlated"
                    );
                    rec.context
                }
                None => None,
            }
        };

        let handler = {
            let h = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            h.get(&(header.family, header.subtype)).cloned()
        };
        match handler {
            Some(handler) => handler(SnacEvent {
                conn,
                header,
                body,
                context,
            }),
            None => match header.kind() {
                SnacKind::Unknown { family, subtype } => {
                    warn!(family, subtype, "snac with no name and no handler")
                }
                kind => debug!(?kind, "no handler registered"),
            },
        }
        Ok(())
    }

    /// Drop outstanding records older than `max_age`. Returns how many.
    pub fn reap_stale(&self, max_age: Duration) -> usize {
        let mut o = self.outstanding.lock().unwrap_or_else(|e| e.into_inner());
        let before = o.len();
        o.retain(|_, rec| rec.issued.elapsed() <= max_age);
        let reaped = before - o.len();
        if reaped > 0 {
            debug!(reaped, "stale requests dropped");
        }
        reaped
    }

    /// Requests still awaiting replies.
    pub fn outstanding_len(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::ConnKind;
    use crate::tx::SendPolicy;
    use oscar_wire::FAMILY_LOCATION;
    use tokio::net::TcpListener;

    async fn ready_conn() -> Arc<Connection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dest = listener.local_addr().unwrap().to_string();
        let conn = Arc::new(Connection::connect(1, ConnKind::Service, &dest).await);
        conn.mark_ready();
        // Keep the accept side alive for the duration of the test.
        tokio::spawn(async move {
            let _s = listener.accept().await;
            std::future::pending::<()>().await;
        });
        conn
    }

    fn reply(header: SnacHeader, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf.put_slice(body);
        buf.freeze()
    }

    #[tokio::test]
    async fn test_correlation_consumes_exactly_once() {
        let conn = ready_conn().await;
        let tx = TxQueue::new(SendPolicy::Queued);
        let disp = Dispatcher::new();

        let seen: Arc<Mutex<Vec<bool>>> = Arc::default();
        let seen2 = Arc::clone(&seen);
        disp.register_handler(FAMILY_LOCATION, 0x0006, move |ev| {
            seen2.lock().unwrap().push(ev.solicited());
        });

        let id = disp
            .send_request(
                &tx,
                &conn,
                FAMILY_LOCATION,
                0x0005,
                0,
                b"testuser",
                Some(Box::new("ctx".to_string())),
            )
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(disp.outstanding_len(), 1);

        let hdr = SnacHeader {
            family: FAMILY_LOCATION,
            subtype: 0x0006,
            flags: 0,
            request_id: id,
        };
        disp.on_frame(Arc::clone(&conn), reply(hdr, &[])).unwrap();
        // Same id again: the record is gone, so it arrives unsolicited.
        disp.on_frame(Arc::clone(&conn), reply(hdr, &[])).unwrap();

        assert_eq!(disp.outstanding_len(), 0);
        assert_eq!(&*seen.lock().unwrap(), &[true, false]);
    }

    #[tokio::test]
    async fn test_unsolicited_push_without_request() {
        let conn = ready_conn().await;
        let disp = Dispatcher::new();
        let hits = Arc::new(Mutex::new(0usize));
        let hits2 = Arc::clone(&hits);
        disp.register_handler(0x0001, 0x0013, move |ev| {
            assert!(!ev.solicited());
            *hits2.lock().unwrap() += 1;
        });
        let hdr = SnacHeader {
            family: 0x0001,
            subtype: 0x0013,
            flags: 0,
            request_id: 0x7777,
        };
        disp.on_frame(conn, reply(hdr, b"motd")).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_pair_is_ignored() {
        let conn = ready_conn().await;
        let disp = Dispatcher::new();
        let hdr = SnacHeader {
            family: 0x00ff,
            subtype: 0x00ff,
            flags: 0,
            request_id: 5,
        };
        disp.on_frame(conn, reply(hdr, &[])).unwrap();
    }

    #[tokio::test]
    async fn test_handler_replacement() {
        let conn = ready_conn().await;
        let disp = Dispatcher::new();
        let tag: Arc<Mutex<&'static str>> = Arc::new(Mutex::new(""));
        let t1 = Arc::clone(&tag);
        disp.register_handler(0x0003, 0x000b, move |_| *t1.lock().unwrap() = "first");
        let t2 = Arc::clone(&tag);
        disp.register_handler(0x0003, 0x000b, move |_| *t2.lock().unwrap() = "second");
        let hdr = SnacHeader {
            family: 0x0003,
            subtype: 0x000b,
            flags: 0,
            request_id: 0,
        };
        disp.on_frame(conn, reply(hdr, &[])).unwrap();
        assert_eq!(*tag.lock().unwrap(), "second");
    }

    #[tokio::test]
    async fn test_reap_stale_by_age() {
        let conn = ready_conn().await;
        let tx = TxQueue::new(SendPolicy::Queued);
        let disp = Dispatcher::new();
        disp.send_basic(&tx, &conn, 0x000d, 0x0002).await.unwrap();
        std::thread::sleep(Duration::from_millis(30));
        disp.send_basic(&tx, &conn, 0x000d, 0x0002).await.unwrap();

        assert_eq!(disp.reap_stale(Duration::from_millis(20)), 1);
        assert_eq!(disp.outstanding_len(), 1);
        assert_eq!(disp.reap_stale(Duration::ZERO), 1);
        assert_eq!(disp.outstanding_len(), 0);
    }

    #[tokio::test]
    async fn test_short_snac_header_is_malformed() {
        let conn = ready_conn().await;
        let disp = Dispatcher::new();
        assert!(matches!(
            disp.on_frame(conn, Bytes::from_static(&[0x00, 0x02])),
            Err(SessionError::MalformedFrame(_))
        ));
    }
}
