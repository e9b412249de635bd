//! Connection management, queues, and dispatch for the OSCAR engine.
//!
//! The [`Session`] is the root object: it opens connections to the various
//! OSCAR hosts, queues frames in both directions, and routes inbound SNACs
//! through the outstanding-request cache to registered handlers.
//!
//! ```no_run
//! use oscar_session::{ConnKind, Session, SessionConfig};
//!
//! # async fn run() -> Result<(), oscar_session::SessionError> {
//! let sess = Session::new(SessionConfig::default());
//! let conn = sess.open(ConnKind::ChatNav, "ars.oscar.aol.com").await;
//! sess.negotiate(&conn).await?;
//! oscar_session::chat::request_room_rights(&sess.dispatch, &sess.tx, &conn).await?;
//! sess.tx.flush().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chat;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod rx;
pub mod session;
pub mod tx;

// Re-export main types
pub use chat::{ChatMessage, ChatNavInfo, ExchangeInfo, RoomCreated, RoomInfo, RoomUpdate};
pub use conn::{ConnData, ConnKind, Connection, Status};
pub use dispatch::{Context, Dispatcher, SnacEvent};
pub use error::SessionError;
pub use rx::{FramePayload, QueuedFrame, RxQueue};
pub use session::{Session, SessionConfig, FLAP_VERSION};
pub use tx::{OutboundFrame, SendPolicy, TxQueue};
