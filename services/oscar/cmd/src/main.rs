//! Oscar demonstration client.
//!
//! Connects to a chat navigation host, negotiates FLAP framing, requests
//! chat rights, and asks for a room, logging everything that comes back.
//! This binary exists to exercise the engine end to end against a live
//! host; it performs no login beyond FLAP negotiation.

use clap::Parser;
use oscar_session::{chat, ConnKind, SendPolicy, Session, SessionConfig, SessionError};
use oscar_wire::{FAMILY_CHATNAV, FAMILY_GENERIC};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::OscarConfig;
use logging::OscarLogFormatter;

/// Oscar protocol demonstration client
#[derive(Parser, Debug)]
#[command(name = "oscar", version, about = "OSCAR chat navigation client")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "oscar.yaml")]
    config: String,

    /// Chat navigator host, e.g. 127.0.0.1:5190
    #[arg(long)]
    host: Option<String>,

    /// Screen name to present
    #[arg(long)]
    screen_name: Option<String>,

    /// Exchange to create the room on
    #[arg(long)]
    exchange: Option<u16>,

    /// Room name to request
    #[arg(long)]
    room: Option<String>,

    /// Forced latency between sends, e.g. 1s
    #[arg(long)]
    forced_latency: Option<humantime::Duration>,

    /// Transmit frames at enqueue time instead of batching in flush
    #[arg(long)]
    immediate: bool,

    /// Keepalive interval, e.g. 60s
    #[arg(long, default_value = "60s")]
    keepalive_interval: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(OscarLogFormatter::new())
        .init();

    let mut cfg = OscarConfig::load_from_file(&args.config)?;
    if let Some(host) = args.host {
        cfg.chatnav_host = host;
    }
    if let Some(name) = args.screen_name {
        cfg.screen_name = name;
    }
    if let Some(exchange) = args.exchange {
        cfg.exchange = exchange;
    }
    if let Some(room) = args.room {
        cfg.room = room;
    }
    if let Some(latency) = args.forced_latency {
        cfg.forced_latency_ms = latency.as_millis() as u64;
    }
    if args.immediate {
        cfg.immediate_sends = true;
    }

    let sess = Arc::new(Session::new(SessionConfig {
        policy: if cfg.immediate_sends {
            SendPolicy::Immediate
        } else {
            SendPolicy::Queued
        },
        forced_latency: Duration::from_millis(cfg.forced_latency_ms),
        request_max_age: Duration::from_secs(cfg.request_max_age_secs),
    }));

    register_handlers(&sess);

    component_info!("session", "connecting to chat navigator {}", cfg.chatnav_host);
    let conn = sess.open(ConnKind::ChatNav, &cfg.chatnav_host).await;
    if conn.status().is_terminal() {
        anyhow::bail!("could not reach {}", cfg.chatnav_host);
    }
    sess.negotiate(&conn).await?;
    info!("negotiated, requesting chat rights as {}", cfg.screen_name);

    chat::request_room_rights(&sess.dispatch, &sess.tx, &conn).await?;
    chat::create_room(&sess.dispatch, &sess.tx, &conn, cfg.exchange, &cfg.room).await?;
    sess.tx.flush().await;

    let mut keepalive = tokio::time::interval(*args.keepalive_interval);
    keepalive.tick().await; // immediate first tick
    let mut reap = tokio::time::interval(Duration::from_secs(30));
    reap.tick().await;
    let mut poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = keepalive.tick() => {
                if let Err(e) = sess.send_keepalive(&conn).await {
                    warn!(error = %e, "keepalive failed");
                    break;
                }
            }
            _ = reap.tick() => {
                let reaped = sess.reap_stale();
                if reaped > 0 {
                    debug!(reaped, "dropped unanswered requests");
                }
            }
            _ = poll.tick() => {
                match sess.pump(&conn).await {
                    Ok(_) => {}
                    Err(SessionError::PeerClosed(_)) | Err(SessionError::ConnectionDead(_)) => {
                        warn!("connection lost");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "read failure");
                        break;
                    }
                }
                sess.dispatch_pending().await;
                sess.tx.flush().await;
                sess.tx.purge_sent();
            }
        }
    }

    sess.close(&conn).await;
    Ok(())
}

/// Wire up logging handlers for everything the navigator can send back.
fn register_handlers(sess: &Arc<Session>) {
    sess.dispatch
        .register_handler(FAMILY_CHATNAV, chat::CHATNAV_INFO, |ev| {
            let info = match chat::parse_chatnav_info(&ev.body) {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "bad chatnav info reply");
                    return;
                }
            };
            if let Some(max) = info.max_rooms {
                component_info!("chatnav", "may join up to {} rooms", max);
            }
            for exchange in &info.exchanges {
                component_info!(
                    "chatnav",
                    "exchange {} ({})",
                    exchange.number,
                    exchange.name.as_deref().unwrap_or("unnamed")
                );
            }
            if let Some(room) = &info.room {
                let requested = ev
                    .context
                    .as_ref()
                    .and_then(|c| c.downcast_ref::<String>())
                    .cloned();
                component_info!(
                    "chatnav",
                    "room ready: {} (requested {:?}, cookie {} bytes)",
                    room.fq_name.as_deref().unwrap_or("?"),
                    requested,
                    room.cookie.len()
                );
            }
        });

    sess.dispatch
        .register_handler(FAMILY_GENERIC, 0x0013, |ev| {
            component_info!("host", "motd ({} bytes)", ev.body.len());
        });

    sess.dispatch
        .register_handler(FAMILY_GENERIC, 0x0001, |ev| {
            component_warn!("host", "service error, {} byte body", ev.body.len());
        });
}
