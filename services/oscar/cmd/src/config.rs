//! Configuration handling for the oscar client.
//!
//! This module handles reading configuration from an optional YAML file and
//! environment variables, providing a unified configuration interface.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Oscar client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscarConfig {
    /// Screen name to present
    pub screen_name: String,
    /// Chat navigator host, `host[:port]`
    pub chatnav_host: String,
    /// Exchange to create rooms on
    pub exchange: u16,
    /// Room to request at startup
    pub room: String,
    /// Forced latency between sends, in milliseconds
    pub forced_latency_ms: u64,
    /// Transmit frames immediately instead of queueing
    pub immediate_sends: bool,
    /// Seconds before an unanswered request is forgotten
    pub request_max_age_secs: u64,
}

impl Default for OscarConfig {
    fn default() -> Self {
        Self {
            screen_name: "oscartest".to_string(),
            chatnav_host: "127.0.0.1:5190".to_string(),
            exchange: 4,
            room: "lobby".to_string(),
            forced_latency_ms: 0,
            immediate_sends: false,
            request_max_age_secs: 60,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    oscar: Option<OscarConfig>,
}

impl OscarConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(root) = serde_yaml::from_str::<RootConfig>(&content) {
                if let Some(oscar) = root.oscar {
                    config = oscar;
                }
                info!("Loaded configuration from {:?}", config_path.as_ref());
            } else {
                warn!(
                    "Failed to parse config file {:?}, using defaults",
                    config_path.as_ref()
                );
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        info!(
            "Final oscar configuration: screen_name={}, chatnav={}, exchange={}, room={}",
            config.screen_name, config.chatnav_host, config.exchange, config.room
        );

        Ok(config)
    }

    /// Override fields from OSCAR_* environment variables
    fn apply_environment_overrides(&mut self) {
        if let Ok(v) = std::env::var("OSCAR_SCREEN_NAME") {
            self.screen_name = v;
        }
        if let Ok(v) = std::env::var("OSCAR_CHATNAV_HOST") {
            self.chatnav_host = v;
        }
        if let Ok(v) = std::env::var("OSCAR_EXCHANGE") {
            if let Ok(exchange) = v.parse::<u16>() {
                self.exchange = exchange;
            }
        }
        if let Ok(v) = std::env::var("OSCAR_ROOM") {
            self.room = v;
        }
        if let Ok(v) = std::env::var("OSCAR_FORCED_LATENCY_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.forced_latency_ms = ms;
            }
        }
    }
}
