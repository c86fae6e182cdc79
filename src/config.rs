//! Hub configuration
//!
//! Loaded from an optional `config/default.*` file and `HUB_*` environment
//! variables; missing keys fall back to the defaults below.

use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::AppError;
use crate::pump::PumpConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Listen address
    pub bind_addr: String,
    /// Hub command queue size
    pub command_capacity: usize,
    /// Per-connection outbound queue size
    pub outbound_capacity: usize,
    /// New sockets past this many active connections are dropped
    pub max_connections: usize,
    /// Largest accepted inbound frame/message
    pub max_frame_bytes: usize,
    pub ping_interval_secs: u64,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// 0 disables the periodic stats log
    pub stats_log_interval_secs: u64,
    /// Shared token required as `?token=` on upgrade, if set
    pub auth_token: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            command_capacity: 1024,
            outbound_capacity: 256,
            max_connections: 10_000,
            max_frame_bytes: 512 * 1024,
            ping_interval_secs: 30,
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            stats_log_interval_secs: 60,
            auth_token: None,
        }
    }
}

impl HubConfig {
    /// Load from `config/default.*` and `HUB_*` environment variables
    pub fn load() -> Result<Self, AppError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("HUB").try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, AppError> {
        let config: HubConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pumps cannot work with
    pub fn validate(&self) -> Result<(), AppError> {
        let problem = if self.command_capacity == 0 || self.outbound_capacity == 0 {
            Some("queue capacities must be non-zero")
        } else if self.max_frame_bytes == 0 {
            Some("max_frame_bytes must be non-zero")
        } else if self.ping_interval_secs == 0 || self.write_timeout_secs == 0 {
            Some("ping interval and write timeout must be non-zero")
        } else if self.ping_interval_secs >= self.read_timeout_secs {
            Some("ping interval must be shorter than the read timeout")
        } else {
            None
        };

        match problem {
            Some(msg) => Err(ConfigError::Message(msg.to_string()).into()),
            None => Ok(()),
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
        }
    }

    /// Frame limits applied at handshake
    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.max_frame_bytes);
        ws_config.max_frame_size = Some(self.max_frame_bytes);
        ws_config
    }

    pub fn stats_log_interval(&self) -> Option<Duration> {
        (self.stats_log_interval_secs > 0).then(|| Duration::from_secs(self.stats_log_interval_secs))
    }
}
