//! Server configuration.
//!
//! Configuration is resolved in order:
//! - Built-in defaults (`CHATLINE_HOST` / `CHATLINE_PORT` seed host and port)
//! - TOML configuration file
//! - `CHATLINE__*` environment overrides, e.g. `CHATLINE__RELAY__CHANNEL=lobby`

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Runtime worker threads; 0 means one per CPU core.
    #[serde(default)]
    pub workers: usize,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Relay configuration.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Session cookie configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Broadcast channel every connection joins.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Idle poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Grace period for cancelled pumps in milliseconds.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Which broker backs the broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// In-process broker; only connections on this server see each other.
    Memory,
    /// Redis pub/sub.
    Redis,
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker implementation.
    #[serde(default = "default_broker_kind")]
    pub kind: BrokerKind,

    /// Per-subscriber buffer; a subscriber that falls this far behind
    /// loses messages.
    #[serde(default = "default_broker_capacity")]
    pub capacity: usize,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// Where sessions are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendKind {
    /// In process; sessions are lost on restart.
    Memory,
    /// Redis at `broker.redis_url`, shared between servers.
    Redis,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session storage.
    #[serde(default = "default_session_backend")]
    pub backend: SessionBackendKind,

    /// Cookie carrying the session key.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Cookie and session lifetime in seconds.
    #[serde(default = "default_session_max_age")]
    pub max_age_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("CHATLINE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CHATLINE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_channel() -> String {
    chatline_core::relay::DEFAULT_CHANNEL.to_string()
}

fn default_poll_interval() -> u64 {
    10
}

fn default_cancel_grace() -> u64 {
    1_000
}

fn default_max_message_size() -> usize {
    chatline_protocol::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_broker_kind() -> BrokerKind {
    BrokerKind::Memory
}

fn default_broker_capacity() -> usize {
    chatline_core::memory::DEFAULT_CHANNEL_CAPACITY
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_session_backend() -> SessionBackendKind {
    SessionBackendKind::Memory
}

fn default_cookie_name() -> String {
    "chatline_session_id".to_string()
}

fn default_session_max_age() -> u64 {
    60 * 60 // 1 hour
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: 0,
            transport: TransportConfig::default(),
            relay: RelayConfig::default(),
            broker: BrokerConfig::default(),
            session: SessionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            poll_interval_ms: default_poll_interval(),
            cancel_grace_ms: default_cancel_grace(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            kind: default_broker_kind(),
            capacity: default_broker_capacity(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
            cookie_name: default_cookie_name(),
            max_age_secs: default_session_max_age(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults,
    /// then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "chatline.toml",
            "/etc/chatline/chatline.toml",
            "~/.config/chatline/chatline.toml",
        ];

        let mut base = None;
        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                base = Some(Self::from_file(expanded.as_ref())?);
                break;
            }
        }

        base.unwrap_or_default()
            .with_overrides(::config::Environment::with_prefix("CHATLINE").separator("__"))
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Layer environment overrides on top of this configuration.
    fn with_overrides(self, env: ::config::Environment) -> Result<Self> {
        ::config::Config::builder()
            .add_source(
                ::config::Config::try_from(&self).context("Failed to serialize base config")?,
            )
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read environment overrides")?
            .try_deserialize()
            .context("Invalid environment override")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Worker thread count for the runtime, if one was configured.
    #[must_use]
    pub fn worker_threads(&self) -> Option<usize> {
        (self.workers > 0).then_some(self.workers)
    }

    /// Relay settings for the core crate.
    #[must_use]
    pub fn relay_config(&self) -> chatline_core::RelayConfig {
        chatline_core::RelayConfig {
            channel: self.relay.channel.clone(),
            poll_interval: Duration::from_millis(self.relay.poll_interval_ms),
            cancel_grace: Duration::from_millis(self.relay.cancel_grace_ms),
            max_message_size: self.relay.max_message_size,
        }
    }
}
