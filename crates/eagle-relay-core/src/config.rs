//! Configuration structures for eagle-relay.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Report connection-local failures in the log.
    #[serde(default)]
    pub debug: Switch,

    /// Sample and limit user throughput once a second.
    #[serde(default, rename = "speed-check")]
    pub speed_check: Switch,

    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Which protocols receive a handler.
    #[serde(default)]
    pub protocols: ProtocolsConfig,

    /// Upstream relayer, for nodes that forward through another relay.
    #[serde(default)]
    pub relayer: RelayerConfig,

    /// Identity this node presents to an upstream relayer.
    #[serde(default)]
    pub local_user: UserConfig,

    /// Users this node authenticates.
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitoring API configuration.
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// An `"on"` / `"off"` option value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Switch {
    On,
    #[default]
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::On => f.write_str("on"),
            Switch::Off => f.write_str("off"),
        }
    }
}

/// Server binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port shared by every protocol.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Protocol enable flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolsConfig {
    #[serde(default = "default_enabled")]
    pub eagle_tunnel: bool,

    #[serde(default = "default_enabled")]
    pub http: bool,

    #[serde(default = "default_enabled")]
    pub socks5: bool,
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            eagle_tunnel: true,
            http: true,
            socks5: true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Upstream relayer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// `host:port` of the relay to forward through. Direct connections are
    /// made when unset.
    pub address: Option<String>,
}

/// A user identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// User identifier.
    #[serde(default = "default_user_id")]
    pub id: String,

    /// Shared secret.
    #[serde(default)]
    pub password: String,

    /// Throughput limit in bytes per second.
    pub speed_limit: Option<u64>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: default_user_id(),
            password: String::new(),
            speed_limit: None,
        }
    }
}

fn default_user_id() -> String {
    crate::user::ANONYMOUS_ID.to_string()
}

/// Connection limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Outbound connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// How long shutdown waits for in-flight connections, in seconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: u64,

    /// Idle tunnels kept for reuse.
    #[serde(default = "default_max_idle_tunnels")]
    pub max_idle_tunnels: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            drain_timeout: default_drain_timeout(),
            max_idle_tunnels: default_max_idle_tunnels(),
        }
    }
}

impl LimitsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout)
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_max_idle_tunnels() -> usize {
    256
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Monitoring API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_api_port(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}
