//! # Eagle-Relay Core
//!
//! Core library for the eagle-relay service: a single listening port that
//! serves EagleTunnel, HTTP proxy and SOCKS5 clients, relaying each through a
//! pooled tunnel, plus the ET-Check control protocol spoken between relays.

pub mod config;
pub mod connection;
pub mod context;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod relayer;
pub mod request;
pub mod stats;
pub mod tunnel;
pub mod user;
pub mod version;

pub use config::{Config, LimitsConfig, ProtocolsConfig, ServerConfig, Switch, UserConfig};
pub use connection::{ConnectionInfo, ConnectionState, Protocol};
pub use context::RelayContext;
pub use error::{Error, Result};
pub use handler::et_check::{
    send_et_check_auth_req, send_et_check_ping_req, send_et_check_speed_req,
    send_et_check_version_req, EtCheckKind,
};
pub use handler::Handler;
pub use relayer::Relayer;
pub use request::{classify, ProtocolKind, Request};
pub use stats::{AggregatedStats, ConnectionStats, Stats};
pub use tunnel::{PooledTunnel, TargetAddr, Tunnel, TunnelPool};
pub use user::{EagleUser, UserSpeed};
pub use version::{Version, VersionError, PROTOCOL_COMPATIBLE_VERSION, PROTOCOL_VERSION};
