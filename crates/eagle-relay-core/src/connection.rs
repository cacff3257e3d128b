//! Connection tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents the state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Connection is relaying data.
    Active,
    /// Connection is closed.
    Closed,
}

/// Protocol the client spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// EagleTunnel protocol.
    EagleTunnel,
    /// HTTP proxy protocol.
    HttpProxy,
    /// SOCKS5 proxy protocol.
    Socks5,
}

/// Information about a single relayed connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Unique connection identifier.
    pub id: Uuid,

    /// Protocol used.
    pub protocol: Protocol,

    /// Client address.
    pub client_addr: String,

    /// Target address (destination).
    pub target_addr: String,

    /// Target port.
    pub target_port: u16,

    /// User the traffic is charged to.
    pub user: Option<String>,

    /// Current state.
    pub state: ConnectionState,

    /// When relaying started.
    pub connected_at: DateTime<Utc>,

    /// When the connection was closed (if applicable).
    pub closed_at: Option<DateTime<Utc>>,

    /// Bytes sent to target.
    pub bytes_sent: u64,

    /// Bytes received from target.
    pub bytes_received: u64,
}

impl ConnectionInfo {
    /// Create a new connection info.
    pub fn new(
        protocol: Protocol,
        client_addr: String,
        target_addr: String,
        target_port: u16,
        user: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol,
            client_addr,
            target_addr,
            target_port,
            user,
            state: ConnectionState::Active,
            connected_at: Utc::now(),
            closed_at: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Mark the connection as closed.
    pub fn set_closed(&mut self) {
        self.state = ConnectionState::Closed;
        self.closed_at = Some(Utc::now());
    }

    /// Get connection duration in seconds.
    pub fn duration_secs(&self) -> i64 {
        let end = self.closed_at.unwrap_or_else(Utc::now);
        (end - self.connected_at).num_seconds()
    }
}
