//! Relayed-connection statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::connection::ConnectionInfo;

/// A finished connection kept in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStats {
    #[serde(flatten)]
    pub info: ConnectionInfo,

    /// How long the connection relayed, in seconds.
    pub duration_secs: i64,
}

/// Aggregated statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedStats {
    /// Connections that entered relay mode since start.
    pub total_connections: u64,

    /// Currently relaying connections.
    pub active_connections: u64,

    /// Total bytes sent to targets.
    pub total_bytes_sent: u64,

    /// Total bytes received from targets.
    pub total_bytes_received: u64,

    /// Server uptime in seconds.
    pub uptime_secs: i64,

    /// Server start time.
    pub started_at: DateTime<Utc>,
}

/// Thread-safe statistics collector.
#[derive(Debug)]
pub struct Stats {
    total_connections: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
    started_at: DateTime<Utc>,
    active: RwLock<HashMap<Uuid, ConnectionInfo>>,
    history: RwLock<VecDeque<ConnectionStats>>,
    max_history: usize,
}

impl Stats {
    /// Create a collector keeping at most `max_history` finished connections.
    pub fn new(max_history: usize) -> Self {
        Self {
            total_connections: AtomicU64::new(0),
            total_bytes_sent: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            started_at: Utc::now(),
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history)),
            max_history,
        }
    }

    /// Record a connection entering relay mode.
    pub async fn add_connection(&self, info: ConnectionInfo) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active.write().await.insert(info.id, info);
    }

    /// Mark a connection as closed and move it to history.
    pub async fn close_connection(&self, id: Uuid, bytes_sent: u64, bytes_received: u64) {
        let Some(mut info) = self.active.write().await.remove(&id) else {
            return;
        };

        info.set_closed();
        info.bytes_sent = bytes_sent;
        info.bytes_received = bytes_received;

        self.total_bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
        self.total_bytes_received
            .fetch_add(bytes_received, Ordering::Relaxed);

        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.write().await;
        if history.len() >= self.max_history {
            history.pop_front();
        }
        let duration_secs = info.duration_secs();
        history.push_back(ConnectionStats {
            info,
            duration_secs,
        });
    }

    /// Get aggregated statistics.
    pub async fn get_aggregated(&self) -> AggregatedStats {
        let active_connections = self.active.read().await.len() as u64;

        AggregatedStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections,
            total_bytes_sent: self.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            started_at: self.started_at,
        }
    }

    /// Active connections, oldest first.
    pub async fn get_active(&self) -> Vec<ConnectionInfo> {
        let mut active: Vec<_> = self.active.read().await.values().cloned().collect();
        active.sort_by_key(|c| c.connected_at);
        active
    }

    /// Connection history, newest first.
    pub async fn get_history(&self, limit: Option<usize>) -> Vec<ConnectionStats> {
        let history = self.history.read().await;
        let limit = limit.unwrap_or(history.len()).min(history.len());
        history.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(1000)
    }
}
