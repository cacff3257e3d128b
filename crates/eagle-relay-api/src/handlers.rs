//! API route handlers.

use axum::extract::{Query, State};
use axum::Json;
use eagle_relay_core::stats::{AggregatedStats, ConnectionStats, Stats};
use eagle_relay_core::{ConnectionInfo, RelayContext, Relayer, UserSpeed, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub stats: Arc<Stats>,
    pub ctx: Arc<RelayContext>,
}

impl AppState {
    pub fn from_relayer(relayer: &Relayer) -> Self {
        Self {
            stats: Arc::clone(relayer.stats()),
            ctx: Arc::clone(relayer.context()),
        }
    }
}

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: String,
}

/// Stats response.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub aggregated: AggregatedStats,
    pub active_connections: Vec<ConnectionInfo>,
}

/// History query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Health check endpoint.
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    ApiResponse::ok(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
    })
}

/// Get server statistics.
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<StatsResponse>> {
    let aggregated = state.stats.get_aggregated().await;
    let active_connections = state.stats.get_active().await;

    ApiResponse::ok(StatsResponse {
        aggregated,
        active_connections,
    })
}

/// Get active connections.
pub async fn get_connections(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<ConnectionInfo>>> {
    ApiResponse::ok(state.stats.get_active().await)
}

/// Get connection history.
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<ApiResponse<Vec<ConnectionStats>>> {
    ApiResponse::ok(state.stats.get_history(query.limit).await)
}

/// Measured speed and limit state of every user.
pub async fn get_users(State(state): State<AppState>) -> Json<ApiResponse<Vec<UserSpeed>>> {
    ApiResponse::ok(state.ctx.user_speeds())
}
