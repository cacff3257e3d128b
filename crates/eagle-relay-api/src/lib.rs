//! # Eagle-Relay API
//!
//! Read-only REST API exposing relay statistics and per-user throughput.

pub mod handlers;
pub mod router;

pub use handlers::AppState;
pub use router::create_router;
