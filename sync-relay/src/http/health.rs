//! Health check endpoint.

use crate::server::SyncRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Connected devices.
    pub devices: usize,
    /// Files known to the relay.
    pub files: usize,
    /// Live locks.
    pub locks: usize,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<SyncRelay>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        devices: relay.total_sessions(),
        files: relay.file_count().await,
        locks: relay.lock_count().await,
    })
}
