//! HTTP endpoints for sync-relay.
//!
//! Provides health checks and Prometheus metrics.

pub mod health;
mod metrics;

use crate::server::SyncRelay;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
///
/// `/metrics` is only mounted when enabled in the configuration.
pub fn build_router(relay: Arc<SyncRelay>) -> Router {
    let mut router = Router::new().route("/health", get(health::health_handler));
    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(relay))
}
