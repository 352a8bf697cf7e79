//! Prometheus metrics endpoint.

use crate::server::SyncRelay;
use crate::storage::FileStore;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<SyncRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay).await,
    )
}

async fn render(relay: &SyncRelay) -> String {
    let m = relay.metrics();

    // Gauges
    let devices = relay.total_sessions();
    let files = relay.file_count().await;
    let locks = relay.lock_count().await;
    let stored = relay.storage().file_count().await.unwrap_or(0);

    // Counters
    let messages = m.messages_total.load(Ordering::Relaxed);
    let chunks = m.chunks_relayed.load(Ordering::Relaxed);
    let accepted = m.versions_accepted.load(Ordering::Relaxed);
    let rejected = m.versions_rejected.load(Ordering::Relaxed);
    let granted = m.locks_granted.load(Ordering::Relaxed);
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    format!(
        r#"# HELP sync_relay_devices_connected Number of connected devices
# TYPE sync_relay_devices_connected gauge
sync_relay_devices_connected {devices}

# HELP sync_relay_files Number of files known to the relay
# TYPE sync_relay_files gauge
sync_relay_files {files}

# HELP sync_relay_locks Number of live locks
# TYPE sync_relay_locks gauge
sync_relay_locks {locks}

# HELP sync_relay_storage_files Number of file records in the database
# TYPE sync_relay_storage_files gauge
sync_relay_storage_files {stored}

# HELP sync_relay_info Server information
# TYPE sync_relay_info gauge
sync_relay_info{{version="{version}"}} 1

# HELP sync_relay_messages_total Total messages accepted from devices
# TYPE sync_relay_messages_total counter
sync_relay_messages_total {messages}

# HELP sync_relay_chunks_relayed_total Total chunks relayed
# TYPE sync_relay_chunks_relayed_total counter
sync_relay_chunks_relayed_total {chunks}

# HELP sync_relay_versions_accepted_total Versions that became a head
# TYPE sync_relay_versions_accepted_total counter
sync_relay_versions_accepted_total {accepted}

# HELP sync_relay_versions_rejected_total Versions acknowledged as rejected
# TYPE sync_relay_versions_rejected_total counter
sync_relay_versions_rejected_total {rejected}

# HELP sync_relay_locks_granted_total Locks granted
# TYPE sync_relay_locks_granted_total counter
sync_relay_locks_granted_total {granted}

# HELP sync_relay_connections_total Total connections accepted
# TYPE sync_relay_connections_total counter
sync_relay_connections_total {conns_total}

# HELP sync_relay_rate_limit_hits_total Total rate limit rejections
# TYPE sync_relay_rate_limit_hits_total counter
sync_relay_rate_limit_hits_total {rate_limits}

# HELP sync_relay_errors_total Total protocol and storage errors
# TYPE sync_relay_errors_total counter
sync_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
