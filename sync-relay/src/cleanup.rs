//! Background cleanup task.
//!
//! Runs periodically to release expired locks (announcing each release to
//! the file's members) and to evict idle rate-limiter entries.

use crate::config::CleanupConfig;
use crate::server::SyncRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<SyncRelay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&relay).await;
        }
    })
}

/// One cleanup pass.
pub async fn run_once(relay: &SyncRelay) {
    let before = relay.lock_count().await;
    let notices = relay.sweep_expired_locks().await;
    let released = before.saturating_sub(relay.lock_count().await);
    if released > 0 {
        tracing::info!(
            "Cleanup: released {} expired lock(s), {} notice(s) sent",
            released,
            notices
        );
    } else {
        tracing::debug!("Cleanup: no expired locks");
    }
    relay.rate_limits().shrink();
}
