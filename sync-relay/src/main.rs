//! sync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! sync-relay --config relay.toml
//! ```
//!
//! A missing config file falls back to defaults.

use anyhow::Context;
use atrius_sync_relay::cleanup::spawn_cleanup_task;
use atrius_sync_relay::config::Config;
use atrius_sync_relay::http::{build_router, health};
use atrius_sync_relay::protocol::SyncProtocol;
use atrius_sync_relay::server::SyncRelay;
use atrius_sync_relay::storage::SqliteStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atrius_sync_relay=info".into()),
        )
        .init();

    let config_path = get_config_path();
    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        tracing::warn!("{} not found, using defaults", config_path.display());
        Config::default()
    };
    tracing::info!("sync-relay v{} starting", env!("CARGO_PKG_VERSION"));

    let storage = SqliteStorage::new(&config.storage.database)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;
    let relay = Arc::new(SyncRelay::new(config.clone(), storage));
    relay.restore().await.context("restoring file records")?;
    health::init_start_time();

    let cleanup = spawn_cleanup_task(relay.clone(), config.cleanup.clone());

    let http_listener = TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("binding HTTP on {}", config.http.bind_address))?;
    tracing::info!("HTTP endpoints on {}", config.http.bind_address);
    let router = build_router(relay.clone());
    let http = tokio::spawn(async move { axum::serve(http_listener, router).await });

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("binding {}", config.server.bind_address))?;
    let devices = tokio::spawn(SyncProtocol::new(relay).serve(listener));

    tokio::select! {
        result = devices => result?.context("device listener failed")?,
        result = http => result?.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }
    cleanup.abort();
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}
