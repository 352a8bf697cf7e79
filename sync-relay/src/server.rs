//! Main SyncRelay server coordination.
//!
//! SyncRelay owns the coordinator, persists file records after every change
//! to a file's history or device states, and routes outgoing messages to the
//! connected sessions.
//!
//! Records are saved after the coordinator lock is released. Each snapshot
//! carries a revision taken under that lock, and a save is skipped when a
//! later revision of the same file is already stored.

use crate::config::Config;
use crate::error::Result;
use crate::limits::RateLimits;
use crate::storage::{FileStore, SqliteStorage};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sync_core::{Coordinator, Outgoing};
use sync_types::{unix_timestamp, DeviceId, FileError, FileId, FileRecord, Message};
use tokio::sync::{mpsc, Mutex};

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total messages accepted from devices.
    pub messages_total: AtomicU64,
    /// Total chunks relayed.
    pub chunks_relayed: AtomicU64,
    /// Versions that became a file's head.
    pub versions_accepted: AtomicU64,
    /// Versions acknowledged as rejected.
    pub versions_rejected: AtomicU64,
    /// Locks granted.
    pub locks_granted: AtomicU64,
    /// Total connections accepted (before registration).
    pub connections_total: AtomicU64,
    /// Total rate limit rejections (connection + message + global).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol and storage errors.
    pub errors_total: AtomicU64,
}

/// Outbound half of one device session.
#[derive(Debug)]
struct Connection {
    /// Distinguishes a reconnect from the session it replaced.
    session: u64,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

/// Main relay server.
pub struct SyncRelay {
    config: Config,
    storage: Arc<SqliteStorage>,
    /// Rate limiters for connections and messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters, gauges).
    metrics: RelayMetrics,
    coordinator: Mutex<Coordinator>,
    /// Registered devices and their writers.
    connections: DashMap<DeviceId, Connection>,
    next_session: AtomicU64,
    next_revision: AtomicU64,
    /// Last revision stored per file.
    persisted: DashMap<FileId, Arc<Mutex<u64>>>,
}

impl std::fmt::Debug for SyncRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl SyncRelay {
    /// Create a new SyncRelay with the given config and storage.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let coordinator = Coordinator::new(config.coordinator());
        Self {
            config,
            storage: Arc::new(storage),
            rate_limits,
            metrics: RelayMetrics::default(),
            coordinator: Mutex::new(coordinator),
            connections: DashMap::new(),
            next_session: AtomicU64::new(1),
            next_revision: AtomicU64::new(1),
            persisted: DashMap::new(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Load every persisted file record into the coordinator.
    pub async fn restore(&self) -> Result<usize> {
        let records = self.storage.load_files().await?;
        let restored = self.coordinator.lock().await.restore(records)?;
        tracing::info!("Restored {} file(s) from storage", restored);
        Ok(restored)
    }

    /// Register a device session.
    ///
    /// Returns the device's id and a session number to pass to
    /// [`disconnect`](Self::disconnect). A second session for the same device
    /// replaces the first.
    pub async fn register(
        &self,
        requested: Option<DeviceId>,
        name: Option<String>,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) -> (DeviceId, u64) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (device, out) = self
            .coordinator
            .lock()
            .await
            .register_device(requested, name.clone(), unix_timestamp());

        if self
            .connections
            .insert(device, Connection { session, sender })
            .is_some()
        {
            tracing::info!("Device {} reconnected; previous session replaced", device);
        }
        tracing::info!(
            "Registered device {} ({}), {} connected",
            device,
            name.as_deref().unwrap_or("unnamed"),
            self.connections.len()
        );
        self.deliver(out);
        (device, session)
    }

    /// Apply one message from a registered device and route the results.
    pub async fn dispatch(&self, from: DeviceId, message: Message) {
        self.metrics.messages_total.fetch_add(1, Ordering::Relaxed);

        if let Message::FileChunk(chunk) = &message {
            let max = self.config.limits.max_chunk_size;
            if chunk.chunk_bytes.len() > max {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                self.send_error(
                    from,
                    Some(chunk.file_id),
                    format!("chunk of {} bytes exceeds {}", chunk.chunk_bytes.len(), max),
                );
                return;
            }
            self.metrics.chunks_relayed.fetch_add(1, Ordering::Relaxed);
        }

        let file_id = message.file_id();
        let persist = matches!(
            message,
            Message::FileRegister(_) | Message::FileComplete(_) | Message::FileState(_)
        );
        let lock_request = matches!(message, Message::LockAcquire(_));

        let now = unix_timestamp();
        let (out, record) = {
            let mut coordinator = self.coordinator.lock().await;
            let out = coordinator.handle(from, message, now);
            let record = match file_id {
                Some(file_id) if persist => coordinator
                    .file_record(file_id, now)
                    .map(|record| (self.next_revision.fetch_add(1, Ordering::SeqCst), record)),
                _ => None,
            };
            (out, record)
        };

        self.count(from, lock_request, &out);
        if let Some((revision, record)) = record {
            self.persist(revision, &record).await;
        }
        self.deliver(out);
    }

    /// Save a file record unless a later revision of it is already stored.
    async fn persist(&self, revision: u64, record: &FileRecord) {
        let slot = self.persisted.entry(record.file_id).or_default().clone();
        let mut stored = slot.lock().await;
        if *stored >= revision {
            tracing::debug!(
                "Skipping revision {} of {}; {} already stored",
                revision,
                record.file_id,
                *stored
            );
            return;
        }
        match self.storage.save_file(record).await {
            Ok(()) => *stored = revision,
            Err(e) => {
                self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to persist file {}: {}", record.file_id, e);
            }
        }
    }

    fn count(&self, from: DeviceId, lock_request: bool, out: &[Outgoing]) {
        for o in out {
            match &o.message {
                Message::FileAck(ack) if ack.accepted => {
                    self.metrics.versions_accepted.fetch_add(1, Ordering::Relaxed);
                }
                Message::FileAck(_) => {
                    self.metrics.versions_rejected.fetch_add(1, Ordering::Relaxed);
                }
                Message::LockState(state)
                    if lock_request
                        && o.to == from
                        && state.owner.as_ref().is_some_and(|l| l.owner_device_id == from) =>
                {
                    self.metrics.locks_granted.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }

    /// End a session: release the device's locks and update presence.
    ///
    /// Ignored when `session` was already replaced by a reconnect.
    pub async fn disconnect(&self, device: DeviceId, session: u64) {
        if self
            .connections
            .remove_if(&device, |_, c| c.session == session)
            .is_none()
        {
            tracing::debug!("Session {} of {} already replaced", session, device);
            return;
        }
        let out = self
            .coordinator
            .lock()
            .await
            .disconnect(device, unix_timestamp());
        tracing::info!(
            "Device {} disconnected, {} connected",
            device,
            self.connections.len()
        );
        self.deliver(out);
    }

    /// Release expired locks and announce the releases.
    ///
    /// Returns the number of messages sent.
    pub async fn sweep_expired_locks(&self) -> usize {
        let out = self
            .coordinator
            .lock()
            .await
            .sweep_expired_locks(unix_timestamp());
        let sent = out.len();
        self.deliver(out);
        sent
    }

    /// Tell one device something went wrong.
    pub fn send_error(&self, to: DeviceId, file_id: Option<FileId>, message: String) {
        self.deliver(vec![Outgoing {
            to,
            message: Message::FileError(FileError { file_id, message }),
        }]);
    }

    /// Hand messages to their sessions' writers.
    ///
    /// Messages for devices without a live session are dropped; the device
    /// catches up from `file/registered` when it returns.
    fn deliver(&self, out: Vec<Outgoing>) {
        for Outgoing { to, message } in out {
            let Some(conn) = self.connections.get(&to) else {
                tracing::debug!("Dropping {} for offline device {}", message.kind(), to);
                continue;
            };
            match message.to_bytes() {
                Ok(bytes) => {
                    if conn.sender.send(bytes).is_err() {
                        tracing::debug!("Writer for {} closed", to);
                    }
                }
                Err(e) => {
                    self.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                }
            }
        }
    }

    /// Number of connected devices.
    pub fn total_sessions(&self) -> usize {
        self.connections.len()
    }

    /// Whether a device has a live session.
    pub fn is_connected(&self, device: DeviceId) -> bool {
        self.connections.contains_key(&device)
    }

    /// Number of files known to the coordinator.
    pub async fn file_count(&self) -> usize {
        self.coordinator.lock().await.file_count()
    }

    /// Number of live locks.
    pub async fn lock_count(&self) -> usize {
        self.coordinator.lock().await.lock_count()
    }
}
