//! SyncEngine - the device side of Atrius Sync.
//!
//! This module provides [`SyncEngine`], which keeps the local copies of a
//! set of files in step with a relay.
//!
//! # Architecture
//!
//! Each file has a pure state machine (from sync-core). The engine feeds it
//! events (local edits, relay messages, timers), executes the actions it
//! returns (snapshots, lock requests, chunk streams, disk writes) and feeds
//! the outcomes back as further events.
//!
//! ```text
//! Watcher ─┐
//!          ├→ SyncEngine → Transport → Relay
//! Relay  ──┘      ↓
//!         sync-core (pure state machine per file)
//! ```
//!
//! Per-file state lives behind its own async mutex, so work on one file
//! never waits on another.
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{ClientConfig, SyncEngine, TcpTransport};
//!
//! let config = ClientConfig::from_file(Path::new("atrius.toml"))?;
//! let transport = TcpTransport::new(config.connect_timeout());
//! let engine = Arc::new(SyncEngine::open(config, transport).await?);
//!
//! engine.connect().await?;
//! let file_id = engine.add_file("/work/report.docx").await?;
//! tokio::spawn({
//!     let engine = engine.clone();
//!     async move { engine.run().await }
//! });
//! ```

mod actions;
mod context;
mod messages;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::registry::{JsonFileRegistry, LocalRegistry, RegistryEntry};
use crate::transport::{Transport, TransportError};
use crate::watcher::{FileEvent, FileEventKind};
use context::FileContext;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_content::{BlobStore, FsBlobStore, SnapshotStore};
use sync_core::{
    conflict, describe, ConflictError, Event, Resolution, ResolutionChoice, SyncEvent,
    SyncState, TransferSession,
};
use sync_types::{
    unix_timestamp, Bye, ContentHash, DeviceId, DeviceRegister, FileId, FileRegister,
    FileSyncState, LockAcquire, LockMode, LockRecord, LockRelease, Message, VersionId,
    VersionRecord,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// A scheduled retry came due.
#[derive(Debug, Clone, Copy)]
struct RetryDue {
    file_id: FileId,
    generation: u64,
}

/// Snapshot of one file's sync status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// File identity.
    pub file_id: FileId,
    /// Current local path.
    pub path: PathBuf,
    /// Visible sync state.
    pub state: FileSyncState,
    /// Head whose content is on disk.
    pub head: Option<VersionId>,
    /// Current lock, if any.
    pub lock: Option<LockRecord>,
    /// Devices sharing the file.
    pub members: Vec<DeviceId>,
    /// Conflict candidates (local, remote) awaiting a decision.
    pub conflict: Option<(VersionId, VersionId)>,
    /// Error message when in the error state.
    pub error: Option<String>,
}

/// The device engine.
///
/// Owns the connection to the relay, the local registry and snapshot
/// store, and one state machine per tracked file.
pub struct SyncEngine<T: Transport, R: LocalRegistry, S: BlobStore> {
    config: ClientConfig,
    device_id: DeviceId,
    transport: T,
    registry: R,
    snapshots: SnapshotStore<S>,
    files: DashMap<FileId, Arc<Mutex<FileContext>>>,
    events: broadcast::Sender<SyncEvent>,
    timers: mpsc::UnboundedSender<RetryDue>,
    timer_rx: Mutex<mpsc::UnboundedReceiver<RetryDue>>,
    connected: AtomicBool,
}

impl<T: Transport> SyncEngine<T, JsonFileRegistry, FsBlobStore> {
    /// Open the engine's persistent state under `config.device.data_dir`.
    ///
    /// The device id is created on first use and kept in `device.id`.
    pub async fn open(config: ClientConfig, transport: T) -> Result<Self> {
        let device_id = load_device_id(&config.device.data_dir).await?;
        let registry = JsonFileRegistry::open(config.registry_path()).await?;
        let blobs = FsBlobStore::open(config.blob_dir()).await?;
        let snapshots = SnapshotStore::open(blobs, config.snapshot_index_path()).await?;
        let engine = Self::new(config, device_id, transport, registry, snapshots);
        engine.restore().await?;
        Ok(engine)
    }
}

impl<T: Transport, R: LocalRegistry, S: BlobStore> SyncEngine<T, R, S> {
    /// Create an engine from its parts.
    pub fn new(
        config: ClientConfig,
        device_id: DeviceId,
        transport: T,
        registry: R,
        snapshots: SnapshotStore<S>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (timers, timer_rx) = mpsc::unbounded_channel();
        Self {
            config,
            device_id,
            transport,
            registry,
            snapshots,
            files: DashMap::new(),
            events,
            timers,
            timer_rx: Mutex::new(timer_rx),
            connected: AtomicBool::new(false),
        }
    }

    /// Recreate per-file state for every registry entry.
    ///
    /// Heads are re-attached once the relay's history arrives.
    pub async fn restore(&self) -> Result<usize> {
        let entries = self.registry.entries().await?;
        let count = entries.len();
        for entry in entries {
            let mut ctx = self.new_context(&entry);
            ctx.restored_head = entry.head_version_id;
            self.files
                .insert(entry.file_id, Arc::new(Mutex::new(ctx)));
        }
        if count > 0 {
            info!("Restored {} tracked files", count);
        }
        Ok(count)
    }

    /// This device's id.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Subscribe to sync events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Local snapshot store.
    pub fn snapshots(&self) -> &SnapshotStore<S> {
        &self.snapshots
    }

    /// Local registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Whether the relay connection is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_connected()
    }

    /// Tracked files.
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.files.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // ===========================================
    // Connection
    // ===========================================

    /// Connect to the relay, register this device and re-register every
    /// tracked file.
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect(&self.config.relay.address).await?;
        self.send(Message::DeviceRegister(DeviceRegister {
            device_id: Some(self.device_id),
            name: Some(self.config.device.name.clone()),
        }))
        .await?;

        let reply = tokio::time::timeout(self.config.request_timeout(), self.transport.recv())
            .await
            .map_err(|_| ClientError::Timeout("device/registered"))??;
        match Message::decode(&reply)? {
            Message::DeviceRegistered(m) if m.device_id == self.device_id => {}
            Message::DeviceRegistered(m) => {
                return Err(ClientError::Protocol(format!(
                    "relay registered device as {} instead of {}",
                    m.device_id, self.device_id
                )))
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected device/registered, got {}",
                    other.kind()
                )))
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(device = %self.device_id, relay = %self.config.relay.address, "Connected to relay");

        for file_id in self.file_ids() {
            let Some(ctx) = self.context(file_id) else {
                continue;
            };
            let mut ctx = ctx.lock().await;
            ctx.reported = None;
            self.register_file(&ctx).await?;
            // A lock reply lost with the old connection is asked for again.
            if matches!(
                ctx.machine.state(),
                SyncState::Error { pending: Some(_), .. } | SyncState::Locking { .. }
            ) {
                self.dispatch(&mut ctx, Event::RetryRequested).await;
            }
        }
        Ok(())
    }

    /// Say goodbye and close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        if self.is_connected() {
            // Best effort: the relay treats a dropped connection the same way.
            let _ = self
                .send(Message::Bye(Bye {
                    reason: Some("client disconnect".into()),
                }))
                .await;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.transport.close().await?;
        Ok(())
    }

    /// Process relay messages, retry timers and stall checks until the
    /// connection drops.
    pub async fn run(self: Arc<Self>) -> Result<()>
    where
        T: 'static,
        R: 'static,
        S: 'static,
    {
        let background = tokio::spawn({
            let engine = Arc::clone(&self);
            async move { engine.run_timers().await }
        });

        let result = loop {
            match self.transport.recv().await {
                Ok(bytes) => match Message::decode(&bytes) {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => warn!("Dropping malformed message: {}", e),
                },
                Err(TransportError::ConnectionClosed) => {
                    info!("Relay closed the connection");
                    break Ok(());
                }
                Err(e) => break Err(e.into()),
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        background.abort();
        result
    }

    async fn run_timers(&self) {
        let mut timers = self.timer_rx.lock().await;
        let mut stall = tokio::time::interval(STALL_CHECK_INTERVAL);
        loop {
            tokio::select! {
                due = timers.recv() => match due {
                    Some(due) => self.retry_due(due.file_id, due.generation).await,
                    None => return,
                },
                _ = stall.tick() => self.check_stalled(unix_timestamp()).await,
            }
        }
    }

    /// Forward watcher events to the engine until the watcher stops.
    pub async fn run_watcher(&self, mut events: mpsc::UnboundedReceiver<FileEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.on_path_event(event).await {
                warn!("File event failed: {}", e);
            }
        }
    }

    // ===========================================
    // Tracking files
    // ===========================================

    /// Start tracking a local file and publish its current content.
    pub async fn add_file(&self, path: impl AsRef<Path>) -> Result<FileId> {
        let path = path.as_ref().to_path_buf();
        tokio::fs::metadata(&path).await?;

        let file_id = FileId::new();
        let entry = RegistryEntry::new(file_id, &path);
        self.registry.bind(entry.clone()).await?;
        let ctx = self.new_context(&entry);
        self.files.insert(file_id, Arc::new(Mutex::new(ctx)));
        info!(file = %file_id, path = %path.display(), "Tracking file");

        if let Some(ctx) = self.context(file_id) {
            let ctx = ctx.lock().await;
            self.register_file(&ctx).await?;
        }
        self.on_local_change(file_id).await?;
        Ok(file_id)
    }

    /// Track a file another device shares, materialising it at `path`.
    pub async fn track_remote(&self, file_id: FileId, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let entry = RegistryEntry::new(file_id, &path);
        self.registry.bind(entry.clone()).await?;
        let ctx = self.new_context(&entry);
        self.files.insert(file_id, Arc::new(Mutex::new(ctx)));
        info!(file = %file_id, path = %path.display(), "Tracking remote file");

        if let Some(ctx) = self.context(file_id) {
            let ctx = ctx.lock().await;
            self.register_file(&ctx).await?;
        }
        Ok(())
    }

    /// Re-read a file after a local edit and publish it if it changed.
    ///
    /// Returns the new version, or `None` when content matches the last
    /// recorded version.
    pub async fn on_local_change(&self, file_id: FileId) -> Result<Option<VersionId>> {
        let ctx = self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        let mut ctx = ctx.lock().await;
        let Some(version) = self.capture(&ctx).await? else {
            return Ok(None);
        };
        let id = version.version_id;
        debug!(file = %file_id, version = %id, "Local change");
        self.dispatch(&mut ctx, Event::LocalChange { version }).await;
        Ok(Some(id))
    }

    /// Route a watcher event to the file bound to its path.
    pub async fn on_path_event(&self, event: FileEvent) -> Result<()> {
        match event.kind {
            FileEventKind::Created | FileEventKind::Modified => {
                if let Some(entry) = self.registry.find_by_path(&event.path).await? {
                    self.on_local_change(entry.file_id).await?;
                }
            }
            FileEventKind::Renamed { from } => {
                if let Some(entry) = self.registry.find_by_path(&from).await? {
                    self.registry.rebind(entry.file_id, &event.path).await?;
                    if let Some(ctx) = self.context(entry.file_id) {
                        ctx.lock().await.path = event.path.clone();
                    }
                    info!(file = %entry.file_id, to = %event.path.display(), "File moved");
                }
            }
            FileEventKind::Removed => {
                debug!(path = %event.path.display(), "Removal ignored; deletions do not sync");
            }
        }
        Ok(())
    }

    // ===========================================
    // User operations
    // ===========================================

    /// Fetch an available remote version (when auto-pull is off).
    pub async fn pull(&self, file_id: FileId) -> Result<()> {
        self.feed(file_id, Event::PullRequested).await
    }

    /// Retry after an error.
    pub async fn retry(&self, file_id: FileId) -> Result<()> {
        self.feed(file_id, Event::RetryRequested).await
    }

    /// Take the file lock manually.
    pub async fn lock_file(&self, file_id: FileId) -> Result<()> {
        self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        self.send(Message::LockAcquire(LockAcquire {
            file_id,
            device_id: self.device_id,
            user_id: self.config.device.user_id.clone(),
            mode: LockMode::Exclusive,
            auto_lock: false,
        }))
        .await
    }

    /// Release the file lock, or break another device's lock with
    /// [`LockMode::Override`].
    pub async fn unlock_file(&self, file_id: FileId, mode: LockMode) -> Result<()> {
        self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        self.send(Message::LockRelease(LockRelease {
            file_id,
            device_id: self.device_id,
            mode,
        }))
        .await
    }

    /// Settle a conflict.
    ///
    /// `TakeRemote` and `KeepBoth` need the remote candidate's content; if it
    /// has not arrived yet the missing chunks are requested and
    /// [`ClientError::MissingContent`] is returned.
    pub async fn resolve_conflict(
        &self,
        file_id: FileId,
        choice: ResolutionChoice,
    ) -> Result<Resolution> {
        let ctx = self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        let mut ctx = ctx.lock().await;
        let candidates = match (&ctx.conflict, ctx.machine.state()) {
            (Some(c), SyncState::Conflict { .. }) => c.clone(),
            _ => return Err(ClientError::NotInConflict(file_id)),
        };
        if choice != ResolutionChoice::KeepLocal
            && !self.ensure_content(&mut ctx, &candidates.remote).await
        {
            return Err(ClientError::MissingContent {
                file_id,
                version: candidates.remote.version_id,
            });
        }

        let resolution = conflict::resolve(
            &mut ctx.history,
            &candidates,
            choice,
            self.device_id,
            unix_timestamp(),
        )?;
        match &resolution {
            Resolution::KeepLocal { head } => {
                self.snapshots.link(head).await?;
                ctx.conflict = None;
            }
            Resolution::TakeRemote { .. } => ctx.conflict = None,
            Resolution::KeepBoth { local, remote, .. } => {
                self.snapshots.link(local).await?;
                self.snapshots.link(remote).await?;
                ctx.siblings = Some((local.clone(), remote.clone()));
            }
        }
        info!(file = %file_id, ?choice, "Conflict resolved");
        self.dispatch(
            &mut ctx,
            Event::ConflictResolved {
                resolution: resolution.clone(),
            },
        )
        .await;
        Ok(resolution)
    }

    /// Pick one of two kept siblings as head.
    ///
    /// The remote sibling resolves to the relay's version; the local one is
    /// re-published on top of it.
    pub async fn designate_head(&self, file_id: FileId, chosen: VersionId) -> Result<VersionId> {
        let ctx = self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        let mut ctx = ctx.lock().await;
        let (Some((local, remote)), Some(candidates)) = (ctx.siblings.clone(), ctx.conflict.clone())
        else {
            return Err(ClientError::NotInConflict(file_id));
        };
        let now = unix_timestamp();

        let (head, publish) = if chosen == remote.version_id {
            if remote.version_id == candidates.remote.version_id {
                conflict::designate_head(&mut ctx.history, (&local, &remote), chosen)?;
            } else {
                conflict::resolve(
                    &mut ctx.history,
                    &candidates,
                    ResolutionChoice::TakeRemote,
                    self.device_id,
                    now,
                )?;
            }
            (candidates.remote.clone(), false)
        } else if chosen == local.version_id {
            let Resolution::KeepLocal { head } = conflict::resolve(
                &mut ctx.history,
                &candidates,
                ResolutionChoice::KeepLocal,
                self.device_id,
                now,
            )?
            else {
                return Err(ClientError::Protocol("keep-local produced no head".into()));
            };
            self.snapshots.link(&head).await?;
            (head, true)
        } else {
            return Err(ConflictError::NotACandidate(chosen).into());
        };

        for id in [local.version_id, remote.version_id] {
            ctx.history.unpin(id);
        }
        ctx.siblings = None;
        ctx.conflict = None;
        let id = head.version_id;
        info!(file = %file_id, head = %id, "Head designated");
        self.dispatch(&mut ctx, Event::HeadDesignated { head, publish })
            .await;
        Ok(id)
    }

    /// Restore an earlier version's content as a new version.
    ///
    /// Any unrecorded edit on disk is recorded first so nothing is lost.
    pub async fn rollback(&self, file_id: FileId, target: VersionId) -> Result<VersionId> {
        let ctx = self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        let mut ctx = ctx.lock().await;
        let content = self.snapshots.get(file_id, target).await?;

        if let Some(version) = self.capture(&ctx).await? {
            self.dispatch(&mut ctx, Event::LocalChange { version }).await;
        }

        let parent = ctx.machine.local_parent().map(|v| v.version_id);
        let version = describe(
            file_id,
            parent,
            self.device_id,
            unix_timestamp(),
            &content,
            self.config.chunk_size(),
        );
        self.snapshots.put(&version, &content).await?;
        actions::write_atomic(&ctx.path, &content).await?;
        let id = version.version_id;
        info!(file = %file_id, from = %target, version = %id, "Rolled back");
        self.dispatch(&mut ctx, Event::LocalChange { version }).await;
        Ok(id)
    }

    // ===========================================
    // Inspection
    // ===========================================

    /// Status of a file.
    pub async fn status(&self, file_id: FileId) -> Option<FileStatus> {
        let ctx = self.context(file_id)?;
        let ctx = ctx.lock().await;
        let conflict = match ctx.machine.state() {
            SyncState::Conflict { local, remote, .. } => {
                Some((local.version_id, remote.version_id))
            }
            _ => None,
        };
        Some(FileStatus {
            file_id,
            path: ctx.path.clone(),
            state: ctx.machine.state().kind(),
            head: ctx.machine.head().map(|v| v.version_id),
            lock: ctx.lock.clone(),
            members: ctx.members.clone(),
            conflict,
            error: ctx.error(),
        })
    }

    /// Version window of a file, oldest first.
    pub async fn history(&self, file_id: FileId) -> Vec<VersionRecord> {
        match self.context(file_id) {
            Some(ctx) => ctx.lock().await.history.records().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Transfer sessions in flight for a file.
    pub async fn transfers(&self, file_id: FileId) -> Vec<TransferSession> {
        match self.context(file_id) {
            Some(ctx) => ctx.lock().await.sessions(),
            None => Vec::new(),
        }
    }

    // ===========================================
    // Timers
    // ===========================================

    /// Fail transfers that made no progress within the stall timeout.
    ///
    /// A lock request left unanswered for as long counts as stalled too.
    pub async fn check_stalled(&self, now: u64) {
        let timeout = self.config.sync.stall_timeout_secs;
        for file_id in self.file_ids() {
            let Some(ctx) = self.context(file_id) else {
                continue;
            };
            let mut ctx = ctx.lock().await;
            let stalled = match ctx.machine.state() {
                SyncState::Pulling { .. } => match &ctx.inbound {
                    Some(inbound) => inbound.is_stalled(now, timeout),
                    None => now.saturating_sub(ctx.transfer_started) > timeout,
                },
                SyncState::Pushing { .. } | SyncState::Locking { .. } => {
                    now.saturating_sub(ctx.transfer_started) > timeout
                }
                _ => false,
            };
            if stalled {
                warn!(file = %file_id, "Transfer stalled");
                ctx.transfer_started = now;
                self.dispatch(
                    &mut ctx,
                    Event::TransferFailed {
                        reason: "transfer stalled".into(),
                    },
                )
                .await;
            }
        }
    }

    /// Fire the retry scheduled with `generation`, unless a newer one
    /// replaced it.
    pub async fn retry_due(&self, file_id: FileId, generation: u64) {
        let Some(ctx) = self.context(file_id) else {
            return;
        };
        let mut ctx = ctx.lock().await;
        if ctx.retry_generation == generation {
            self.dispatch(&mut ctx, Event::RetryTimer).await;
        }
    }

    // ===========================================
    // Internals
    // ===========================================

    fn context(&self, file_id: FileId) -> Option<Arc<Mutex<FileContext>>> {
        self.files.get(&file_id).map(|e| Arc::clone(e.value()))
    }

    fn new_context(&self, entry: &RegistryEntry) -> FileContext {
        FileContext::new(
            entry.file_id,
            entry.path.clone(),
            self.config.policy(entry.auto_lock),
            self.config.retention.clone(),
        )
    }

    async fn feed(&self, file_id: FileId, event: Event) -> Result<()> {
        let ctx = self.context(file_id).ok_or(ClientError::UnknownFile(file_id))?;
        let mut ctx = ctx.lock().await;
        self.dispatch(&mut ctx, event).await;
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<()> {
        let bytes = message.to_bytes()?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    async fn register_file(&self, ctx: &FileContext) -> Result<()> {
        if !self.transport.is_connected() {
            return Ok(());
        }
        let (size, mtime) = match tokio::fs::metadata(&ctx.path).await {
            Ok(meta) => (meta.len(), actions::mtime_secs(&meta)),
            Err(_) => (0, 0),
        };
        self.send(Message::FileRegister(FileRegister {
            file_id: ctx.file_id,
            size,
            mtime,
        }))
        .await
    }

    /// Describe unrecorded disk content as a new version.
    ///
    /// Returns `None` when the file is missing or matches the version a new
    /// edit would descend from.
    async fn capture(&self, ctx: &FileContext) -> Result<Option<VersionRecord>> {
        let content = match tokio::fs::read(&ctx.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let parent = ctx.machine.local_parent();
        if parent.is_some_and(|p| p.content_hash == ContentHash::of(&content)) {
            return Ok(None);
        }
        let version = describe(
            ctx.file_id,
            parent.map(|p| p.version_id),
            self.device_id,
            unix_timestamp(),
            &content,
            self.config.chunk_size(),
        );
        self.snapshots.put(&version, &content).await?;
        Ok(Some(version))
    }
}

async fn load_device_id(data_dir: &Path) -> Result<DeviceId> {
    let path = data_dir.join("device.id");
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => hex::decode(text.trim())
            .ok()
            .and_then(|bytes| DeviceId::from_bytes(&bytes))
            .ok_or_else(|| ClientError::Protocol(format!("malformed device id in {}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = DeviceId::random();
            tokio::fs::create_dir_all(data_dir).await?;
            tokio::fs::write(&path, hex::encode(id.as_bytes())).await?;
            Ok(id)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests;
