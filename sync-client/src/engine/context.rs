//! Per-file engine state.

use std::path::PathBuf;
use sync_core::{
    ConflictCandidates, FileSync, HistoryError, InboundTransfer, OutboundTransfer,
    RetentionPolicy, SyncPolicy, SyncState, TransferSession, VersionHistory,
};
use sync_types::{DeviceId, FileId, FileSyncState, LockRecord, VersionId, VersionRecord};

/// Everything the engine tracks for one file, guarded by one async mutex.
#[derive(Debug)]
pub(crate) struct FileContext {
    pub(crate) file_id: FileId,
    pub(crate) path: PathBuf,
    pub(crate) machine: FileSync,
    pub(crate) history: VersionHistory,
    pub(crate) members: Vec<DeviceId>,
    pub(crate) lock: Option<LockRecord>,
    pub(crate) inbound: Option<InboundTransfer>,
    pub(crate) outbound: Option<OutboundTransfer>,
    /// When the current push or pull last started or resumed.
    pub(crate) transfer_started: u64,
    pub(crate) conflict: Option<ConflictCandidates>,
    /// Kept-both siblings awaiting a designated head.
    pub(crate) siblings: Option<(VersionRecord, VersionRecord)>,
    /// Bumped per scheduled retry; stale timers are ignored.
    pub(crate) retry_generation: u64,
    /// Head recorded in the registry before a restart, adopted once the
    /// relay's history names it.
    pub(crate) restored_head: Option<VersionId>,
    /// State and head last reported to the relay.
    pub(crate) reported: Option<(FileSyncState, Option<VersionId>)>,
}

impl FileContext {
    pub(crate) fn new(
        file_id: FileId,
        path: PathBuf,
        policy: SyncPolicy,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            file_id,
            path,
            machine: FileSync::new(file_id, policy),
            history: VersionHistory::new(file_id, retention),
            members: Vec::new(),
            lock: None,
            inbound: None,
            outbound: None,
            transfer_started: 0,
            conflict: None,
            siblings: None,
            retry_generation: 0,
            restored_head: None,
            reported: None,
        }
    }

    /// Whether `owner` holds the current lock.
    pub(crate) fn lock_held_by(&self, owner: DeviceId) -> bool {
        self.lock
            .as_ref()
            .is_some_and(|l| l.owner_device_id == owner)
    }

    /// Whether an announced version is already at or behind the effective head.
    pub(crate) fn is_stale(&self, version: &VersionRecord) -> bool {
        let Some(head) = self.machine.effective_head() else {
            return false;
        };
        head.version_id == version.version_id
            || self.history.is_ancestor(version.version_id, head.version_id)
    }

    /// Whether the history shows `version` descending from the effective head.
    pub(crate) fn descends_from_head(&self, version: &VersionRecord) -> bool {
        match (self.machine.effective_head(), version.parent_version_id) {
            (Some(head), Some(parent)) => self.history.is_ancestor(head.version_id, parent),
            _ => false,
        }
    }

    /// Add a foreign record to the window without moving the head.
    pub(crate) fn remember(&mut self, record: &VersionRecord) -> Result<(), HistoryError> {
        if self.history.append(record.clone()).is_err() {
            self.history.adopt(std::slice::from_ref(record))?;
        }
        Ok(())
    }

    /// Add a record (if needed) and make it the head.
    pub(crate) fn set_head(&mut self, record: &VersionRecord) -> Result<(), HistoryError> {
        if self.history.append_head(record.clone()).is_err() {
            self.history.adopt(std::slice::from_ref(record))?;
            self.history.advance_head(record.version_id)?;
        }
        Ok(())
    }

    /// Remote version the machine is pulling, if any.
    pub(crate) fn pulling(&self) -> Option<&VersionRecord> {
        match self.machine.state() {
            SyncState::Pulling { remote, .. } => Some(remote),
            _ => None,
        }
    }

    /// Error message of the current state.
    pub(crate) fn error(&self) -> Option<String> {
        match self.machine.state() {
            SyncState::Error { message, .. } => Some(message.clone()),
            _ => None,
        }
    }

    /// Observable sessions in flight.
    pub(crate) fn sessions(&self) -> Vec<TransferSession> {
        self.outbound
            .iter()
            .map(|o| o.summary())
            .chain(self.inbound.iter().map(|i| i.summary()))
            .collect()
    }
}
