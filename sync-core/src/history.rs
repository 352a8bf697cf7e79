//! Bounded, append-only version history for one file.
//!
//! New records must name a parent already in the window (only the first
//! record of a file may have no parent). Every accepted record receives a
//! per-file revision number, so acceptance order never depends on device
//! clocks. Eviction drops the oldest records first and never touches the
//! head or pinned conflict candidates. Evicting a record only forgets its
//! metadata here; stored content lives elsewhere and is never deleted.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use sync_types::{FileId, VersionId, VersionRecord};
use thiserror::Error;

/// How many versions a window keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum records kept in the window.
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
    /// Records older than this (seconds) are evicted by [`VersionHistory::apply_retention`].
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

fn default_max_versions() -> usize {
    32
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_versions: default_max_versions(),
            max_age_secs: None,
        }
    }
}

/// Errors from history operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// Record belongs to a different file
    #[error("version {version} belongs to file {actual}, not {expected}")]
    WrongFile {
        /// Version offered
        version: VersionId,
        /// This history's file
        expected: FileId,
        /// The record's file
        actual: FileId,
    },

    /// Parent is not in the window
    #[error("parent {parent} of version {version} is not in the history window")]
    MissingParent {
        /// Version offered
        version: VersionId,
        /// Its unknown parent
        parent: VersionId,
    },

    /// A parentless record offered to a non-empty window
    #[error("version {0} has no parent but the file already has history")]
    UnexpectedRoot(VersionId),

    /// Version not in the window
    #[error("unknown version {0}")]
    UnknownVersion(VersionId),
}

/// Result alias for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Clone)]
struct Entry {
    revision: u64,
    record: VersionRecord,
}

/// The version window of one file.
#[derive(Debug, Clone)]
pub struct VersionHistory {
    file_id: FileId,
    entries: VecDeque<Entry>,
    head: Option<VersionId>,
    pinned: HashSet<VersionId>,
    next_revision: u64,
    policy: RetentionPolicy,
}

impl VersionHistory {
    /// Empty history for a file.
    pub fn new(file_id: FileId, policy: RetentionPolicy) -> Self {
        Self {
            file_id,
            entries: VecDeque::new(),
            head: None,
            pinned: HashSet::new(),
            next_revision: 1,
            policy,
        }
    }

    /// Rebuild a history from a persisted window (oldest first).
    ///
    /// The oldest record's parent may have been evicted already; later
    /// records must link into the window.
    pub fn restore(
        file_id: FileId,
        records: Vec<VersionRecord>,
        head: Option<VersionId>,
        policy: RetentionPolicy,
    ) -> HistoryResult<Self> {
        let mut history = Self::new(file_id, policy);
        history.adopt(&records)?;
        if let Some(head) = head {
            history.advance_head(head)?;
        }
        Ok(history)
    }

    /// File this history belongs to.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Current head id.
    pub fn head_id(&self) -> Option<VersionId> {
        self.head
    }

    /// Current head record.
    pub fn head(&self) -> Option<&VersionRecord> {
        self.head.and_then(|id| self.get(id))
    }

    /// Look up a record in the window.
    pub fn get(&self, id: VersionId) -> Option<&VersionRecord> {
        self.entries
            .iter()
            .find(|e| e.record.version_id == id)
            .map(|e| &e.record)
    }

    /// Whether a record is in the window.
    pub fn contains(&self, id: VersionId) -> bool {
        self.get(id).is_some()
    }

    /// Acceptance revision of a record.
    pub fn revision_of(&self, id: VersionId) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.record.version_id == id)
            .map(|e| e.revision)
    }

    /// Number of records in the window.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &VersionRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    /// Append a record. Returns `false` if it was already present.
    pub fn append(&mut self, record: VersionRecord) -> HistoryResult<bool> {
        let id = record.version_id;
        let inserted = self.insert(record)?;
        self.evict_over_capacity(Some(id));
        Ok(inserted)
    }

    /// Append a record and make it the head.
    pub fn append_head(&mut self, record: VersionRecord) -> HistoryResult<bool> {
        let id = record.version_id;
        let inserted = self.insert(record)?;
        self.head = Some(id);
        self.evict_over_capacity(None);
        Ok(inserted)
    }

    /// Designate an existing record as head.
    pub fn advance_head(&mut self, id: VersionId) -> HistoryResult<()> {
        if !self.contains(id) {
            return Err(HistoryError::UnknownVersion(id));
        }
        self.head = Some(id);
        Ok(())
    }

    /// Merge another replica's window (oldest first).
    ///
    /// Records already present are skipped. The first record of `records`
    /// may be detached (its parent evicted upstream) if nothing in this
    /// window links it; everything after it must link. Returns the number of
    /// records added.
    pub fn adopt(&mut self, records: &[VersionRecord]) -> HistoryResult<usize> {
        let mut added = 0;
        for (index, record) in records.iter().enumerate() {
            if self.contains(record.version_id) {
                continue;
            }
            let links = match record.parent_version_id {
                None => self.entries.is_empty(),
                Some(parent) => self.contains(parent),
            };
            if links {
                self.insert(record.clone())?;
            } else if index == 0 {
                if record.file_id != self.file_id {
                    return Err(HistoryError::WrongFile {
                        version: record.version_id,
                        expected: self.file_id,
                        actual: record.file_id,
                    });
                }
                self.push(record.clone());
            } else {
                return Err(HistoryError::MissingParent {
                    version: record.version_id,
                    parent: record.parent_version_id.unwrap_or(record.version_id),
                });
            }
            added += 1;
        }
        self.evict_over_capacity(None);
        Ok(added)
    }

    /// Protect a record from eviction (conflict candidates).
    pub fn pin(&mut self, id: VersionId) {
        self.pinned.insert(id);
    }

    /// Remove eviction protection.
    pub fn unpin(&mut self, id: VersionId) {
        self.pinned.remove(&id);
    }

    /// Whether `ancestor` is `descendant` or one of its ancestors in the window.
    pub fn is_ancestor(&self, ancestor: VersionId, descendant: VersionId) -> bool {
        self.lineage(descendant).any(|id| id == ancestor)
    }

    /// Nearest record that is an ancestor of both `a` and `b` (or either itself).
    pub fn common_ancestor(&self, a: VersionId, b: VersionId) -> Option<VersionId> {
        let ancestors: HashSet<VersionId> = self.lineage(a).collect();
        self.lineage(b).find(|id| ancestors.contains(id))
    }

    /// Evict records older than the policy's maximum age.
    ///
    /// Returns the evicted records.
    pub fn apply_retention(&mut self, now: u64) -> Vec<VersionRecord> {
        let mut evicted = self.evict_over_capacity(None);
        if let Some(max_age) = self.policy.max_age_secs {
            let cutoff = now.saturating_sub(max_age);
            let mut kept = VecDeque::with_capacity(self.entries.len());
            for entry in self.entries.drain(..) {
                let protected = Some(entry.record.version_id) == self.head
                    || self.pinned.contains(&entry.record.version_id);
                if entry.record.timestamp < cutoff && !protected {
                    evicted.push(entry.record);
                } else {
                    kept.push_back(entry);
                }
            }
            self.entries = kept;
        }
        evicted
    }

    fn insert(&mut self, record: VersionRecord) -> HistoryResult<bool> {
        if record.file_id != self.file_id {
            return Err(HistoryError::WrongFile {
                version: record.version_id,
                expected: self.file_id,
                actual: record.file_id,
            });
        }
        if self.contains(record.version_id) {
            return Ok(false);
        }
        match record.parent_version_id {
            None if !self.entries.is_empty() => {
                return Err(HistoryError::UnexpectedRoot(record.version_id))
            }
            Some(parent) if !self.contains(parent) => {
                return Err(HistoryError::MissingParent {
                    version: record.version_id,
                    parent,
                })
            }
            _ => {}
        }
        self.push(record);
        Ok(true)
    }

    fn push(&mut self, record: VersionRecord) {
        let revision = self.next_revision;
        self.next_revision += 1;
        self.entries.push_back(Entry { revision, record });
    }

    fn evict_over_capacity(&mut self, keep: Option<VersionId>) -> Vec<VersionRecord> {
        let mut evicted = Vec::new();
        let max = self.policy.max_versions.max(1);
        while self.entries.len() > max {
            let victim = self.entries.iter().position(|e| {
                let id = e.record.version_id;
                Some(id) != self.head && Some(id) != keep && !self.pinned.contains(&id)
            });
            match victim.and_then(|index| self.entries.remove(index)) {
                Some(entry) => evicted.push(entry.record),
                None => break,
            }
        }
        evicted
    }

    fn lineage(&self, start: VersionId) -> impl Iterator<Item = VersionId> + '_ {
        let mut next = self.get(start).map(|r| r.version_id);
        let mut steps = 0;
        std::iter::from_fn(move || {
            let current = next?;
            steps += 1;
            if steps > self.entries.len() {
                return None;
            }
            next = self.get(current).and_then(|r| r.parent_version_id);
            Some(current)
        })
    }
}
