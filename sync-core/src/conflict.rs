//! Conflict resolution between divergent heads.
//!
//! A conflict holds two candidate versions: the local head and an announced
//! remote version whose parent was not the local head. Resolution always
//! leaves both candidates in the history window; no path deletes a version.

use crate::history::{HistoryError, VersionHistory};
use sync_types::{DeviceId, VersionId, VersionRecord};
use thiserror::Error;

/// How the user chose to settle a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChoice {
    /// Publish the local content on top of the remote version.
    KeepLocal,
    /// Accept the remote version as head.
    TakeRemote,
    /// Keep both as siblings until one is designated head.
    KeepBoth,
}

/// The two heads in a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCandidates {
    /// Local candidate.
    pub local: VersionRecord,
    /// Announced remote candidate.
    pub remote: VersionRecord,
}

/// What a resolution produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A new head carrying local content, parented on the remote.
    KeepLocal {
        /// The new head, to be pushed.
        head: VersionRecord,
    },
    /// The remote became head; local content is retained as a version.
    TakeRemote {
        /// The new head.
        head: VersionRecord,
        /// The superseded local candidate.
        retained: VersionRecord,
    },
    /// Two siblings under a common parent; head still undecided.
    KeepBoth {
        /// Sibling carrying local content.
        local: VersionRecord,
        /// Sibling carrying remote content.
        remote: VersionRecord,
        /// Their shared parent.
        parent: Option<VersionId>,
    },
}

/// Errors from conflict handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// History rejected a candidate
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Designated head is not one of the siblings
    #[error("version {0} is not a conflict candidate")]
    NotACandidate(VersionId),
}

/// Make sure both candidates are in the window and protected from eviction.
pub fn retain_candidates(
    history: &mut VersionHistory,
    candidates: &ConflictCandidates,
) -> Result<(), ConflictError> {
    for record in [&candidates.local, &candidates.remote] {
        history.append(record.clone())?;
        history.pin(record.version_id);
    }
    Ok(())
}

/// Settle a conflict.
pub fn resolve(
    history: &mut VersionHistory,
    candidates: &ConflictCandidates,
    choice: ResolutionChoice,
    device_id: DeviceId,
    now: u64,
) -> Result<Resolution, ConflictError> {
    retain_candidates(history, candidates)?;
    let (local, remote) = (&candidates.local, &candidates.remote);

    let resolution = match choice {
        ResolutionChoice::KeepLocal => {
            let head = local.reparented(Some(remote.version_id), device_id, now);
            history.append_head(head.clone())?;
            release(history, candidates);
            Resolution::KeepLocal { head }
        }
        ResolutionChoice::TakeRemote => {
            history.advance_head(remote.version_id)?;
            release(history, candidates);
            Resolution::TakeRemote {
                head: remote.clone(),
                retained: local.clone(),
            }
        }
        ResolutionChoice::KeepBoth => {
            let parent = sibling_parent(history, local, remote);
            let local = sibling(history, local, parent, device_id, now)?;
            let remote = sibling(history, remote, parent, device_id, now)?;
            Resolution::KeepBoth {
                local,
                remote,
                parent,
            }
        }
    };
    Ok(resolution)
}

/// Pick one sibling of a `KeepBoth` resolution as head.
pub fn designate_head(
    history: &mut VersionHistory,
    siblings: (&VersionRecord, &VersionRecord),
    chosen: VersionId,
) -> Result<(), ConflictError> {
    if chosen != siblings.0.version_id && chosen != siblings.1.version_id {
        return Err(ConflictError::NotACandidate(chosen));
    }
    history.advance_head(chosen)?;
    history.unpin(siblings.0.version_id);
    history.unpin(siblings.1.version_id);
    Ok(())
}

fn release(history: &mut VersionHistory, candidates: &ConflictCandidates) {
    history.unpin(candidates.local.version_id);
    history.unpin(candidates.remote.version_id);
}

fn sibling_parent(
    history: &VersionHistory,
    local: &VersionRecord,
    remote: &VersionRecord,
) -> Option<VersionId> {
    match history.common_ancestor(local.version_id, remote.version_id) {
        // One candidate descends from the other: share the older one's parent.
        Some(id) if id == local.version_id || id == remote.version_id => {
            history.get(id).and_then(|r| r.parent_version_id)
        }
        other => other,
    }
}

fn sibling(
    history: &mut VersionHistory,
    candidate: &VersionRecord,
    parent: Option<VersionId>,
    device_id: DeviceId,
    now: u64,
) -> Result<VersionRecord, ConflictError> {
    let record = match parent {
        Some(p) if candidate.parent_version_id != Some(p) => {
            candidate.reparented(Some(p), device_id, now)
        }
        _ => candidate.clone(),
    };
    history.append(record.clone())?;
    history.pin(record.version_id);
    Ok(record)
}
