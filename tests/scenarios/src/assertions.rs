//! Assertion helpers for scenario tests.
//!
//! Pure functions over state collected from the network, so a failing
//! property reports what it saw rather than just `false`.

use sync_client::FileStatus;
use sync_core::SyncEvent;
use sync_types::{FileId, FileSyncState, VersionId, VersionRecord};
use tokio::sync::broadcast;

/// Result of an assertion check.
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// Whether the assertion passed
    pub passed: bool,
    /// Description of what was checked
    pub description: String,
    /// Details on failure
    pub failure_details: Option<String>,
}

impl AssertionResult {
    /// Create a passing result.
    pub fn pass(description: &str) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            failure_details: None,
        }
    }

    /// Create a failing result.
    pub fn fail(description: &str, details: String) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            failure_details: Some(details),
        }
    }

    /// Panic with the details if the check failed.
    pub fn assert(&self) {
        if !self.passed {
            panic!(
                "{}: {}",
                self.description,
                self.failure_details.as_deref().unwrap_or("failed")
            );
        }
    }
}

/// Every device is ready on the same head.
pub fn assert_single_head(statuses: &[FileStatus]) -> AssertionResult {
    let description = "single head";
    let Some(first) = statuses.first() else {
        return AssertionResult::fail(description, "no statuses".into());
    };
    for status in statuses {
        if status.state != FileSyncState::Ready {
            return AssertionResult::fail(
                description,
                format!("{} is {:?}", status.path.display(), status.state),
            );
        }
        if status.head != first.head || status.head.is_none() {
            return AssertionResult::fail(
                description,
                format!("heads differ: {:?} vs {:?}", first.head, status.head),
            );
        }
    }
    AssertionResult::pass(description)
}

/// `expected` occurs in `observed` in order, not necessarily adjacent.
pub fn assert_transitions(observed: &[FileSyncState], expected: &[FileSyncState]) -> AssertionResult {
    let description = "state transitions";
    let mut remaining = observed.iter();
    for state in expected {
        if !remaining.any(|s| s == state) {
            return AssertionResult::fail(
                description,
                format!("expected {:?} within {:?}", expected, observed),
            );
        }
    }
    AssertionResult::pass(description)
}

/// Both versions are siblings of `parent`.
pub fn assert_siblings(
    history: &[VersionRecord],
    a: VersionId,
    b: VersionId,
    parent: VersionId,
) -> AssertionResult {
    let description = "sibling versions";
    for id in [a, b] {
        match history.iter().find(|r| r.version_id == id) {
            None => {
                return AssertionResult::fail(description, format!("{} missing from history", id))
            }
            Some(record) if record.parent_version_id != Some(parent) => {
                return AssertionResult::fail(
                    description,
                    format!(
                        "{} descends from {:?}, not {}",
                        id, record.parent_version_id, parent
                    ),
                )
            }
            Some(_) => {}
        }
    }
    AssertionResult::pass(description)
}

/// Visible state changes of one file received so far.
pub fn drain_state_changes(
    events: &mut broadcast::Receiver<SyncEvent>,
    file_id: FileId,
) -> Vec<FileSyncState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::StateChanged { file_id: f, state } = event {
            if f == file_id {
                states.push(state);
            }
        }
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use FileSyncState::*;

    #[test]
    fn transitions_match_in_order() {
        let observed = [AvailableRemote, Pulling, Pushing, Ready];
        assert!(assert_transitions(&observed, &[AvailableRemote, Pulling, Ready]).passed);
        assert!(!assert_transitions(&observed, &[Ready, Pulling]).passed);
        assert!(assert_transitions(&observed, &[]).passed);
    }

    #[test]
    fn single_head_needs_statuses() {
        assert!(!assert_single_head(&[]).passed);
    }
}
