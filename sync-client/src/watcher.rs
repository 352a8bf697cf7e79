//! Filesystem watcher feeding the engine.
//!
//! Wraps a notify watcher and turns its events into [`FileEvent`]s on a
//! tokio channel. Hidden files and editor/engine temporaries are dropped
//! here; whether a path is tracked at all is the engine's decision.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path concerned (the destination for a rename).
    pub path: PathBuf,
    /// What happened.
    pub kind: FileEventKind,
}

/// Type of change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEventKind {
    /// File appeared.
    Created,
    /// Content or metadata changed.
    Modified,
    /// File disappeared.
    Removed,
    /// File moved within the watched tree.
    Renamed {
        /// Previous path.
        from: PathBuf,
    },
}

/// Watches directories and reports changes on a channel.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Create a watcher and the receiving end of its event channel.
    pub fn new() -> notify::Result<(Self, mpsc::UnboundedReceiver<FileEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for file_event in normalize(event) {
                    if tx.send(file_event).is_err() {
                        debug!("file event receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => error!("file watcher error: {}", e),
        })?;
        Ok((Self { watcher }, rx))
    }

    /// Start watching a directory (not recursive).
    pub fn watch(&mut self, dir: &Path) -> notify::Result<()> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "watching directory");
        Ok(())
    }

    /// Stop watching a directory.
    pub fn unwatch(&mut self, dir: &Path) -> notify::Result<()> {
        self.watcher.unwatch(dir)
    }
}

/// Whether a path is a hidden file or a temporary that never syncs.
pub fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.')
        || name.ends_with('~')
        || name.ends_with(".tmp")
        || name.ends_with(".swp")
        || (name.starts_with('#') && name.ends_with('#'))
}

/// Convert a notify event into zero or more file events.
pub fn normalize(event: Event) -> Vec<FileEvent> {
    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if let [from, to] = event.paths.as_slice() {
            if is_ignored(to) {
                return Vec::new();
            }
            return vec![FileEvent {
                path: to.clone(),
                kind: FileEventKind::Renamed { from: from.clone() },
            }];
        }
    }

    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            FileEventKind::Removed
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::Created,
        EventKind::Modify(_) => FileEventKind::Modified,
        _ => return Vec::new(),
    };
    event
        .paths
        .into_iter()
        .filter(|p| !is_ignored(p))
        .map(|path| FileEvent {
            path,
            kind: kind.clone(),
        })
        .collect()
}
