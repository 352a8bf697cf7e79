//! Local file registry.
//!
//! Binds each tracked [`FileId`] to a path on this device and remembers the
//! head whose content is on disk. The registry is the only place a path is
//! stored; everything else addresses files by id, so a rename or move is a
//! single [`LocalRegistry::rebind`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use sync_types::{FileId, Hydration, VersionId};
use thiserror::Error;

/// Whether edits take the file lock automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoLockPreference {
    /// Take an auto-lock around every push.
    #[default]
    OnEdit,
    /// Only lock when the user asks.
    Manual,
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// File identity.
    pub file_id: FileId,
    /// Current local path.
    pub path: PathBuf,
    /// Head whose content is on disk.
    pub head_version_id: Option<VersionId>,
    /// Whether that content is present.
    #[serde(default)]
    pub hydration: Hydration,
    /// Lock preference for local edits.
    #[serde(default)]
    pub auto_lock: AutoLockPreference,
    /// Most recent sync error.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl RegistryEntry {
    /// New entry with nothing on disk yet.
    pub fn new(file_id: FileId, path: impl Into<PathBuf>) -> Self {
        Self {
            file_id,
            path: path.into(),
            head_version_id: None,
            hydration: Hydration::Absent,
            auto_lock: AutoLockPreference::default(),
            last_error: None,
        }
    }
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Another file already uses the path
    #[error("path {path} is already bound to file {file_id}")]
    PathAlreadyBound {
        /// Path requested
        path: PathBuf,
        /// File holding it
        file_id: FileId,
    },

    /// File is not registered
    #[error("unknown file {0}")]
    UnknownFile(FileId),

    /// Persisting the registry failed
    #[error("registry io error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry file is malformed
    #[error("registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for the path-to-identity mapping.
#[async_trait]
pub trait LocalRegistry: Send + Sync {
    /// Entry for a file.
    async fn get(&self, file_id: FileId) -> Result<Option<RegistryEntry>, RegistryError>;

    /// Entry bound to a path (case-insensitive).
    async fn find_by_path(&self, path: &Path) -> Result<Option<RegistryEntry>, RegistryError>;

    /// Add a new entry. Fails if its path is taken by another file.
    async fn bind(&self, entry: RegistryEntry) -> Result<(), RegistryError>;

    /// Point a file at a new path, keeping its identity.
    async fn rebind(&self, file_id: FileId, path: &Path) -> Result<(), RegistryError>;

    /// Replace an existing entry.
    async fn update(&self, entry: RegistryEntry) -> Result<(), RegistryError>;

    /// Every entry.
    async fn entries(&self) -> Result<Vec<RegistryEntry>, RegistryError>;
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Entries {
    files: BTreeMap<FileId, RegistryEntry>,
}

impl Entries {
    fn holder_of(&self, path: &Path) -> Option<&RegistryEntry> {
        let key = path_key(path);
        self.files.values().find(|e| path_key(&e.path) == key)
    }

    fn bind(&mut self, entry: RegistryEntry) -> Result<(), RegistryError> {
        if let Some(holder) = self.holder_of(&entry.path) {
            if holder.file_id != entry.file_id {
                return Err(RegistryError::PathAlreadyBound {
                    path: entry.path,
                    file_id: holder.file_id,
                });
            }
        }
        self.files.insert(entry.file_id, entry);
        Ok(())
    }

    fn rebind(&mut self, file_id: FileId, path: &Path) -> Result<(), RegistryError> {
        if let Some(holder) = self.holder_of(path) {
            if holder.file_id != file_id {
                return Err(RegistryError::PathAlreadyBound {
                    path: path.to_path_buf(),
                    file_id: holder.file_id,
                });
            }
        }
        let entry = self
            .files
            .get_mut(&file_id)
            .ok_or(RegistryError::UnknownFile(file_id))?;
        entry.path = path.to_path_buf();
        Ok(())
    }

    fn update(&mut self, entry: RegistryEntry) -> Result<(), RegistryError> {
        if !self.files.contains_key(&entry.file_id) {
            return Err(RegistryError::UnknownFile(entry.file_id));
        }
        self.files.insert(entry.file_id, entry);
        Ok(())
    }
}

/// Registry held in memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: Mutex<Entries>,
}

impl MemoryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LocalRegistry for MemoryRegistry {
    async fn get(&self, file_id: FileId) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.guard().files.get(&file_id).cloned())
    }

    async fn find_by_path(&self, path: &Path) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.guard().holder_of(path).cloned())
    }

    async fn bind(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.guard().bind(entry)
    }

    async fn rebind(&self, file_id: FileId, path: &Path) -> Result<(), RegistryError> {
        self.guard().rebind(file_id, path)
    }

    async fn update(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.guard().update(entry)
    }

    async fn entries(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        Ok(self.guard().files.values().cloned().collect())
    }
}

/// Registry persisted as a JSON document, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: PathBuf,
    entries: Mutex<Entries>,
}

impl JsonFileRegistry {
    /// Load the registry at `path`, or start empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Entries::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn guard(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn mutate(
        &self,
        f: impl FnOnce(&mut Entries) -> Result<(), RegistryError>,
    ) -> Result<(), RegistryError> {
        let snapshot = {
            let mut entries = self.guard();
            f(&mut entries)?;
            entries.clone()
        };
        self.persist(&snapshot).await
    }

    async fn persist(&self, entries: &Entries) -> Result<(), RegistryError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalRegistry for JsonFileRegistry {
    async fn get(&self, file_id: FileId) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.guard().files.get(&file_id).cloned())
    }

    async fn find_by_path(&self, path: &Path) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.guard().holder_of(path).cloned())
    }

    async fn bind(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.mutate(|entries| entries.bind(entry)).await
    }

    async fn rebind(&self, file_id: FileId, path: &Path) -> Result<(), RegistryError> {
        self.mutate(|entries| entries.rebind(file_id, path)).await
    }

    async fn update(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.mutate(|entries| entries.update(entry)).await
    }

    async fn entries(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        Ok(self.guard().files.values().cloned().collect())
    }
}
