//! Version snapshots keyed by `(FileId, VersionId)`.
//!
//! Every version a device produces or receives has its full content stored
//! here before anything on disk is overwritten, so any retained version can
//! be restored. Content is deduplicated through the underlying
//! [`BlobStore`]; the index only maps versions to content hashes.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sync_types::{ContentHash, FileId, VersionId, VersionRecord};
use tokio::sync::Mutex;

use crate::error::ContentError;
use crate::store::{verify, BlobStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    file_id: FileId,
    version_id: VersionId,
    content_hash: ContentHash,
}

/// Snapshot store over a [`BlobStore`].
pub struct SnapshotStore<S: BlobStore> {
    store: S,
    index: Mutex<HashMap<(FileId, VersionId), ContentHash>>,
    index_path: Option<PathBuf>,
}

impl<S: BlobStore> SnapshotStore<S> {
    /// Snapshot store with an in-memory index.
    pub fn new(store: S) -> Self {
        Self {
            store,
            index: Mutex::new(HashMap::new()),
            index_path: None,
        }
    }

    /// Snapshot store whose index is persisted as JSON at `index_path`.
    pub async fn open(store: S, index_path: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let index_path = index_path.into();
        let mut index = HashMap::new();
        match tokio::fs::read(&index_path).await {
            Ok(bytes) => {
                let entries: Vec<IndexEntry> = serde_json::from_slice(&bytes)?;
                for e in entries {
                    index.insert((e.file_id, e.version_id), e.content_hash);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self {
            store,
            index: Mutex::new(index),
            index_path: Some(index_path),
        })
    }

    /// Store the content of `version`.
    ///
    /// The content must hash to the version's declared hash.
    pub async fn put(&self, version: &VersionRecord, content: &[u8]) -> Result<(), ContentError> {
        verify(&version.content_hash, content)?;
        let hash = self.store.put(content).await?;
        let mut index = self.index.lock().await;
        index.insert((version.file_id, version.version_id), hash);
        self.persist(&index).await
    }

    /// Record that `version` carries content already stored under its hash.
    ///
    /// Used for versions that re-publish existing content under a new id.
    pub async fn link(&self, version: &VersionRecord) -> Result<(), ContentError> {
        if !self.store.contains(&version.content_hash).await {
            return Err(ContentError::NotFound {
                hash: version.content_hash.to_string(),
            });
        }
        let mut index = self.index.lock().await;
        index.insert((version.file_id, version.version_id), version.content_hash);
        self.persist(&index).await
    }

    /// Content of a version, verified against its hash.
    pub async fn get(&self, file_id: FileId, version_id: VersionId) -> Result<Vec<u8>, ContentError> {
        let hash = self
            .index
            .lock()
            .await
            .get(&(file_id, version_id))
            .copied()
            .ok_or(ContentError::UnknownSnapshot {
                file_id,
                version_id,
            })?;
        self.store.get(&hash).await
    }

    /// Content with a given hash, if any version stored it.
    pub async fn get_by_hash(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError> {
        self.store.get(hash).await
    }

    /// Whether a snapshot exists for a version.
    pub async fn contains(&self, file_id: FileId, version_id: VersionId) -> bool {
        self.index.lock().await.contains_key(&(file_id, version_id))
    }

    /// Versions of a file with stored snapshots.
    pub async fn versions(&self, file_id: FileId) -> Vec<VersionId> {
        let mut versions: Vec<VersionId> = self
            .index
            .lock()
            .await
            .keys()
            .filter(|(f, _)| *f == file_id)
            .map(|(_, v)| *v)
            .collect();
        versions.sort();
        versions
    }

    /// The underlying blob store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn persist(
        &self,
        index: &HashMap<(FileId, VersionId), ContentHash>,
    ) -> Result<(), ContentError> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        // Sorted so the file is stable across runs.
        let sorted: BTreeMap<_, _> = index.iter().collect();
        let entries: Vec<IndexEntry> = sorted
            .into_iter()
            .map(|((file_id, version_id), hash)| IndexEntry {
                file_id: *file_id,
                version_id: *version_id,
                content_hash: *hash,
            })
            .collect();
        let bytes = serde_json::to_vec_pretty(&entries)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
