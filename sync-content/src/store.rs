//! Content-addressed blob storage.
//!
//! This module provides a trait for storing content blobs addressed by their
//! BLAKE3 hash, a memory-based implementation for testing and a
//! directory-backed one for devices.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sync_types::ContentHash;

use crate::error::ContentError;

/// Trait for content-addressed blob storage.
///
/// Content is addressed by its BLAKE3 hash. This enables verify-on-read:
/// if the hash doesn't match, the content is corrupted. Stores never delete.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store content and return its BLAKE3 hash.
    async fn put(&self, content: &[u8]) -> Result<ContentHash, ContentError>;

    /// Retrieve content by its hash.
    ///
    /// Returns `NotFound` if the hash is not in the store.
    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError>;

    /// Check if content exists in the store.
    async fn contains(&self, hash: &ContentHash) -> bool;
}

/// In-memory blob store for testing.
///
/// Stores blobs in a thread-safe HashMap. Not persistent - all data
/// is lost when the store is dropped.
#[derive(Default, Clone)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<ContentHash, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }

    /// Overwrite a stored blob in place, bypassing hashing. Test hook for
    /// corruption scenarios.
    #[doc(hidden)]
    pub fn corrupt(&self, hash: &ContentHash, bytes: Vec<u8>) {
        self.blobs().insert(*hash, bytes);
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<ContentHash, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, content: &[u8]) -> Result<ContentHash, ContentError> {
        let hash = ContentHash::of(content);
        self.blobs().entry(hash).or_insert_with(|| content.to_vec());
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError> {
        let content = self
            .blobs()
            .get(hash)
            .cloned()
            .ok_or_else(|| ContentError::NotFound {
                hash: hash.to_string(),
            })?;
        verify(hash, &content)?;
        Ok(content)
    }

    async fn contains(&self, hash: &ContentHash) -> bool {
        self.blobs().contains_key(hash)
    }
}

/// Blob store in a local directory, one file per blob.
///
/// Blobs live at `<root>/<first two hex chars>/<hex hash>` and are written
/// through a temporary file and rename, so a crash never leaves a partial
/// blob under its final name.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ContentError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory holding the blobs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.to_string();
        self.root.join(&hex[..2]).join(hex)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, content: &[u8]) -> Result<ContentHash, ContentError> {
        let hash = ContentHash::of(content);
        let path = self.path_for(&hash);
        if tokio::fs::try_exists(&path).await? {
            return Ok(hash);
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(hash)
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, ContentError> {
        let content = match tokio::fs::read(self.path_for(hash)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContentError::NotFound {
                    hash: hash.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        verify(hash, &content)?;
        Ok(content)
    }

    async fn contains(&self, hash: &ContentHash) -> bool {
        tokio::fs::try_exists(self.path_for(hash))
            .await
            .unwrap_or(false)
    }
}

pub(crate) fn verify(expected: &ContentHash, content: &[u8]) -> Result<(), ContentError> {
    let actual = ContentHash::of(content);
    if actual != *expected {
        return Err(ContentError::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_put_get() {
        let store = MemoryStore::new();
        let content = b"texture bytes here";

        let hash = store.put(content).await.unwrap();
        let retrieved = store.get(&hash).await.unwrap();

        assert_eq!(retrieved, content);
    }

    #[tokio::test]
    async fn memory_store_not_found() {
        let store = MemoryStore::new();
        let nonexistent = ContentHash::from_bytes([0xFF; 32]);

        let result = store.get(&nonexistent).await;

        assert!(matches!(result, Err(ContentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn memory_store_hash_is_blake3() {
        let store = MemoryStore::new();
        let content = b"test content for hashing";

        let hash = store.put(content).await.unwrap();

        assert_eq!(hash.as_bytes(), blake3::hash(content).as_bytes());
    }

    #[tokio::test]
    async fn memory_store_same_content_stored_once() {
        let store = MemoryStore::new();
        let hash1 = store.put(b"same content").await.unwrap();
        let hash2 = store.put(b"same content").await.unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_detects_corruption() {
        let store = MemoryStore::new();
        let hash = store.put(b"original").await.unwrap();
        store.corrupt(&hash, b"tampered".to_vec());

        let result = store.get(&hash).await;
        assert!(matches!(result, Err(ContentError::HashMismatch { .. })));
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();
        let content: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();

        let hash = store.put(&content).await.unwrap();
        assert!(store.contains(&hash).await);
        assert_eq!(store.get(&hash).await.unwrap(), content);

        // Idempotent
        assert_eq!(store.put(&content).await.unwrap(), hash);
    }

    #[tokio::test]
    async fn fs_store_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let hash = store.put(b"scene v1").await.unwrap();
        tokio::fs::write(store.path_for(&hash), b"scene v2").await.unwrap();

        let result = store.get(&hash).await;
        assert!(matches!(result, Err(ContentError::HashMismatch { .. })));
    }

    #[tokio::test]
    async fn fs_store_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let result = store.get(&ContentHash::of(b"never stored")).await;
        assert!(matches!(result, Err(ContentError::NotFound { .. })));
    }
}
