//! Storage layer for sync-relay.
//!
//! Persists one [`FileRecord`] per file: identity, bounded version history,
//! head and device states. Locks are in-memory only and never restored.

mod sqlite;

pub use sqlite::SqliteStorage;

use crate::error::StorageError;
use async_trait::async_trait;
use sync_types::{FileId, FileRecord};

/// Trait for file record storage backends.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert or replace the record of one file.
    async fn save_file(&self, record: &FileRecord) -> Result<(), StorageError>;

    /// Load one file's record.
    async fn load_file(&self, file_id: FileId) -> Result<Option<FileRecord>, StorageError>;

    /// Load every stored record.
    async fn load_files(&self) -> Result<Vec<FileRecord>, StorageError>;

    /// Remove a file's record.
    ///
    /// Returns whether a row was deleted.
    async fn delete_file(&self, file_id: FileId) -> Result<bool, StorageError>;

    /// Number of stored files.
    async fn file_count(&self) -> Result<u64, StorageError>;
}
