//! SQLite storage backend for sync-relay.

use super::FileStore;
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use sync_types::{FileId, FileRecord};

/// SQLite-based file record storage.
///
/// Uses WAL mode for concurrent reads/writes. Records are stored as
/// MessagePack, the same encoding the wire uses.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let url = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(url)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // One connection: every new connection would open a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id BLOB PRIMARY KEY,
                record BLOB NOT NULL,
                head_version_id BLOB,
                version_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_updated ON files(updated_at)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl FileStore for SqliteStorage {
    async fn save_file(&self, record: &FileRecord) -> Result<(), StorageError> {
        let encoded = rmp_serde::to_vec(record).map_err(|source| StorageError::Encode {
            file_id: record.file_id,
            source,
        })?;
        let head = record.head_version_id.map(|v| v.as_bytes().to_vec());

        sqlx::query(
            r#"
            INSERT INTO files (file_id, record, head_version_id, version_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(file_id) DO UPDATE SET
                record = ?2,
                head_version_id = ?3,
                version_count = ?4,
                updated_at = ?5
            "#,
        )
        .bind(record.file_id.as_bytes())
        .bind(&encoded)
        .bind(head)
        .bind(record.versions.len() as i64)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn load_file(&self, file_id: FileId) -> Result<Option<FileRecord>, StorageError> {
        let row = sqlx::query_as::<_, FileRow>("SELECT file_id, record FROM files WHERE file_id = ?1")
            .bind(file_id.as_bytes())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        row.map(FileRecord::try_from).transpose()
    }

    async fn load_files(&self) -> Result<Vec<FileRecord>, StorageError> {
        let rows = sqlx::query_as::<_, FileRow>("SELECT file_id, record FROM files ORDER BY updated_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    async fn delete_file(&self, file_id: FileId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM files WHERE file_id = ?1")
            .bind(file_id.as_bytes())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn file_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct FileRow {
    file_id: Vec<u8>,
    record: Vec<u8>,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = StorageError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let key = FileId::from_bytes(&row.file_id).ok_or_else(|| StorageError::Corrupt {
            reason: format!("file id of {} bytes", row.file_id.len()),
        })?;
        let record: FileRecord = rmp_serde::from_slice(&row.record)?;
        if record.file_id != key {
            return Err(StorageError::Corrupt {
                reason: format!("row {} holds record of {}", key, record.file_id),
            });
        }
        Ok(record)
    }
}
