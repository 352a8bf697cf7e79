//! # sync-content
//!
//! Version snapshot storage for Atrius per-file sync.
//!
//! Every version a device creates or receives is stored here, keyed by
//! `(FileId, VersionId)`, before the working file is overwritten. Content
//! is addressed by its BLAKE3 hash, so identical content shared by several
//! versions is stored once, and every read is verified against the hash.
//!
//! ```text
//! (FileId, VersionId) → SnapshotStore index → ContentHash → BlobStore → bytes
//!                                                              ↓
//!                                                  verify-on-read (BLAKE3)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use atrius_sync_content::{MemoryStore, SnapshotStore};
//!
//! # async fn example(version: VersionRecord, bytes: Vec<u8>) -> Result<(), ContentError> {
//! let snapshots = SnapshotStore::new(MemoryStore::new());
//! snapshots.put(&version, &bytes).await?;
//! let restored = snapshots.get(version.file_id, version.version_id).await?;
//! assert_eq!(restored, bytes);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod snapshot;
mod store;

pub use error::ContentError;
pub use snapshot::SnapshotStore;
pub use store::{BlobStore, FsBlobStore, MemoryStore};
