//! # sync-client
//!
//! Device side of Atrius per-file sync.
//!
//! Applications embed a [`SyncEngine`] to keep local copies of shared
//! binary files in step with a relay and the other devices sharing them.
//!
//! ## Features
//!
//! - **Stable file identity**: files are tracked by [`FileId`](sync_types::FileId),
//!   so renames and moves never look like new files
//! - **Lock-aware pushes**: an auto-lock is taken around each push
//! - **Resumable transfers**: only missing chunks are requested
//! - **No silent loss**: divergent edits become conflicts, every version
//!   stays restorable from the local snapshot store
//! - **Transport abstraction**: length-prefixed TCP, or a mock for tests
//! - **Pure state machine**: decisions come from sync-core; this crate does I/O
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{ClientConfig, SyncEngine, TcpTransport};
//!
//! let config = ClientConfig::from_file(Path::new("atrius.toml"))?;
//! let transport = TcpTransport::new(config.connect_timeout());
//! let engine = SyncEngine::open(config, transport).await?;
//! engine.connect().await?;
//!
//! let file_id = engine.add_file("/work/report.docx").await?;
//! println!("{:?}", engine.status(file_id).await);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod transport;
pub mod watcher;

pub use config::{ClientConfig, ConfigError, DeviceConfig, RelayConfig, SyncSettings};
pub use engine::{FileStatus, SyncEngine};
pub use error::{ClientError, Result};
pub use registry::{
    AutoLockPreference, JsonFileRegistry, LocalRegistry, MemoryRegistry, RegistryEntry,
    RegistryError,
};
pub use transport::{MockTransport, TcpTransport, Transport, TransportError};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
