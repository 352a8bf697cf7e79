//! In-process network of devices around one coordinator.
//!
//! Devices talk through [`MockTransport`]s. [`Network::pump`] drains what each
//! online device sent, applies it to the coordinator and hands the replies to
//! the addressed engines, round after round, until nothing is left in flight.

use std::path::PathBuf;
use sync_client::{
    ClientConfig, ClientError, FileEvent, FileEventKind, FileStatus, MemoryRegistry,
    MockTransport, SyncEngine,
};
use sync_content::{MemoryStore, SnapshotStore};
use sync_core::{Coordinator, CoordinatorConfig, Outgoing, RetryPolicy};
use sync_types::{unix_timestamp, DeviceId, FileId, Message, VersionId};
use tempfile::TempDir;
use thiserror::Error;

/// Engine type used by every device.
pub type Engine = SyncEngine<MockTransport, MemoryRegistry, MemoryStore>;

/// Rounds allowed before a pump is declared stuck.
const MAX_ROUNDS: usize = 256;

/// Chunk size small enough that every test file spans several chunks.
pub const CHUNK_SIZE: u32 = 4;

/// Errors from harness operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Engine operation failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Working directory I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The device does not track the file.
    #[error("device {device} does not track {file_id}")]
    NotTracked {
        /// Device index.
        device: usize,
        /// File concerned.
        file_id: FileId,
    },

    /// Traffic kept flowing after the round limit.
    #[error("network still busy after {0} rounds")]
    Unsettled(usize),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// One simulated device.
pub struct Device {
    /// The device engine.
    pub engine: Engine,
    /// Shared handle on the engine's transport.
    pub transport: MockTransport,
    dir: TempDir,
    online: bool,
}

impl Device {
    async fn new(index: usize) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let transport = MockTransport::new();
        let config = ClientConfig::default()
            .with_device_name(&format!("device-{}", index))
            .with_data_dir(dir.path().join(".atrius"))
            .with_chunk_size(CHUNK_SIZE)
            .with_retry(RetryPolicy {
                max_retries: 0,
                jitter_ms: 0,
                ..RetryPolicy::default()
            });
        let engine = SyncEngine::new(
            config,
            DeviceId::random(),
            transport.clone(),
            MemoryRegistry::new(),
            SnapshotStore::new(MemoryStore::new()),
        );
        Ok(Self {
            engine,
            transport,
            dir,
            online: false,
        })
    }

    /// This device's id.
    pub fn id(&self) -> DeviceId {
        self.engine.device_id()
    }

    /// Path inside this device's working directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Whether the device is connected to the coordinator.
    pub fn is_online(&self) -> bool {
        self.online
    }
}

/// Devices around one coordinator.
pub struct Network {
    relay: Coordinator,
    devices: Vec<Device>,
    log: Vec<(DeviceId, Message)>,
    clock_offset: u64,
}

impl Network {
    /// Create `count` devices, all offline.
    pub async fn new(count: usize) -> Result<Self> {
        Self::with_config(count, CoordinatorConfig::default()).await
    }

    /// Create `count` devices around a coordinator with `config`.
    pub async fn with_config(count: usize, config: CoordinatorConfig) -> Result<Self> {
        let mut devices = Vec::with_capacity(count);
        for index in 0..count {
            devices.push(Device::new(index).await?);
        }
        Ok(Self {
            relay: Coordinator::new(config),
            devices,
            log: Vec::new(),
            clock_offset: 0,
        })
    }

    /// Create `count` devices and connect them all.
    pub async fn online(count: usize) -> Result<Self> {
        let mut net = Self::new(count).await?;
        for index in 0..count {
            net.connect(index).await?;
        }
        net.pump().await?;
        Ok(net)
    }

    /// Device by index.
    pub fn device(&self, index: usize) -> &Device {
        &self.devices[index]
    }

    /// The coordinator.
    pub fn relay(&mut self) -> &mut Coordinator {
        &mut self.relay
    }

    /// Coordinator time: the wall clock plus any [`Network::advance_clock`].
    pub fn now(&self) -> u64 {
        unix_timestamp() + self.clock_offset
    }

    /// Move coordinator time forward, e.g. past a lock's TTL.
    pub fn advance_clock(&mut self, secs: u64) {
        self.clock_offset += secs;
    }

    /// Every message devices sent so far, in order.
    pub fn log(&self) -> &[(DeviceId, Message)] {
        &self.log
    }

    /// Messages sent by one device.
    pub fn sent_by(&self, index: usize) -> Vec<&Message> {
        let id = self.devices[index].id();
        self.log
            .iter()
            .filter(|(from, _)| *from == id)
            .map(|(_, message)| message)
            .collect()
    }

    /// Register a device with the coordinator and connect its engine.
    pub async fn connect(&mut self, index: usize) -> Result<()> {
        let now = self.now();
        let device = &mut self.devices[index];
        let (_, replies) = self.relay.register_device(
            Some(device.engine.device_id()),
            Some(format!("device-{}", index)),
            now,
        );
        for reply in replies {
            device.transport.queue_message(&reply.message);
        }
        device.engine.connect().await?;
        device.online = true;
        Ok(())
    }

    /// Disconnect a device and let the coordinator tell the others.
    pub async fn disconnect(&mut self, index: usize) -> Result<()> {
        let id = {
            let device = &mut self.devices[index];
            device.engine.disconnect().await?;
            // Only the goodbye is left; the coordinator is told directly.
            device.transport.drain_sent();
            device.online = false;
            device.id()
        };
        let now = self.now();
        let notices = self.relay.disconnect(id, now);
        self.deliver(notices, &mut |_: DeviceId, _: &Message| true)
            .await;
        Ok(())
    }

    /// Route traffic until the network is quiet.
    pub async fn pump(&mut self) -> Result<usize> {
        self.pump_filtered(|_, _| true).await
    }

    /// Route traffic until quiet, dropping relay messages `keep` rejects.
    ///
    /// `keep` sees the recipient and the message.
    pub async fn pump_filtered<F>(&mut self, mut keep: F) -> Result<usize>
    where
        F: FnMut(DeviceId, &Message) -> bool,
    {
        let mut delivered = 0;
        for round in 0..MAX_ROUNDS {
            let now = self.now();
            let mut outgoing = Vec::new();
            for device in self.devices.iter().filter(|d| d.online) {
                let from = device.id();
                for message in device.transport.drain_sent() {
                    self.log.push((from, message.clone()));
                    outgoing.extend(self.relay.handle(from, message, now));
                }
            }
            if outgoing.is_empty() {
                tracing::debug!(rounds = round, delivered, "Network settled");
                return Ok(delivered);
            }
            delivered += self.deliver(outgoing, &mut keep).await;
        }
        Err(HarnessError::Unsettled(MAX_ROUNDS))
    }

    async fn deliver<F>(&self, outgoing: Vec<Outgoing>, keep: &mut F) -> usize
    where
        F: FnMut(DeviceId, &Message) -> bool,
    {
        let mut delivered = 0;
        for Outgoing { to, message } in outgoing {
            let Some(device) = self.devices.iter().find(|d| d.online && d.id() == to) else {
                continue;
            };
            if !keep(to, &message) {
                continue;
            }
            device.engine.handle_message(message).await;
            delivered += 1;
        }
        delivered
    }

    // ===========================================
    // File operations
    // ===========================================

    /// Write `content` to `name` on a device, start tracking it and settle.
    pub async fn publish(&mut self, index: usize, name: &str, content: &[u8]) -> Result<FileId> {
        let device = &self.devices[index];
        let path = device.path(name);
        tokio::fs::write(&path, content).await?;
        let file_id = device.engine.add_file(&path).await?;
        self.pump().await?;
        Ok(file_id)
    }

    /// Track a file another device shares at `name`, and settle.
    pub async fn join(&mut self, index: usize, file_id: FileId, name: &str) -> Result<()> {
        let device = &self.devices[index];
        device
            .engine
            .track_remote(file_id, device.path(name))
            .await?;
        self.pump().await?;
        Ok(())
    }

    /// Overwrite a tracked file on disk and report the edit. Does not pump.
    pub async fn edit(
        &self,
        index: usize,
        file_id: FileId,
        content: &[u8],
    ) -> Result<Option<VersionId>> {
        let status = self.status(index, file_id).await?;
        tokio::fs::write(&status.path, content).await?;
        Ok(self.devices[index].engine.on_local_change(file_id).await?)
    }

    /// Move a tracked file on disk and report the rename.
    pub async fn rename(&self, index: usize, file_id: FileId, name: &str) -> Result<PathBuf> {
        let device = &self.devices[index];
        let from = self.status(index, file_id).await?.path;
        let to = device.path(name);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from, &to).await?;
        device
            .engine
            .on_path_event(FileEvent {
                path: to.clone(),
                kind: FileEventKind::Renamed { from },
            })
            .await?;
        Ok(to)
    }

    /// Status of a file on a device.
    pub async fn status(&self, index: usize, file_id: FileId) -> Result<FileStatus> {
        self.devices[index]
            .engine
            .status(file_id)
            .await
            .ok_or(HarnessError::NotTracked {
                device: index,
                file_id,
            })
    }

    /// Current on-disk content of a file on a device.
    pub async fn read(&self, index: usize, file_id: FileId) -> Result<Vec<u8>> {
        let path = self.status(index, file_id).await?.path;
        Ok(tokio::fs::read(path).await?)
    }
}
