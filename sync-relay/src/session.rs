//! Per-connection session management.
//!
//! A session waits for `device/register`, then feeds every frame from the
//! device to the relay until the device says goodbye or the connection drops.
//! Replies and fan-out reach the device through a dedicated writer task.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::{read_frame, write_frame};
use crate::server::SyncRelay;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use sync_types::{DeviceId, DeviceRegister, FileError, Message};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Session state machine states.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Waiting for `device/register`.
    AwaitingRegister,
    /// Registered and exchanging messages.
    Active {
        /// The registered device.
        device_id: DeviceId,
        /// Device name from registration.
        device_name: String,
        /// Session number handed out by the relay.
        session: u64,
    },
    /// Session is closing.
    Closing,
}

/// A per-connection session.
pub struct Session<S> {
    relay: Arc<SyncRelay>,
    reader: ReadHalf<S>,
    /// Moves into the writer task once registered.
    writer: Option<WriteHalf<S>>,
    peer: String,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Create a new session for a connection.
    pub fn new(relay: Arc<SyncRelay>, stream: S, peer: String) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            relay,
            reader,
            writer: Some(writer),
            peer,
            state: SessionState::AwaitingRegister,
        }
    }

    /// Run the session until completion.
    pub async fn run(mut self) -> ProtocolResult<()> {
        tracing::info!("New connection from {}", self.peer);
        let Some(mut writer) = self.writer.take() else {
            return Err(ProtocolError::Connection("session already ran".into()));
        };

        let timeout_secs = self.relay.config().server.register_timeout_secs;
        let register = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            await_register(&mut self.reader),
        )
        .await
        {
            Ok(Ok(Some(register))) => register,
            Ok(Ok(None)) => {
                tracing::debug!("Connection from {} closed before registering", self.peer);
                return Ok(());
            }
            Ok(Err(e)) => {
                self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                refuse(&mut writer, &e).await;
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Register timeout ({}s) for {}", timeout_secs, self.peer);
                return Err(ProtocolError::RegisterTimeout(timeout_secs));
            }
        };

        let max_name = self.relay.config().limits.max_device_name_len;
        let device_name = register
            .name
            .as_deref()
            .map(|n| truncate_device_name(n, max_name));

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let (device_id, session) = self
            .relay
            .register(register.device_id, device_name.clone(), tx)
            .await;
        self.state = SessionState::Active {
            device_id,
            device_name: device_name.unwrap_or_default(),
            session,
        };

        let result = self.message_loop(device_id).await;

        self.state = SessionState::Closing;
        self.relay.disconnect(device_id, session).await;
        // The writer drains what is queued, then ends once its sender is gone.
        drop(writer_task);
        tracing::info!("Session closed for {} ({})", device_id, self.peer);
        result
    }

    async fn message_loop(&mut self, device_id: DeviceId) -> ProtocolResult<()> {
        loop {
            let Some(bytes) = read_frame(&mut self.reader).await? else {
                tracing::debug!("Device {} hung up", device_id);
                return Ok(());
            };

            let limits = self.relay.rate_limits();
            if let Err(e) = limits
                .check_global()
                .and_then(|()| limits.check_message(&device_id))
            {
                tracing::warn!("Rate limited {}: {}", device_id, e);
                self.relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
                self.relay.send_error(device_id, None, e.to_string());
                continue;
            }

            let message = match Message::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!("Bad frame from {}: {}", device_id, e);
                    self.relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
                    self.relay.send_error(device_id, None, e.to_string());
                    continue;
                }
            };

            match message {
                Message::Bye(bye) => {
                    tracing::info!(
                        "Device {} said goodbye: {}",
                        device_id,
                        bye.reason.as_deref().unwrap_or("no reason")
                    );
                    return Ok(());
                }
                message => self.relay.dispatch(device_id, message).await,
            }
        }
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }
}

/// Wait for the first frame, which must be `device/register`.
async fn await_register<R>(reader: &mut R) -> ProtocolResult<Option<DeviceRegister>>
where
    R: AsyncRead + Unpin,
{
    let Some(bytes) = read_frame(reader).await? else {
        return Ok(None);
    };
    match Message::decode(&bytes)? {
        Message::DeviceRegister(register) => Ok(Some(register)),
        other => Err(ProtocolError::UnexpectedMessage {
            expected: "device/register".into(),
            actual: other.kind().into(),
        }),
    }
}

/// Best-effort error frame before closing an unregistered connection.
async fn refuse<S>(writer: &mut WriteHalf<S>, error: &ProtocolError)
where
    S: AsyncWrite,
{
    let reply = Message::FileError(FileError {
        file_id: None,
        message: error.to_string(),
    });
    if let Ok(bytes) = reply.to_bytes() {
        let _ = write_frame(writer, &bytes).await;
    }
}

async fn write_loop<S>(mut writer: WriteHalf<S>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    S: AsyncWrite,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::debug!("Writer stopped: {}", e);
            return;
        }
    }
}

/// Truncate a device name to at most `max_chars` characters.
///
/// Counts characters rather than bytes so multi-byte names are never split.
fn truncate_device_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        name.to_string()
    } else {
        name.chars().take(max_chars).collect()
    }
}
