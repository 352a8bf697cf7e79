//! TCP transport to a relay.
//!
//! Each message travels as one frame: a 4-byte big-endian length followed by
//! the MessagePack body. Frames larger than [`MAX_MESSAGE_SIZE`] are refused
//! in both directions.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use sync_types::MAX_MESSAGE_SIZE;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Length-prefixed TCP connection to a relay.
///
/// Reads and writes are locked separately so a task blocked in `recv()`
/// never holds up a `send()`.
#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
}

impl TcpTransport {
    /// Create an unconnected transport.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (read, write) = stream.into_split();
        *self.reader.lock().await = Some(read);
        *self.writer.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(address, "connected to relay");
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let result = async {
            writer.write_u32(data.len() as u32).await?;
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            self.mark_closed();
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.mark_closed();
                return Err(TransportError::ConnectionClosed);
            }
            Err(e) => {
                self.mark_closed();
                return Err(TransportError::ReceiveFailed(e.to_string()));
            }
        };
        if len > MAX_MESSAGE_SIZE {
            self.mark_closed();
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await.map_err(|e| {
            self.mark_closed();
            TransportError::ReceiveFailed(e.to_string())
        })?;
        Ok(body)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        if let Some(mut writer) = self.writer.lock().await.take() {
            // Peer may already be gone.
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
        Ok(())
    }
}
