//! Wire framing and the connection accept loop.
//!
//! Each message travels as one frame: a 4-byte big-endian length followed by
//! the MessagePack body.

use crate::error::{ProtocolError, ProtocolResult};
use crate::server::SyncRelay;
use crate::session::Session;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub use sync_types::MAX_MESSAGE_SIZE;

/// Read one frame.
///
/// Returns `None` when the peer closed the connection between frames.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Connection(e.to_string())),
    };
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ProtocolError::Connection(e.to_string()))?;
    Ok(Some(body))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let io = |e: std::io::Error| ProtocolError::Connection(e.to_string());
    writer.write_u32(body.len() as u32).await.map_err(io)?;
    writer.write_all(body).await.map_err(io)?;
    writer.flush().await.map_err(io)
}

/// Accepts device connections for one relay.
#[derive(Clone, Debug)]
pub struct SyncProtocol {
    relay: Arc<SyncRelay>,
}

impl SyncProtocol {
    /// Create a new protocol handler.
    pub fn new(relay: Arc<SyncRelay>) -> Self {
        Self { relay }
    }

    /// Admit or refuse one connection.
    ///
    /// Admitted connections run in their own task.
    pub fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let relay = self.relay.clone();

        if let Err(e) = relay.rate_limits().check_connection(peer.ip()) {
            tracing::warn!("Connection rate limited for {}: {}", peer, e);
            relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let max_sessions = relay.config().limits.max_concurrent_sessions;
        if relay.total_sessions() >= max_sessions {
            tracing::warn!(
                "Session limit reached ({}/{}), rejecting {}",
                relay.total_sessions(),
                max_sessions,
                peer
            );
            return;
        }

        relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle for {}: {}", peer, e);
        }

        let session = Session::new(relay, stream, peer.to_string());
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::warn!("Session error for {}: {}", peer, e);
            }
        });
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("Accepting devices on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            self.accept(stream, peer);
        }
    }
}
