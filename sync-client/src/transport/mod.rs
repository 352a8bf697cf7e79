//! Transport abstraction for Atrius Sync.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection to the relay (TCP, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection
//! - `send()` transmits one encoded [`Message`](sync_types::Message)
//! - `recv()` receives one encoded message
//! - `close()` gracefully terminates
//!
//! Message boundaries are the transport's concern; the engine only ever
//! sees whole messages.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpTransport::new(Duration::from_secs(10));
//! transport.connect("127.0.0.1:7400").await?;
//! transport.send(&message.to_bytes()?).await?;
//! let reply = Message::decode(&transport.recv().await?)?;
//! ```

mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// A frame exceeded the size limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared frame size
        size: usize,
        /// Limit
        max: usize,
    },

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for sending and receiving sync protocol messages.
///
/// Implementations handle the underlying connection mechanism
/// (TCP, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the relay at the given address.
    ///
    /// For TCP this is `host:port`. For testing, it's arbitrary.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded message.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one encoded message.
    ///
    /// Blocks until data is available or connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
