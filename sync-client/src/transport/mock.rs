//! Mock transport for testing.
//!
//! Queues inbound messages and captures outbound ones so tests (and the
//! scenario harness) can play the relay's part by hand.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use sync_types::Message;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent_messages: Vec<Vec<u8>>,
    drained: usize,
    receive_queue: VecDeque<Vec<u8>>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    fail_all_sends: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue raw bytes to be returned by the next `recv()` call.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.inner().receive_queue.push_back(data);
    }

    /// Queue a message to be returned by a later `recv()` call.
    ///
    /// Messages that fail to encode are dropped.
    pub fn queue_message(&self, message: &Message) {
        if let Ok(bytes) = message.to_bytes() {
            self.queue_response(bytes);
        }
    }

    /// Get all messages that were sent, as raw bytes.
    pub fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.inner().sent_messages.clone()
    }

    /// Get all decodable messages that were sent.
    pub fn sent(&self) -> Vec<Message> {
        self.inner()
            .sent_messages
            .iter()
            .filter_map(|bytes| Message::decode(bytes).ok())
            .collect()
    }

    /// Messages sent since the previous drain, decoded.
    pub fn drain_sent(&self) -> Vec<Message> {
        let mut inner = self.inner();
        let start = inner.drained;
        inner.drained = inner.sent_messages.len();
        inner.sent_messages[start..]
            .iter()
            .filter_map(|bytes| Message::decode(bytes).ok())
            .collect()
    }

    /// Get the last message that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.inner().sent_messages.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.inner().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.inner().fail_next_recv = Some(error.to_string());
    }

    /// Make every send fail until [`MockTransport::heal`] is called.
    pub fn partition(&self, error: &str) {
        self.inner().fail_all_sends = Some(error.to_string());
    }

    /// Undo [`MockTransport::partition`].
    pub fn heal(&self) {
        self.inner().fail_all_sends = None;
    }

    /// Clear all state (messages, queue, connection).
    pub fn reset(&self) {
        *self.inner() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.inner();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        if let Some(error) = &inner.fail_all_sends {
            return Err(TransportError::SendFailed(error.clone()));
        }

        inner.sent_messages.push(data.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.inner();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        inner
            .receive_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.inner().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner().connected = false;
        Ok(())
    }
}
