//! Transport abstraction the registry delivers through.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Delivery and handshake failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The bounded outbound queue is full (slow consumer).
    #[error("outbound queue full")]
    QueueFull,
    /// The transport has been closed.
    #[error("transport closed")]
    Closed,
    /// The handshake could not be completed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// One bidirectional client connection as seen by the registry.
///
/// `send` never blocks: implementations enqueue and report failure
/// immediately so one slow client cannot stall a broadcast.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Complete the transport-level handshake.
    async fn accept(&self) -> Result<(), TransportError>;

    /// Enqueue a serialized message.
    fn send(&self, message: Arc<String>) -> Result<(), TransportError>;

    /// Close the transport. Idempotent.
    fn close(&self);

    /// Whether the transport is still usable.
    fn is_open(&self) -> bool;
}
