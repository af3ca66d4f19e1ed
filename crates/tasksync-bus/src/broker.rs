//! Broker abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::BusError;

/// Raw payloads arriving on one subscribed channel.
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// A pub/sub substrate reachable from every server instance.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the link. Calling it again while connected is harmless.
    async fn connect(&self) -> Result<(), BusError>;

    /// Release the link. Open message streams may end afterwards.
    async fn disconnect(&self);

    /// Publish `payload` on `channel`; returns how many subscribers the
    /// broker reports it reached.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError>;

    /// Start receiving messages published on `channel`. The subscription is
    /// live once this returns.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BusError>;

    /// Whether [`connect`](Self::connect) succeeded and no disconnect
    /// followed.
    fn is_connected(&self) -> bool;
}
