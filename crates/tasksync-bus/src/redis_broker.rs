//! Redis pub/sub broker.
//!
//! Publishing goes through one multiplexed connection. Each subscribed
//! channel gets its own pub/sub connection, so dropping a channel's stream
//! closes exactly that subscription.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

use crate::broker::{Broker, MessageStream};
use crate::errors::BusError;

struct Link {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

/// [`Broker`] backed by Redis `PUBLISH` / `SUBSCRIBE`.
pub struct RedisBroker {
    url: String,
    link: Mutex<Option<Link>>,
}

impl RedisBroker {
    /// Broker for `url` (e.g. `redis://localhost:6379`). Nothing is opened
    /// until [`Broker::connect`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link: Mutex::new(None),
        }
    }

    fn publisher(&self) -> Result<MultiplexedConnection, BusError> {
        self.link
            .lock()
            .as_ref()
            .map(|link| link.publisher.clone())
            .ok_or(BusError::NotConnected)
    }

    fn client(&self) -> Result<redis::Client, BusError> {
        self.link
            .lock()
            .as_ref()
            .map(|link| link.client.clone())
            .ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn connect(&self) -> Result<(), BusError> {
        if self.is_connected() {
            return Ok(());
        }
        let client = redis::Client::open(self.url.as_str())?;
        let publisher = client.get_multiplexed_async_connection().await?;
        *self.link.lock() = Some(Link { client, publisher });
        info!(url = %self.url, "redis broker connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.link.lock().take().is_some() {
            info!(url = %self.url, "redis broker disconnected");
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        let mut conn = self.publisher()?;
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BusError> {
        let client = self.client()?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        debug!(channel, "redis channel subscribed");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(error) => {
                    warn!(channel = msg.get_channel_name(), %error, "non-text redis payload dropped");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn is_connected(&self) -> bool {
        self.link.lock().is_some()
    }
}
