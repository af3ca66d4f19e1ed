//! In-process broker.
//!
//! A [`MemoryExchange`] holds one tokio broadcast channel per channel name.
//! Several [`MemoryBroker`]s can share one exchange to stand in for several
//! server instances attached to the same external broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::broker::{Broker, MessageStream};
use crate::errors::BusError;

/// Default per-subscriber buffer before a slow subscriber starts lagging.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Shared set of named broadcast channels.
pub struct MemoryExchange {
    channels: Mutex<HashMap<String, broadcast::Sender<Arc<str>>>>,
    capacity: usize,
}

impl MemoryExchange {
    /// Create an exchange whose channels buffer `capacity` messages per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Send to every current receiver of `channel`; returns the receiver
    /// count (0 when nobody listens).
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(channel) else {
            return 0;
        };
        if sender.receiver_count() == 0 {
            let _ = channels.remove(channel);
            return 0;
        }
        sender.send(Arc::from(payload)).unwrap_or(0)
    }

    /// New receiver on `channel`, creating the channel if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Arc<str>> {
        let mut channels = self.channels.lock();
        channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Live receivers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for MemoryExchange {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// [`Broker`] over a [`MemoryExchange`].
pub struct MemoryBroker {
    exchange: Arc<MemoryExchange>,
    connected: AtomicBool,
}

impl MemoryBroker {
    /// Attach to a shared exchange.
    pub fn new(exchange: Arc<MemoryExchange>) -> Self {
        Self {
            exchange,
            connected: AtomicBool::new(false),
        }
    }

    /// Broker with a private exchange.
    pub fn standalone() -> Self {
        Self::new(Arc::new(MemoryExchange::default()))
    }
}

fn receiver_stream(rx: broadcast::Receiver<Arc<str>>, channel: String) -> MessageStream {
    Box::pin(futures::stream::unfold(
        (rx, channel),
        |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload.to_string(), (rx, channel))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "memory subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    ))
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<(), BusError> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("memory broker connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!("memory broker disconnected");
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        Ok(self.exchange.publish(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, BusError> {
        if !self.is_connected() {
            return Err(BusError::NotConnected);
        }
        let rx = self.exchange.subscribe(channel);
        Ok(receiver_stream(rx, channel.to_owned()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
