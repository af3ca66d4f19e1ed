//! Channel subscriptions and best-effort publishing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{Broker, MessageStream};
use crate::errors::BusError;
use crate::metrics::{
    MESSAGES_RECEIVED_TOTAL, PUBLISH_ERRORS_TOTAL, PUBLISH_TOTAL, SUBSCRIPTIONS_ACTIVE,
};

/// Receives every message arriving on a subscribed channel.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Called once per message, in arrival order for the channel.
    async fn handle(&self, channel: &str, message: Value);
}

struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Publish/subscribe front over a [`Broker`].
pub struct BroadcastBus {
    broker: Arc<dyn Broker>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl BroadcastBus {
    /// Wrap a broker. Call [`connect`](Self::connect) before use.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the broker link. Returns `false` (and logs) on failure.
    pub async fn connect(&self) -> bool {
        if self.broker.is_connected() {
            return true;
        }
        match self.broker.connect().await {
            Ok(()) => {
                info!("broadcast bus connected");
                true
            }
            Err(error) => {
                warn!(%error, "broadcast bus failed to connect");
                false
            }
        }
    }

    /// Stop every subscription task, then release the broker link.
    ///
    /// No-op when never connected.
    pub async fn disconnect(&self) {
        let subscriptions: Vec<(String, Subscription)> =
            self.subscriptions.lock().drain().collect();
        if subscriptions.is_empty() && !self.broker.is_connected() {
            debug!("broadcast bus not connected, nothing to disconnect");
            return;
        }
        for (_, sub) in &subscriptions {
            sub.cancel.cancel();
        }
        for (channel, sub) in subscriptions {
            if let Err(error) = sub.task.await {
                warn!(channel = %channel, %error, "subscription task ended abnormally");
            }
        }
        gauge!(SUBSCRIPTIONS_ACTIVE).set(0.0);
        self.broker.disconnect().await;
        info!("broadcast bus disconnected");
    }

    /// Whether the broker link is up.
    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    /// Serialize `message` and publish it on `channel`.
    ///
    /// Returns the number of subscribers the broker reached; 0 when
    /// disconnected or on any failure.
    pub async fn publish<T: Serialize + ?Sized>(&self, channel: &str, message: &T) -> usize {
        match self.try_publish(channel, message).await {
            Ok(receivers) => {
                counter!(PUBLISH_TOTAL).increment(1);
                debug!(channel, receivers, "published to bus");
                receivers
            }
            Err(BusError::NotConnected) => {
                debug!(channel, "bus not connected, publish skipped");
                0
            }
            Err(error) => {
                counter!(PUBLISH_ERRORS_TOTAL).increment(1);
                warn!(channel, %error, "bus publish failed");
                0
            }
        }
    }

    async fn try_publish<T: Serialize + ?Sized>(
        &self,
        channel: &str,
        message: &T,
    ) -> Result<usize, BusError> {
        if !self.broker.is_connected() {
            return Err(BusError::NotConnected);
        }
        let payload = serde_json::to_string(message)?;
        self.broker.publish(channel, &payload).await
    }

    /// Feed every message on `channel` to `handler` until unsubscribed or
    /// disconnected.
    ///
    /// Idempotent per channel: an existing live subscription is kept and the
    /// new handler is ignored. Returns `false` if the broker refused.
    pub async fn subscribe(&self, channel: &str, handler: Arc<dyn ChannelHandler>) -> bool {
        if self.is_subscribed(channel) {
            return true;
        }

        let stream = match self.broker.subscribe(channel).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(channel, %error, "bus subscribe failed");
                return false;
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(
            channel.to_owned(),
            stream,
            handler,
            cancel.clone(),
        ));

        let mut subs = self.subscriptions.lock();
        let live = subs.get(channel).is_some_and(|s| !s.task.is_finished());
        if live {
            // Lost a race with a concurrent subscribe; keep the first one.
            cancel.cancel();
            return true;
        }
        let _ = subs.insert(channel.to_owned(), Subscription { cancel, task });
        #[allow(clippy::cast_precision_loss)]
        gauge!(SUBSCRIPTIONS_ACTIVE).set(subs.len() as f64);
        debug!(channel, "bus channel subscribed");
        true
    }

    /// Stop the task for `channel`. Returns whether a subscription existed.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        let mut subs = self.subscriptions.lock();
        let Some(sub) = subs.remove(channel) else {
            return false;
        };
        sub.cancel.cancel();
        #[allow(clippy::cast_precision_loss)]
        gauge!(SUBSCRIPTIONS_ACTIVE).set(subs.len() as f64);
        debug!(channel, "bus channel unsubscribed");
        true
    }

    /// Whether `channel` has a running subscription task.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions
            .lock()
            .get(channel)
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Number of channels with a subscription entry.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

async fn pump(
    channel: String,
    mut stream: MessageStream,
    handler: Arc<dyn ChannelHandler>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = stream.next() => {
                let Some(raw) = next else {
                    warn!(channel = %channel, "bus subscription stream ended");
                    break;
                };
                counter!(MESSAGES_RECEIVED_TOTAL).increment(1);
                match serde_json::from_str::<Value>(&raw) {
                    Ok(message) => handler.handle(&channel, message).await,
                    Err(error) => warn!(channel = %channel, %error, "dropping non-JSON bus message"),
                }
            }
        }
    }
    debug!(channel = %channel, "subscription task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBroker, MemoryExchange};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<(String, Value)>);

    #[async_trait]
    impl ChannelHandler for Forward {
        async fn handle(&self, channel: &str, message: Value) {
            let _ = self.0.send((channel.to_owned(), message));
        }
    }

    fn forward() -> (Arc<dyn ChannelHandler>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Forward(tx)), rx)
    }

    async fn connected_bus(exchange: &Arc<MemoryExchange>) -> BroadcastBus {
        let bus = BroadcastBus::new(Arc::new(MemoryBroker::new(Arc::clone(exchange))));
        assert!(bus.connect().await);
        bus
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for bus message")
            .expect("handler channel closed")
    }

    #[tokio::test]
    async fn publish_without_connect_returns_zero() {
        let bus = BroadcastBus::new(Arc::new(MemoryBroker::standalone()));
        assert_eq!(bus.publish("c", &json!({"a": 1})).await, 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_zero() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        assert_eq!(bus.publish("c", &json!(1)).await, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_decoded_messages() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        let (handler, mut rx) = forward();

        assert!(bus.subscribe("workspace:w:events", handler).await);
        assert_eq!(bus.publish("workspace:w:events", &json!({"n": 1})).await, 1);

        let (channel, message) = recv(&mut rx).await;
        assert_eq!(channel, "workspace:w:events");
        assert_eq!(message, json!({"n": 1}));
    }

    #[tokio::test]
    async fn two_buses_share_one_exchange() {
        let exchange = Arc::new(MemoryExchange::default());
        let node_a = connected_bus(&exchange).await;
        let node_b = connected_bus(&exchange).await;
        let (ha, mut rx_a) = forward();
        let (hb, mut rx_b) = forward();
        assert!(node_a.subscribe("c", ha).await);
        assert!(node_b.subscribe("c", hb).await);

        assert_eq!(node_a.publish("c", &json!("hi")).await, 2);
        assert_eq!(recv(&mut rx_a).await.1, json!("hi"));
        assert_eq!(recv(&mut rx_b).await.1, json!("hi"));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        let (h1, mut rx1) = forward();
        let (h2, mut rx2) = forward();

        assert!(bus.subscribe("c", h1).await);
        assert!(bus.subscribe("c", h2).await);
        assert_eq!(bus.subscription_count(), 1);
        assert_eq!(exchange.subscriber_count("c"), 1);

        assert_eq!(bus.publish("c", &json!(7)).await, 1);
        assert_eq!(recv(&mut rx1).await.1, json!(7));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_refused_when_disconnected() {
        let bus = BroadcastBus::new(Arc::new(MemoryBroker::standalone()));
        let (h, _rx) = forward();
        assert!(!bus.subscribe("c", h).await);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        let (h, mut rx) = forward();
        assert!(bus.subscribe("c", h).await);

        assert!(bus.unsubscribe("c"));
        assert!(!bus.unsubscribe("c"));
        assert!(!bus.is_subscribed("c"));

        // The receiver goes away once the task observes cancellation.
        tokio::time::timeout(Duration::from_secs(1), async {
            while exchange.subscriber_count("c") > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(bus.publish("c", &json!(1)).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_closes_subscriptions_then_link() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        let (h, _rx) = forward();
        assert!(bus.subscribe("c", h).await);

        bus.disconnect().await;
        assert!(!bus.is_connected());
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(exchange.subscriber_count("c"), 0);
        assert_eq!(bus.publish("c", &json!(1)).await, 0);
    }

    #[tokio::test]
    async fn disconnect_never_connected_is_noop() {
        let bus = BroadcastBus::new(Arc::new(MemoryBroker::standalone()));
        bus.disconnect().await;
        assert!(!bus.is_connected());
    }

    #[tokio::test]
    async fn non_json_payload_is_skipped() {
        let exchange = Arc::new(MemoryExchange::default());
        let bus = connected_bus(&exchange).await;
        let (h, mut rx) = forward();
        assert!(bus.subscribe("c", h).await);

        let _ = exchange.publish("c", "not json");
        let _ = exchange.publish("c", "{\"ok\":true}");
        assert_eq!(recv(&mut rx).await.1, json!({"ok": true}));
    }
}
