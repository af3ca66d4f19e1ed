//! Collaboration hub: one process's view of the cluster.
//!
//! Joins register a socket locally and make sure this process listens on the
//! workspace channel. Events are recorded in history and published on the
//! bus; every process subscribed to the channel (this one included) delivers
//! them to its own sockets with the configured exclusion applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tasksync_bus::{BroadcastBus, ChannelHandler};
use tasksync_core::{
    BusEvent, Envelope, ExclusionPolicy, Identity, PresenceStatus, UserId, WorkspaceId, keys,
};
use tasksync_settings::TaskSyncSettings;
use tasksync_store::{HistoryStore, PresenceStore};
use tracing::{debug, info, warn};

use crate::metrics::HUB_LOCAL_FALLBACK_TOTAL;
use crate::registry::{ConnectionRegistry, Exclusion, RegistryError};
use crate::transport::Transport;

/// Hub tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Sliding expiry for presence records.
    pub presence_ttl: Duration,
    /// Entries kept per workspace history. Zero disables recording.
    pub history_cap: usize,
    /// Default history read size.
    pub history_read_limit: usize,
    /// Echo exclusion applied on delivery.
    pub exclusion: ExclusionPolicy,
}

impl HubConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &TaskSyncSettings) -> Self {
        Self {
            presence_ttl: Duration::from_secs(settings.presence.ttl_secs),
            history_cap: settings.history.cap,
            history_read_limit: settings.history.read_limit,
            exclusion: settings.fanout.exclusion,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            presence_ttl: Duration::from_secs(60),
            history_cap: 100,
            history_read_limit: 100,
            exclusion: ExclusionPolicy::User,
        }
    }
}

/// Delivers bus traffic to this process's sockets.
struct WorkspaceDelivery {
    registry: Arc<ConnectionRegistry>,
    policy: ExclusionPolicy,
}

#[async_trait]
impl ChannelHandler for WorkspaceDelivery {
    async fn handle(&self, channel: &str, message: Value) {
        let event: BusEvent = match serde_json::from_value(message) {
            Ok(event) => event,
            Err(error) => {
                warn!(channel, %error, "dropping malformed bus event");
                return;
            }
        };
        if keys::parse_workspace_channel(channel).as_ref() != Some(&event.workspace_id) {
            warn!(channel, workspace_id = %event.workspace_id, "bus event on foreign channel");
            return;
        }
        deliver_local(&self.registry, self.policy, &event);
    }
}

fn deliver_local(registry: &ConnectionRegistry, policy: ExclusionPolicy, event: &BusEvent) -> usize {
    let exclusion = Exclusion::for_origin(policy, &event.origin);
    registry.broadcast_to_workspace(&event.workspace_id, &event.envelope, &exclusion)
}

/// Wires the registry to the bus and the shared stores.
pub struct CollabHub {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<BroadcastBus>,
    presence: Arc<dyn PresenceStore>,
    history: Arc<dyn HistoryStore>,
    config: HubConfig,
    delivery: Arc<WorkspaceDelivery>,
    // Serializes subscribe/unsubscribe decisions across join and leave.
    subscriptions: tokio::sync::Mutex<()>,
}

impl CollabHub {
    /// Assemble a hub. Call [`start`](Self::start) before accepting sockets.
    pub fn new(
        bus: Arc<BroadcastBus>,
        presence: Arc<dyn PresenceStore>,
        history: Arc<dyn HistoryStore>,
        config: HubConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let delivery = Arc::new(WorkspaceDelivery {
            registry: Arc::clone(&registry),
            policy: config.exclusion,
        });
        Self {
            registry,
            bus,
            presence,
            history,
            config,
            delivery,
            subscriptions: tokio::sync::Mutex::new(()),
        }
    }

    /// Connect the bus. Returns `false` if the broker is unreachable; the
    /// hub still serves local traffic in that case.
    pub async fn start(&self) -> bool {
        let connected = self.bus.connect().await;
        if !connected {
            warn!("hub started without a broker, delivering locally only");
        }
        connected
    }

    /// Close every local connection, then release the bus.
    pub async fn stop(&self) {
        let closed = self.registry.close_all();
        self.bus.disconnect().await;
        info!(closed, "hub stopped");
    }

    /// Register a socket, subscribe its workspace channel if needed and mark
    /// its user online.
    pub async fn join(
        &self,
        transport: Arc<dyn Transport>,
        identity: &Identity,
    ) -> Result<(), RegistryError> {
        self.registry
            .connect(
                transport,
                identity.workspace_id.clone(),
                identity.user_id.clone(),
                identity.connection_id.clone(),
            )
            .await?;

        self.ensure_subscribed(&identity.workspace_id).await;

        let _ = self
            .presence
            .set_presence(
                &identity.workspace_id,
                &identity.user_id,
                PresenceStatus::Online,
                self.config.presence_ttl,
            )
            .await;
        Ok(())
    }

    /// Deregister a socket and drop the workspace subscription once no local
    /// socket remains. Safe to call after the registry already removed it.
    pub async fn leave(&self, identity: &Identity) {
        let _ = self.registry.disconnect(&identity.connection_id);

        let _guard = self.subscriptions.lock().await;
        if self.registry.workspace_connection_count(&identity.workspace_id) == 0 {
            let channel = keys::workspace_channel(&identity.workspace_id);
            if self.bus.unsubscribe(&channel) {
                debug!(channel = %channel, "last local member left, unsubscribed");
            }
        }
    }

    /// Record `envelope` and fan it out to the workspace on every process.
    ///
    /// Returns the number of bus subscribers reached. When that is zero
    /// (broker down) or this process has no live subscription on the
    /// channel, the event is delivered to local sockets directly and the
    /// subscription is re-established for later events.
    pub async fn publish_event(&self, origin: &Identity, envelope: Envelope) -> usize {
        let workspace_id = origin.workspace_id.clone();
        match serde_json::to_value(&envelope) {
            Ok(record) => {
                let _ = self
                    .history
                    .append(&workspace_id, &record, self.config.history_cap)
                    .await;
            }
            Err(error) => warn!(%error, "failed to encode envelope for history"),
        }

        let event = BusEvent {
            workspace_id,
            origin: origin.origin(),
            envelope,
        };
        let channel = keys::workspace_channel(&event.workspace_id);
        // Read before publishing so a fresh subscription never double-delivers.
        let listening = self.bus.is_subscribed(&channel);
        let reached = self.bus.publish(&channel, &event).await;
        if reached == 0 || !listening {
            counter!(HUB_LOCAL_FALLBACK_TOTAL).increment(1);
            let delivered = deliver_local(&self.registry, self.config.exclusion, &event);
            debug!(channel = %channel, reached, delivered, "not listening on bus, delivered locally");
        }
        if !listening {
            self.ensure_subscribed(&event.workspace_id).await;
        }
        reached
    }

    /// Subscribe the workspace channel when the bus is up, local members
    /// remain and no live subscription exists. Also replaces a subscription
    /// whose broker stream ended.
    async fn ensure_subscribed(&self, workspace_id: &WorkspaceId) {
        let _guard = self.subscriptions.lock().await;
        let channel = keys::workspace_channel(workspace_id);
        if !self.bus.is_connected()
            || self.bus.is_subscribed(&channel)
            || self.registry.workspace_connection_count(workspace_id) == 0
        {
            return;
        }
        let handler: Arc<dyn ChannelHandler> = self.delivery.clone();
        if !self.bus.subscribe(&channel, handler).await {
            warn!(channel = %channel, "workspace subscription failed, local delivery only");
        }
    }

    /// Current presence for a workspace.
    pub async fn presence(&self, workspace_id: &WorkspaceId) -> HashMap<UserId, PresenceStatus> {
        self.presence.get_presence(workspace_id).await
    }

    /// Recent envelopes, newest first. `None` uses the configured limit.
    pub async fn history(&self, workspace_id: &WorkspaceId, limit: Option<usize>) -> Vec<Value> {
        let limit = limit.unwrap_or(self.config.history_read_limit);
        self.history.read(workspace_id, limit).await
    }

    /// Local connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Broadcast bus.
    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.bus
    }

    /// Active configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}
