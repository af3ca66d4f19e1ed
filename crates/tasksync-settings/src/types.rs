//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may be partial: missing fields keep their compiled default.

use serde::{Deserialize, Serialize};
use tasksync_core::ExclusionPolicy;

use crate::errors::{Result, SettingsError};

/// Root settings type for a tasksync node.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "broker": { "backend": "memory" },
///   "fanout": { "exclusion": "connection" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSyncSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Pub/sub broker connection.
    pub broker: BrokerSettings,
    /// Presence store.
    pub presence: PresenceSettings,
    /// History ring.
    pub history: HistorySettings,
    /// Fanout behavior.
    pub fanout: FanoutSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

impl TaskSyncSettings {
    /// Reject values that would make the node unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalSecs must be at least 1".into(),
            ));
        }
        if self.server.pong_timeout_secs < self.server.ping_interval_secs {
            return Err(SettingsError::InvalidValue(
                "server.pongTimeoutSecs must not be shorter than pingIntervalSecs".into(),
            ));
        }
        if !(1..=MAX_PRESENCE_TTL_SECS).contains(&self.presence.ttl_secs) {
            return Err(SettingsError::InvalidValue(format!(
                "presence.ttlSecs must be between 1 and {MAX_PRESENCE_TTL_SECS}"
            )));
        }
        Ok(())
    }
}

/// Listener and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Upgrades are refused with 503 beyond this many live connections.
    pub max_connections: usize,
    /// Bounded outbound queue per connection.
    pub outbound_queue_capacity: usize,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval_secs: u64,
    /// A connection with no pong for this long is closed.
    pub pong_timeout_secs: u64,
    /// Upper bound on a single handler invocation.
    pub handler_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            max_connections: 10_000,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
            handler_timeout_secs: 10,
        }
    }
}

/// Which broker implementation backs the bus and the shared stores.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    /// Redis pub/sub plus Redis hashes and lists.
    #[default]
    Redis,
    /// In-process exchange; single node only.
    Memory,
}

/// Broker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Backend selection.
    pub backend: BrokerBackend,
    /// Connection URL (ignored by the memory backend).
    pub url: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Redis,
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Longest accepted presence TTL (one day).
pub const MAX_PRESENCE_TTL_SECS: u64 = 86_400;

/// Presence store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Sliding expiry applied on every presence write.
    pub ttl_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self { ttl_secs: 60 }
    }
}

/// History ring settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Entries kept per workspace. Zero disables recording.
    pub cap: usize,
    /// Default number of entries returned by a history read.
    pub read_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            cap: 100,
            read_limit: 100,
        }
    }
}

/// Fanout settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FanoutSettings {
    /// Which recipients are skipped for an event's origin.
    pub exclusion: ExclusionPolicy,
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
