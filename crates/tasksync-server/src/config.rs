//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tasksync_settings::ServerSettings;

/// Listener and per-connection limits for [`SyncServer`](crate::SyncServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Bounded outbound queue per connection.
    pub outbound_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server Ping frames, in seconds.
    pub ping_interval_secs: u64,
    /// Close a connection after this long without a pong, in seconds.
    pub pong_timeout_secs: u64,
    /// Upper bound on one handler invocation, in seconds.
    pub handler_timeout_secs: u64,
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            outbound_queue_capacity: settings.outbound_queue_capacity,
            max_message_size: settings.max_message_size,
            ping_interval_secs: settings.ping_interval_secs,
            pong_timeout_secs: settings.pong_timeout_secs,
            handler_timeout_secs: settings.handler_timeout_secs,
        }
    }

    /// Ping cadence.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Pong deadline.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    /// Handler deadline.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            ping_interval_secs: 30,
            pong_timeout_secs: 90,
            handler_timeout_secs: 10,
        }
    }
}
