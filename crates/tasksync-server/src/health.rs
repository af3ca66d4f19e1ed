//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Local WebSocket connections.
    pub connections: usize,
    /// Workspaces with at least one local connection.
    pub workspaces: usize,
    /// Whether the broker link is up. When `false` fanout is local only.
    pub broker_connected: bool,
    /// Workspace channels this process listens on.
    pub subscriptions: usize,
}

/// Live counters sampled for a health response.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSnapshot {
    /// Local connections.
    pub connections: usize,
    /// Local workspaces.
    pub workspaces: usize,
    /// Broker link state.
    pub broker_connected: bool,
    /// Active channel subscriptions.
    pub subscriptions: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, snapshot: HealthSnapshot) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: snapshot.connections,
        workspaces: snapshot.workspaces,
        broker_connected: snapshot.broker_connected,
        subscriptions: snapshot.subscriptions,
    }
}
