//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared across modules.

/// Registered connections total (counter).
pub const CONNECTIONS_TOTAL: &str = "registry_connections_total";
/// Removed connections total (counter).
pub const DISCONNECTIONS_TOTAL: &str = "registry_disconnections_total";
/// Currently registered connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "registry_connections_active";
/// Successful per-connection sends (counter).
pub const BROADCAST_SENDS_TOTAL: &str = "registry_sends_total";
/// Failed per-connection sends, each an implicit disconnect (counter).
pub const BROADCAST_FAILURES_TOTAL: &str = "registry_send_failures_total";
/// Routed inbound messages (counter, labels: type).
pub const ROUTER_MESSAGES_TOTAL: &str = "router_messages_total";
/// Routing failures (counter, labels: type, error_type).
pub const ROUTER_ERRORS_TOTAL: &str = "router_errors_total";
/// Handler duration seconds (histogram, labels: type).
pub const ROUTER_HANDLER_DURATION_SECONDS: &str = "router_handler_duration_seconds";
/// Events delivered locally because the bus reached nobody (counter).
pub const HUB_LOCAL_FALLBACK_TOTAL: &str = "hub_local_fallback_total";
/// WebSocket sessions opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket session duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused at the connection limit (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
