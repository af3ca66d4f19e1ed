//! HTTP / WebSocket front door.
//!
//! Routes:
//!
//! - `GET /ws/{workspace_id}?user_id=`: WebSocket upgrade
//! - `GET /health`: liveness and counters
//! - `GET /metrics`: Prometheus text
//! - `GET /workspaces/{workspace_id}/presence`
//! - `GET /workspaces/{workspace_id}/history?limit=`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tasksync_core::{ConnectionId, Identity, UserId, WorkspaceId};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, HealthSnapshot};
use crate::hub::CollabHub;
use crate::metrics::WS_REJECTED_TOTAL;
use crate::router::EventRouter;
use crate::shutdown::{ShutdownCoordinator, ShutdownOutcome};
use crate::websocket::session::run_ws_session;

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Collaboration hub.
    pub hub: Arc<CollabHub>,
    /// Inbound message router.
    pub router: Arc<EventRouter>,
    /// Listener and connection limits.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle; `/metrics` is 404 without one.
    pub metrics: Option<PrometheusHandle>,
    /// Server start time, for uptime.
    pub start_time: Instant,
    /// Cancelled when the server stops.
    pub shutdown: CancellationToken,
    /// Session slots; a permit is held from upgrade until the session ends.
    pub admission: Arc<Semaphore>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{workspace_id}", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/workspaces/{workspace_id}/presence", get(presence_handler))
        .route("/workspaces/{workspace_id}/history", get(history_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Where a started server is listening.
#[derive(Clone, Copy, Debug)]
pub struct ServerHandle {
    /// Bound address.
    pub addr: SocketAddr,
}

impl ServerHandle {
    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// The sync server: hub, router and listener lifecycle.
///
/// One start/stop cycle per instance; the shutdown token is not reusable.
pub struct SyncServer {
    config: Arc<ServerConfig>,
    hub: Arc<CollabHub>,
    router: Arc<EventRouter>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    admission: Arc<Semaphore>,
    start_time: Instant,
}

impl SyncServer {
    /// Create a server.
    pub fn new(
        config: ServerConfig,
        hub: Arc<CollabHub>,
        router: EventRouter,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let slots = config.max_connections.min(Semaphore::MAX_PERMITS);
        Self {
            config: Arc::new(config),
            admission: Arc::new(Semaphore::new(slots)),
            hub,
            router: Arc::new(router),
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// The axum app, without binding.
    pub fn app(&self) -> Router {
        build_router(AppState {
            hub: Arc::clone(&self.hub),
            router: Arc::clone(&self.router),
            config: Arc::clone(&self.config),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            shutdown: self.shutdown.token(),
            admission: Arc::clone(&self.admission),
        })
    }

    /// Connect the hub, bind and serve in the background.
    pub async fn start(&self) -> std::io::Result<ServerHandle> {
        let _ = self.hub.start().await;

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let app = self.app();
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "server terminated with error");
            }
        }));

        info!(addr = %local_addr, "tasksync server started");
        Ok(ServerHandle { addr: local_addr })
    }

    /// Stop accepting, end live sessions, wait (bounded) for the serve task,
    /// then close remaining connections and release the bus.
    pub async fn stop(&self) -> ShutdownOutcome {
        let outcome = self.shutdown.graceful_shutdown(None).await;
        self.hub.stop().await;
        info!(?outcome, "tasksync server stopped");
        outcome
    }

    /// Collaboration hub.
    pub fn hub(&self) -> &Arc<CollabHub> {
        &self.hub
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

#[derive(Debug, Deserialize)]
struct ConnectQuery {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// WebSocket upgrade handler.
///
/// The workspace comes from the path and the user from the query string;
/// an upstream gateway is expected to have authenticated both.
async fn ws_handler(
    Path(workspace_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = query.user_id.filter(|u| !u.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "user_id query parameter is required").into_response();
    };
    if workspace_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "workspace id is required").into_response();
    }
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let Ok(permit) = Arc::clone(&state.admission).try_acquire_owned() else {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(limit = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let identity = Identity::new(
        WorkspaceId::from(workspace_id),
        UserId::from(user_id),
        ConnectionId::new(),
    );
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _permit = permit;
            run_ws_session(socket, identity, state).await;
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    let bus = state.hub.bus();
    let snapshot = HealthSnapshot {
        connections: registry.connection_count(),
        workspaces: registry.workspace_ids().len(),
        broker_connected: bus.is_connected(),
        subscriptions: bus.subscription_count(),
    };
    Json(health::health_check(state.start_time, snapshot))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn presence_handler(
    Path(workspace_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let workspace_id = WorkspaceId::from(workspace_id);
    let members = state.hub.presence(&workspace_id).await;
    Json(json!({ "workspace_id": workspace_id, "members": members }))
}

async fn history_handler(
    Path(workspace_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let workspace_id = WorkspaceId::from(workspace_id);
    let messages = state.hub.history(&workspace_id, query.limit).await;
    Json(json!({ "workspace_id": workspace_id, "messages": messages }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tasksync_bus::{BroadcastBus, MemoryBroker};
    use tasksync_core::{Envelope, PresenceStatus};
    use tasksync_store::{MemoryHistoryStore, MemoryPresenceStore, PresenceStore};
    use tower::ServiceExt;

    fn make_server_with(presence: Arc<MemoryPresenceStore>) -> SyncServer {
        let bus = Arc::new(BroadcastBus::new(Arc::new(MemoryBroker::standalone())));
        let hub = Arc::new(CollabHub::new(
            bus,
            presence,
            Arc::new(MemoryHistoryStore::new()),
            HubConfig::default(),
        ));
        SyncServer::new(
            ServerConfig::default(),
            hub,
            EventRouter::new(Duration::from_secs(5)),
            None,
        )
    }

    fn make_server() -> SyncServer {
        make_server_with(Arc::new(MemoryPresenceStore::new()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let parsed = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, parsed)
    }

    #[tokio::test]
    async fn health_endpoint_returns_counters() {
        let server = make_server();
        let (status, body) = get_json(server.app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["workspaces"], 0);
        assert_eq!(body["broker_connected"], false);
        assert!(body["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_recorder_renders_text() {
        let bus = Arc::new(BroadcastBus::new(Arc::new(MemoryBroker::standalone())));
        let hub = Arc::new(CollabHub::new(
            bus,
            Arc::new(MemoryPresenceStore::new()),
            Arc::new(MemoryHistoryStore::new()),
            HubConfig::default(),
        ));
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let server = SyncServer::new(
            ServerConfig::default(),
            hub,
            EventRouter::new(Duration::from_secs(5)),
            Some(handle),
        );
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn presence_endpoint_lists_members() {
        let presence = Arc::new(MemoryPresenceStore::new());
        let _ = presence
            .set_presence(&"w1".into(), &"alice".into(), PresenceStatus::Away, Duration::from_secs(60))
            .await;
        let server = make_server_with(presence);

        let (status, body) = get_json(server.app(), "/workspaces/w1/presence").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workspace_id"], "w1");
        assert_eq!(body["members"]["alice"], "away");
    }

    #[tokio::test]
    async fn history_endpoint_honors_limit() {
        let server = make_server();
        let origin = Identity::new("w1".into(), "alice".into(), "c1".into());
        for i in 0..3 {
            let env = Envelope::event("task.created", "w1".into(), "alice".into(), json!({"n": i}));
            let _ = server.hub().publish_event(&origin, env).await;
        }

        let (_, body) = get_json(server.app(), "/workspaces/w1/history?limit=2").await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["data"]["n"], 2);

        let (_, body) = get_json(server.app(), "/workspaces/w1/history").await;
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = server.app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_and_stop() {
        let server = make_server();
        let handle = server.start().await.unwrap();
        assert_ne!(handle.port(), 0);
        assert!(server.hub().bus().is_connected());

        let outcome = server.stop().await;
        assert_eq!(outcome.aborted, 0);
        assert!(server.shutdown().is_shutting_down());
        assert!(!server.hub().bus().is_connected());
    }
}
