//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use serde_json::json;
use tasksync_core::envelope::message_types;
use tasksync_core::{Envelope, Identity};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::server::AppState;
use crate::transport::Transport;

/// How long the writer may keep flushing after the session ends.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Run a WebSocket session for a connected client.
///
/// 1. Joins the hub (registry, workspace subscription, presence)
/// 2. Sends `connection.established` carrying the connection id
/// 3. Forwards queued outbound frames and periodic Pings from a writer task
/// 4. Routes inbound frames; replies go to the sender, broadcasts to the hub
/// 5. Leaves the hub on any exit path
#[instrument(skip_all, fields(
    workspace_id = %identity.workspace_id,
    user_id = %identity.user_id,
    connection_id = %identity.connection_id,
))]
pub async fn run_ws_session(ws: WebSocket, identity: Identity, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.outbound_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(identity.connection_id.clone(), send_tx));

    if let Err(error) = state.hub.join(connection.clone(), &identity).await {
        warn!(%error, "join failed, closing socket");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Written directly so it precedes anything already queued by broadcasts.
    let established = Envelope::event(
        message_types::CONNECTION_ESTABLISHED,
        identity.workspace_id.clone(),
        identity.user_id.clone(),
        json!({ "connection_id": identity.connection_id }),
    );
    if let Ok(text) = serde_json::to_string(&established) {
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            connection.close();
        }
    }

    let writer_conn = connection.clone();
    let writer_closed = connection.closed_token();
    let ping_every = state.config.ping_interval();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(Message::Text(String::clone(&text).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_closed.cancelled() => break,
            }
        }
        writer_conn.close();
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let hb_conn = connection.clone();
    let hb_cancel = connection.closed_token();
    let pong_timeout = state.config.pong_timeout();
    let heartbeat = tokio::spawn(async move {
        if run_heartbeat(hb_conn.clone(), ping_every, pong_timeout, hb_cancel).await
            == HeartbeatResult::TimedOut
        {
            warn!(timeout = ?pong_timeout, "client unresponsive, disconnecting");
            hb_conn.close();
        }
    });

    let closed = connection.closed_token();
    let shutdown = state.shutdown.clone();
    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = closed.cancelled() => {
                debug!("connection closed by server");
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
        };
        let Some(Ok(msg)) = frame else { break };
        connection.mark_alive();

        // Accept text or UTF-8 binary frames
        let text = match msg {
            Message::Text(t) => Some(t.to_string()),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    Some(s.to_owned())
                } else {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            }
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => None,
        };
        let Some(text) = text else { continue };

        let result = handle_message(&text, &identity, &state.router).await;
        if !state
            .hub
            .registry()
            .send_to_connection(&identity.connection_id, &result.reply)
        {
            info!(message_type = %result.message_type, "failed to enqueue reply");
            break;
        }
        if let Some(event) = result.broadcast {
            let _ = state.hub.publish_event(&identity, event).await;
        }
    }

    connection.close();
    state.hub.leave(&identity).await;
    let _ = heartbeat.await;
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
