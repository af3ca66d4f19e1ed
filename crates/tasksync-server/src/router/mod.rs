//! Inbound message dispatch.
//!
//! Every inbound frame resolves to exactly one reply envelope. Handler
//! errors, panics and timeouts are turned into `error.message` envelopes at
//! this boundary and never reach the transport.

pub mod errors;
pub mod handlers;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tasksync_core::envelope::error_codes;
use tasksync_core::{Envelope, Identity, InboundMessage};
use tracing::{debug, error, warn};

use crate::metrics::{ROUTER_ERRORS_TOTAL, ROUTER_HANDLER_DURATION_SECONDS, ROUTER_MESSAGES_TOTAL};

pub use errors::{DomainError, HandlerError};

/// What a handler produced.
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerOutput {
    /// Reply type; `None` mirrors the inbound type.
    pub reply_type: Option<String>,
    /// Effected data echoed to the caller (and to the workspace).
    pub data: Value,
    /// Whether the result fans out to the workspace.
    pub broadcast: bool,
}

impl HandlerOutput {
    /// Reply mirroring the inbound type, fanned out to the workspace.
    pub fn broadcast(data: Value) -> Self {
        Self {
            reply_type: None,
            data,
            broadcast: true,
        }
    }

    /// Reply to the caller only, with a distinguished type.
    pub fn reply(reply_type: impl Into<String>, data: Value) -> Self {
        Self {
            reply_type: Some(reply_type.into()),
            data,
            broadcast: false,
        }
    }
}

/// Trait implemented by every message handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Execute the handler for the session's identity.
    async fn handle(&self, identity: &Identity, data: Value) -> Result<HandlerOutput, HandlerError>;

    /// Error code sent back when this handler fails.
    fn failure_code(&self) -> &'static str;
}

/// Result of routing one message.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteOutcome {
    /// Envelope returned to the sender.
    pub reply: Envelope,
    /// Envelope to fan out to the workspace, if any.
    pub broadcast: Option<Envelope>,
}

impl RouteOutcome {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            reply: Envelope::error(code, message),
            broadcast: None,
        }
    }
}

/// Registry mapping message types to handlers.
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    timeout: Duration,
}

impl EventRouter {
    /// Create an empty router whose handlers run under `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler for a message type, replacing any previous one.
    pub fn register(&mut self, message_type: &str, handler: impl EventHandler + 'static) {
        let _ = self
            .handlers
            .insert(message_type.to_owned(), Arc::new(handler));
    }

    /// Whether a handler exists for `message_type`.
    pub fn has_handler(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Dispatch `message` under `identity`.
    pub async fn route(&self, identity: &Identity, message: InboundMessage) -> RouteOutcome {
        let InboundMessage { message_type, data } = message;
        counter!(ROUTER_MESSAGES_TOTAL, "type" => message_type.clone()).increment(1);

        let Some(handler) = self.handlers.get(&message_type) else {
            counter!(ROUTER_ERRORS_TOTAL, "type" => message_type.clone(), "error_type" => "unknown_type").increment(1);
            warn!(message_type, "unknown message type");
            return RouteOutcome::error(
                error_codes::UNKNOWN_MESSAGE_TYPE,
                format!("Unknown message type: {message_type}"),
            );
        };

        let start = Instant::now();
        let call = AssertUnwindSafe(handler.handle(identity, data)).catch_unwind();
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(HandlerError::Panicked),
            Err(_elapsed) => Err(HandlerError::Timeout(self.timeout)),
        };
        histogram!(ROUTER_HANDLER_DURATION_SECONDS, "type" => message_type.clone())
            .record(start.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                debug!(message_type, broadcast = output.broadcast, "handler succeeded");
                let reply_type = output.reply_type.unwrap_or_else(|| message_type.clone());
                let broadcast = output.broadcast.then(|| {
                    Envelope::event(
                        message_type.clone(),
                        identity.workspace_id.clone(),
                        identity.user_id.clone(),
                        output.data.clone(),
                    )
                });
                RouteOutcome {
                    reply: Envelope::event(
                        reply_type,
                        identity.workspace_id.clone(),
                        identity.user_id.clone(),
                        output.data,
                    ),
                    broadcast,
                }
            }
            Err(err) => {
                counter!(ROUTER_ERRORS_TOTAL, "type" => message_type.clone(), "error_type" => err.kind()).increment(1);
                match &err {
                    HandlerError::Panicked | HandlerError::Timeout(_) => {
                        error!(message_type, error = %err, "handler aborted");
                    }
                    _ => warn!(message_type, error = %err, "handler failed"),
                }
                RouteOutcome::error(handler.failure_code(), err.to_string())
            }
        }
    }
}
