//! WebSocket message dispatch: parses incoming text as an
//! [`InboundMessage`] and routes it through the [`EventRouter`].

use tasksync_core::envelope::error_codes;
use tasksync_core::{Envelope, Identity, InboundMessage};
use tracing::{debug, instrument, warn};

use crate::router::EventRouter;

/// Result of handling a WebSocket message.
#[derive(Debug)]
pub struct HandleResult {
    /// The message type that was routed (empty if parsing failed).
    pub message_type: String,
    /// Envelope for the sender.
    pub reply: Envelope,
    /// Envelope for the rest of the workspace, if any.
    pub broadcast: Option<Envelope>,
}

/// Handle an incoming WebSocket text frame.
#[instrument(skip_all, fields(message_type))]
pub async fn handle_message(text: &str, identity: &Identity, router: &EventRouter) -> HandleResult {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(connection_id = %identity.connection_id, "invalid message received");
            return HandleResult {
                message_type: String::new(),
                reply: Envelope::error(error_codes::INVALID_MESSAGE, format!("Invalid message: {e}")),
                broadcast: None,
            };
        }
    };

    let message_type = message.message_type.clone();
    let _ = tracing::Span::current().record("message_type", message_type.as_str());
    debug!(message_type, "dispatching message");

    let outcome = router.route(identity, message).await;
    HandleResult {
        message_type,
        reply: outcome.reply,
        broadcast: outcome.broadcast,
    }
}
