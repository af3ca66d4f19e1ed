//! Wire-level message types.
//!
//! Clients send `{"type": ..., "data": {...}}`. The workspace and user are
//! never read from the payload; the transport layer supplies them from the
//! authenticated session. The server answers with either a success envelope
//! (`success: true`, echoing workspace, user and data) or an error envelope
//! (`type: "error.message"` with a machine-readable code).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fanout::Origin;
use crate::ids::{UserId, WorkspaceId};

/// Message type strings understood by the router.
pub mod message_types {
    /// A task was created.
    pub const TASK_CREATED: &str = "task.created";
    /// A task was updated.
    pub const TASK_UPDATED: &str = "task.updated";
    /// A task was deleted.
    pub const TASK_DELETED: &str = "task.deleted";
    /// A task's completion flag was toggled.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// Client keep-alive; refreshes presence.
    pub const HEARTBEAT: &str = "connection.heartbeat";
    /// Reply to [`HEARTBEAT`].
    pub const HEARTBEAT_ACK: &str = "connection.heartbeat_ack";
    /// First frame a client receives after registration.
    pub const CONNECTION_ESTABLISHED: &str = "connection.established";
    /// Type of every error envelope.
    pub const ERROR: &str = "error.message";
}

/// Error codes carried by error envelopes.
pub mod error_codes {
    /// No handler registered for the message type.
    pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN_MESSAGE_TYPE";
    /// Frame was not valid JSON or lacked a `type`.
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    /// `task.created` handler failed.
    pub const TASK_CREATE_FAILED: &str = "TASK_CREATE_FAILED";
    /// `task.updated` handler failed.
    pub const TASK_UPDATE_FAILED: &str = "TASK_UPDATE_FAILED";
    /// `task.deleted` handler failed.
    pub const TASK_DELETE_FAILED: &str = "TASK_DELETE_FAILED";
    /// `task.completed` handler failed.
    pub const TASK_COMPLETE_FAILED: &str = "TASK_COMPLETE_FAILED";
    /// `connection.heartbeat` handler failed.
    pub const HEARTBEAT_FAILED: &str = "HEARTBEAT_FAILED";
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Inbound client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message type (e.g. `task.created`).
    #[serde(rename = "type")]
    pub message_type: String,
    /// Opaque payload; defaults to `{}` when omitted.
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Successful outbound envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Mirrors the inbound type, or a distinguished ack type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Workspace the event belongs to.
    pub workspace_id: WorkspaceId,
    /// User that originated the event.
    pub user_id: UserId,
    /// Effected data.
    pub data: Value,
    /// Always `true` for this variant.
    pub success: bool,
}

/// Error outbound envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always [`message_types::ERROR`].
    #[serde(rename = "type")]
    pub message_type: String,
    /// Machine-readable code (see [`error_codes`]).
    pub error_code: String,
    /// Human-readable description.
    pub error_message: String,
}

/// Any envelope the server sends to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Success / event payload.
    Event(EventEnvelope),
    /// Error payload.
    Error(ErrorEnvelope),
}

impl Envelope {
    /// Build a success envelope.
    pub fn event(
        message_type: impl Into<String>,
        workspace_id: WorkspaceId,
        user_id: UserId,
        data: Value,
    ) -> Self {
        Self::Event(EventEnvelope {
            message_type: message_type.into(),
            workspace_id,
            user_id,
            data,
            success: true,
        })
    }

    /// Build an error envelope.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(ErrorEnvelope {
            message_type: message_types::ERROR.to_owned(),
            error_code: code.into(),
            error_message: message.into(),
        })
    }

    /// The `type` field.
    pub fn message_type(&self) -> &str {
        match self {
            Self::Event(e) => &e.message_type,
            Self::Error(e) => &e.message_type,
        }
    }

    /// Whether this is an error envelope.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Error code, if this is an error envelope.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error(e) => Some(&e.error_code),
            Self::Event(_) => None,
        }
    }

    /// Borrow the success payload, if any.
    pub fn as_event(&self) -> Option<&EventEnvelope> {
        match self {
            Self::Event(e) => Some(e),
            Self::Error(_) => None,
        }
    }
}

/// Payload published on a workspace channel.
///
/// Carries the origin alongside the envelope so every instance can apply the
/// same exclusion rule when delivering to its local sockets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    /// Target workspace.
    pub workspace_id: WorkspaceId,
    /// Originating user and socket.
    pub origin: Origin,
    /// Envelope delivered to workspace members.
    pub envelope: Envelope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConnectionId;
    use serde_json::json;

    #[test]
    fn inbound_defaults_data_to_empty_object() {
        let msg: InboundMessage = serde_json::from_str(r#"{"type":"connection.heartbeat"}"#).unwrap();
        assert_eq!(msg.message_type, message_types::HEARTBEAT);
        assert_eq!(msg.data, json!({}));
    }

    #[test]
    fn inbound_requires_type() {
        let result = serde_json::from_str::<InboundMessage>(r#"{"data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn event_envelope_wire_shape() {
        let env = Envelope::event(
            message_types::TASK_CREATED,
            WorkspaceId::from("w1"),
            UserId::from("u1"),
            json!({"title": "ship it"}),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "task.created",
                "workspace_id": "w1",
                "user_id": "u1",
                "data": {"title": "ship it"},
                "success": true,
            })
        );
    }

    #[test]
    fn error_envelope_wire_shape() {
        let env = Envelope::error(error_codes::UNKNOWN_MESSAGE_TYPE, "Unknown message type: x");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "error.message",
                "error_code": "UNKNOWN_MESSAGE_TYPE",
                "error_message": "Unknown message type: x",
            })
        );
        assert!(env.is_error());
        assert_eq!(env.error_code(), Some("UNKNOWN_MESSAGE_TYPE"));
    }

    #[test]
    fn untagged_decode_picks_variant() {
        let ok: Envelope = serde_json::from_value(json!({
            "type": "task.deleted",
            "workspace_id": "w",
            "user_id": "u",
            "data": {"task_id": 3},
            "success": true,
        }))
        .unwrap();
        assert!(ok.as_event().is_some());

        let err: Envelope = serde_json::from_value(json!({
            "type": "error.message",
            "error_code": "TASK_DELETE_FAILED",
            "error_message": "nope",
        }))
        .unwrap();
        assert_eq!(err.error_code(), Some("TASK_DELETE_FAILED"));
    }

    #[test]
    fn bus_event_carries_origin() {
        let event = BusEvent {
            workspace_id: WorkspaceId::from("w"),
            origin: Origin {
                user_id: UserId::from("u"),
                connection_id: ConnectionId::from("c"),
            },
            envelope: Envelope::event("task.updated", "w".into(), "u".into(), json!({})),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.origin.connection_id.as_str(), "c");
    }
}
