//! Built-in handlers: task mutations and client heartbeat.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tasksync_core::envelope::{error_codes, message_types};
use tasksync_core::{Identity, PresenceStatus, UserId, WorkspaceId};
use tasksync_store::PresenceStore;
use tracing::{debug, warn};

use super::{DomainError, EventHandler, EventRouter, HandlerError, HandlerOutput};

/// The four task mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskAction {
    /// `task.created`
    Create,
    /// `task.updated`
    Update,
    /// `task.deleted`
    Delete,
    /// `task.completed`
    Complete,
}

impl TaskAction {
    /// All actions, in registration order.
    pub const ALL: [Self; 4] = [Self::Create, Self::Update, Self::Delete, Self::Complete];

    /// Inbound message type.
    pub fn message_type(self) -> &'static str {
        match self {
            Self::Create => message_types::TASK_CREATED,
            Self::Update => message_types::TASK_UPDATED,
            Self::Delete => message_types::TASK_DELETED,
            Self::Complete => message_types::TASK_COMPLETED,
        }
    }

    /// Error code when the action fails.
    pub fn failure_code(self) -> &'static str {
        match self {
            Self::Create => error_codes::TASK_CREATE_FAILED,
            Self::Update => error_codes::TASK_UPDATE_FAILED,
            Self::Delete => error_codes::TASK_DELETE_FAILED,
            Self::Complete => error_codes::TASK_COMPLETE_FAILED,
        }
    }
}

/// Domain collaborator that applies a task mutation.
///
/// Returns the canonical resulting object, which is what gets echoed to the
/// caller and fanned out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskEffects: Send + Sync {
    /// Apply `action` with `data` on behalf of `user_id` in `workspace_id`.
    async fn apply(
        &self,
        action: TaskAction,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        data: Value,
    ) -> Result<Value, DomainError>;
}

/// Pass-through effects for deployments that persist tasks elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoTaskEffects;

#[async_trait]
impl TaskEffects for EchoTaskEffects {
    async fn apply(
        &self,
        _action: TaskAction,
        _workspace_id: &WorkspaceId,
        _user_id: &UserId,
        data: Value,
    ) -> Result<Value, DomainError> {
        Ok(data)
    }
}

/// Handler for one [`TaskAction`].
pub struct TaskHandler {
    action: TaskAction,
    effects: Arc<dyn TaskEffects>,
}

impl TaskHandler {
    /// Handle `action` through `effects`.
    pub fn new(action: TaskAction, effects: Arc<dyn TaskEffects>) -> Self {
        Self { action, effects }
    }

    fn validate(&self, data: &Value) -> Result<(), HandlerError> {
        let Some(object) = data.as_object() else {
            return Err(HandlerError::InvalidPayload("data must be an object".into()));
        };
        match self.action {
            TaskAction::Create => match object.get("title").and_then(Value::as_str) {
                Some(title) if !title.trim().is_empty() => Ok(()),
                _ => Err(HandlerError::InvalidPayload(
                    "title must be a non-empty string".into(),
                )),
            },
            TaskAction::Update | TaskAction::Delete | TaskAction::Complete => {
                match object.get("task_id") {
                    Some(id) if !id.is_null() => Ok(()),
                    _ => Err(HandlerError::InvalidPayload("task_id is required".into())),
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for TaskHandler {
    async fn handle(&self, identity: &Identity, data: Value) -> Result<HandlerOutput, HandlerError> {
        self.validate(&data)?;
        let effected = self
            .effects
            .apply(self.action, &identity.workspace_id, &identity.user_id, data)
            .await?;
        Ok(HandlerOutput::broadcast(effected))
    }

    fn failure_code(&self) -> &'static str {
        self.action.failure_code()
    }
}

/// Refreshes the sender's presence and acknowledges with the server clock.
pub struct HeartbeatHandler {
    presence: Arc<dyn PresenceStore>,
    ttl: Duration,
}

impl HeartbeatHandler {
    /// Mark senders online for `ttl` in `presence`.
    pub fn new(presence: Arc<dyn PresenceStore>, ttl: Duration) -> Self {
        Self { presence, ttl }
    }
}

#[async_trait]
impl EventHandler for HeartbeatHandler {
    async fn handle(&self, identity: &Identity, _data: Value) -> Result<HandlerOutput, HandlerError> {
        let stored = self
            .presence
            .set_presence(
                &identity.workspace_id,
                &identity.user_id,
                PresenceStatus::Online,
                self.ttl,
            )
            .await;
        if stored {
            debug!(user_id = %identity.user_id, "presence refreshed");
        } else {
            warn!(
                workspace_id = %identity.workspace_id,
                user_id = %identity.user_id,
                "presence refresh failed"
            );
        }
        Ok(HandlerOutput::reply(
            message_types::HEARTBEAT_ACK,
            json!({ "server_time": chrono::Utc::now().to_rfc3339() }),
        ))
    }

    fn failure_code(&self) -> &'static str {
        error_codes::HEARTBEAT_FAILED
    }
}

/// Register the task and heartbeat handlers on `router`.
pub fn register_defaults(
    router: &mut EventRouter,
    effects: Arc<dyn TaskEffects>,
    presence: Arc<dyn PresenceStore>,
    presence_ttl: Duration,
) {
    for action in TaskAction::ALL {
        router.register(action.message_type(), TaskHandler::new(action, Arc::clone(&effects)));
    }
    router.register(
        message_types::HEARTBEAT,
        HeartbeatHandler::new(presence, presence_ttl),
    );
}
