//! Store abstractions shared by the hub and the HTTP read endpoints.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tasksync_core::{PresenceStatus, UserId, WorkspaceId};

/// Presence records keyed by (workspace, user) with per-record expiry.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Upsert a user's status. The record expires `ttl` after this call;
    /// every write slides the horizon. Returns `false` if the store failed.
    async fn set_presence(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: PresenceStatus,
        ttl: Duration,
    ) -> bool;

    /// All non-expired records of a workspace. Empty on failure.
    async fn get_presence(&self, workspace_id: &WorkspaceId) -> HashMap<UserId, PresenceStatus>;
}

/// Per-workspace list of recent envelopes, newest first.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Insert at the head and keep at most `cap` entries. `cap == 0` records
    /// nothing and returns `false`.
    async fn append(&self, workspace_id: &WorkspaceId, message: &Value, cap: usize) -> bool;

    /// Up to `limit` entries, newest first.
    async fn read(&self, workspace_id: &WorkspaceId, limit: usize) -> Vec<Value>;
}
