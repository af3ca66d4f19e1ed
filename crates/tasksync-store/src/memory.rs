//! In-process stores for single-node deployments and tests.
//!
//! Expiry is passive: stale presence records are dropped whenever the
//! workspace is read or written. Deadlines use the tokio clock so tests can
//! drive them with a paused runtime.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tasksync_core::{PresenceStatus, UserId, WorkspaceId};
use tokio::time::Instant;

use crate::traits::{HistoryStore, PresenceStore};

#[derive(Clone, Copy, Debug)]
struct PresenceRecord {
    status: PresenceStatus,
    expires_at: Instant,
}

/// In-memory [`PresenceStore`].
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    workspaces: Mutex<HashMap<WorkspaceId, HashMap<UserId, PresenceRecord>>>,
}

impl MemoryPresenceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Far enough out to never expire in practice.
const FOREVER: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FOREVER))
        .unwrap_or(now)
}

fn prune(records: &mut HashMap<UserId, PresenceRecord>, now: Instant) {
    records.retain(|_, r| r.expires_at > now);
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_presence(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: PresenceStatus,
        ttl: Duration,
    ) -> bool {
        let now = Instant::now();
        let mut workspaces = self.workspaces.lock();
        let records = workspaces.entry(workspace_id.clone()).or_default();
        prune(records, now);
        let _ = records.insert(
            user_id.clone(),
            PresenceRecord {
                status,
                expires_at: deadline(now, ttl),
            },
        );
        true
    }

    async fn get_presence(&self, workspace_id: &WorkspaceId) -> HashMap<UserId, PresenceStatus> {
        let now = Instant::now();
        let mut workspaces = self.workspaces.lock();
        let Some(records) = workspaces.get_mut(workspace_id) else {
            return HashMap::new();
        };
        prune(records, now);
        if records.is_empty() {
            let _ = workspaces.remove(workspace_id);
            return HashMap::new();
        }
        records
            .iter()
            .map(|(user, record)| (user.clone(), record.status))
            .collect()
    }
}

/// In-memory [`HistoryStore`].
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    workspaces: Mutex<HashMap<WorkspaceId, VecDeque<Value>>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, workspace_id: &WorkspaceId, message: &Value, cap: usize) -> bool {
        if cap == 0 {
            return false;
        }
        let mut workspaces = self.workspaces.lock();
        let ring = workspaces.entry(workspace_id.clone()).or_default();
        ring.push_front(message.clone());
        ring.truncate(cap);
        true
    }

    async fn read(&self, workspace_id: &WorkspaceId, limit: usize) -> Vec<Value> {
        if limit == 0 {
            return Vec::new();
        }
        self.workspaces
            .lock()
            .get(workspace_id)
            .map(|ring| ring.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    fn ws() -> WorkspaceId {
        WorkspaceId::from("w1")
    }

    #[tokio::test]
    async fn presence_roundtrip() {
        let store = MemoryPresenceStore::new();
        assert!(store.set_presence(&ws(), &UserId::from("u1"), PresenceStatus::Online, TTL).await);
        assert!(store.set_presence(&ws(), &UserId::from("u2"), PresenceStatus::Away, TTL).await);

        let presence = store.get_presence(&ws()).await;
        assert_eq!(presence.len(), 2);
        assert_eq!(presence[&UserId::from("u1")], PresenceStatus::Online);
        assert_eq!(presence[&UserId::from("u2")], PresenceStatus::Away);
    }

    #[tokio::test]
    async fn presence_unknown_workspace_is_empty() {
        let store = MemoryPresenceStore::new();
        assert!(store.get_presence(&WorkspaceId::from("nope")).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn presence_expires_after_ttl() {
        let store = MemoryPresenceStore::new();
        let _ = store.set_presence(&ws(), &UserId::from("u1"), PresenceStatus::Online, TTL).await;

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get_presence(&ws()).await.len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get_presence(&ws()).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn presence_write_slides_expiry() {
        let store = MemoryPresenceStore::new();
        let user = UserId::from("u1");
        let _ = store.set_presence(&ws(), &user, PresenceStatus::Online, TTL).await;

        tokio::time::advance(Duration::from_secs(45)).await;
        let _ = store.set_presence(&ws(), &user, PresenceStatus::Online, TTL).await;

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.get_presence(&ws()).await[&user], PresenceStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn presence_expiry_is_per_user() {
        let store = MemoryPresenceStore::new();
        let _ = store.set_presence(&ws(), &UserId::from("early"), PresenceStatus::Online, TTL).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = store.set_presence(&ws(), &UserId::from("late"), PresenceStatus::Online, TTL).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let presence = store.get_presence(&ws()).await;
        assert_eq!(presence.len(), 1);
        assert!(presence.contains_key(&UserId::from("late")));
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let store = MemoryPresenceStore::new();
        let user = UserId::from("u1");
        assert!(store.set_presence(&ws(), &user, PresenceStatus::Online, Duration::MAX).await);
        assert!(
            store
                .set_presence(&ws(), &user, PresenceStatus::Away, Duration::from_secs(u64::MAX))
                .await
        );
        assert_eq!(store.get_presence(&ws()).await[&user], PresenceStatus::Away);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_capped() {
        let store = MemoryHistoryStore::new();
        for i in 0..150 {
            assert!(store.append(&ws(), &json!({"seq": i}), 100).await);
        }
        let entries = store.read(&ws(), 100).await;
        assert_eq!(entries.len(), 100);
        assert_eq!(entries[0]["seq"], 149);
        assert_eq!(entries[99]["seq"], 50);
    }

    #[tokio::test]
    async fn history_read_respects_limit() {
        let store = MemoryHistoryStore::new();
        for i in 0..5 {
            let _ = store.append(&ws(), &json!(i), 100).await;
        }
        assert_eq!(store.read(&ws(), 2).await, vec![json!(4), json!(3)]);
        assert!(store.read(&ws(), 0).await.is_empty());
    }

    #[tokio::test]
    async fn history_cap_zero_is_noop() {
        let store = MemoryHistoryStore::new();
        assert!(!store.append(&ws(), &json!(1), 0).await);
        assert!(store.read(&ws(), 10).await.is_empty());
    }

    #[tokio::test]
    async fn history_workspaces_are_isolated() {
        let store = MemoryHistoryStore::new();
        let _ = store.append(&ws(), &json!("a"), 10).await;
        assert!(store.read(&WorkspaceId::from("w2"), 10).await.is_empty());
    }
}
