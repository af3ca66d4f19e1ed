//! Redis-backed presence and history.
//!
//! Presence lives in one hash per workspace (`workspace:<id>:presence`).
//! Each field is a user id whose value records the status and an absolute
//! expiry stamp, so users expire independently even though they share a key.
//! The key itself gets an `EXPIRE` of the same TTL on every write; since all
//! writers use one TTL, the key outlives its freshest field and is collected
//! once every member has gone quiet. Expired fields are pruned on read.
//!
//! History is a list per workspace (`workspace:<id>:messages`) maintained
//! with `LPUSH` + `LTRIM` in one atomic pipeline and read with `LRANGE`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasksync_core::keys::{history_key, presence_key};
use tasksync_core::{PresenceStatus, UserId, WorkspaceId};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::traits::{HistoryStore, PresenceStore};

/// Value stored in each presence hash field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PresenceField {
    status: PresenceStatus,
    expires_at_ms: i64,
}

/// Decode a presence field. `None` means expired or unreadable; the caller
/// deletes such fields.
fn decode_presence(raw: &str, now_ms: i64) -> Option<PresenceStatus> {
    let field: PresenceField = serde_json::from_str(raw).ok()?;
    (field.expires_at_ms > now_ms).then_some(field.status)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Redis rejects key expiries whose millisecond deadline overflows.
const MAX_KEY_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

fn key_ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().clamp(1, MAX_KEY_TTL_SECS)
}

/// Presence and history over a shared Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Open a multiplexed connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(url, "redis store connected");
        Ok(Self { conn })
    }

    async fn try_set_presence(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: PresenceStatus,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = presence_key(workspace_id);
        let field = serde_json::to_string(&PresenceField {
            status,
            expires_at_ms: now_ms().saturating_add(ttl_ms(ttl)),
        })?;
        let mut conn = self.conn.clone();
        let (): () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg(user_id.as_str())
            .arg(field)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(key_ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn try_get_presence(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<HashMap<UserId, PresenceStatus>, StoreError> {
        let key = presence_key(workspace_id);
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut conn)
            .await?;

        let now = now_ms();
        let mut live = HashMap::with_capacity(raw.len());
        let mut stale = Vec::new();
        for (user, value) in raw {
            match decode_presence(&value, now) {
                Some(status) => {
                    let _ = live.insert(UserId::from(user), status);
                }
                None => stale.push(user),
            }
        }

        if !stale.is_empty() {
            let removed: usize = redis::cmd("HDEL")
                .arg(&key)
                .arg(&stale)
                .query_async(&mut conn)
                .await?;
            debug!(workspace_id = %workspace_id, removed, "pruned expired presence");
        }
        Ok(live)
    }

    async fn try_append(
        &self,
        workspace_id: &WorkspaceId,
        message: &Value,
        cap: usize,
    ) -> Result<(), StoreError> {
        let key = history_key(workspace_id);
        let payload = serde_json::to_string(message)?;
        let mut conn = self.conn.clone();
        let (): () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(payload)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(last_index(cap))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn try_read(
        &self,
        workspace_id: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<Value>, StoreError> {
        let key = history_key(workspace_id);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(last_index(limit))
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(workspace_id = %workspace_id, %error, "skipping unreadable history entry");
                    None
                }
            })
            .collect())
    }
}

/// Inclusive end index for a list of `n` items (`n >= 1`).
#[allow(clippy::cast_possible_wrap)]
fn last_index(n: usize) -> isize {
    n.saturating_sub(1) as isize
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn set_presence(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
        status: PresenceStatus,
        ttl: Duration,
    ) -> bool {
        match self.try_set_presence(workspace_id, user_id, status, ttl).await {
            Ok(()) => true,
            Err(error) => {
                warn!(workspace_id = %workspace_id, user_id = %user_id, %error, "failed to set presence");
                false
            }
        }
    }

    async fn get_presence(&self, workspace_id: &WorkspaceId) -> HashMap<UserId, PresenceStatus> {
        self.try_get_presence(workspace_id)
            .await
            .unwrap_or_else(|error| {
                warn!(workspace_id = %workspace_id, %error, "failed to get presence");
                HashMap::new()
            })
    }
}

#[async_trait]
impl HistoryStore for RedisStore {
    async fn append(&self, workspace_id: &WorkspaceId, message: &Value, cap: usize) -> bool {
        if cap == 0 {
            return false;
        }
        match self.try_append(workspace_id, message, cap).await {
            Ok(()) => true,
            Err(error) => {
                warn!(workspace_id = %workspace_id, %error, "failed to append history");
                false
            }
        }
    }

    async fn read(&self, workspace_id: &WorkspaceId, limit: usize) -> Vec<Value> {
        if limit == 0 {
            return Vec::new();
        }
        self.try_read(workspace_id, limit)
            .await
            .unwrap_or_else(|error| {
                warn!(workspace_id = %workspace_id, %error, "failed to read history");
                Vec::new()
            })
    }
}
