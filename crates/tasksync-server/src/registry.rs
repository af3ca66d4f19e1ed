//! Per-process connection registry.
//!
//! Three indices are kept in one critical section so they never disagree:
//!
//! - workspace id → connection ids, in join order
//! - user id → connection ids (one user may have several devices)
//! - connection id → (workspace, user, transport)
//!
//! No lock is held while a transport handshakes or sends. Broadcasts snapshot
//! their targets under the lock, send outside it, and disconnect every target
//! whose send failed once the iteration is over.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tasksync_core::{ConnectionId, ExclusionPolicy, Origin, UserId, WorkspaceId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics::{
    BROADCAST_FAILURES_TOTAL, BROADCAST_SENDS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL,
    DISCONNECTIONS_TOTAL,
};
use crate::transport::{Transport, TransportError};

/// Registration failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The connection id is already registered.
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    /// The transport handshake failed; nothing was registered.
    #[error("handshake failed for connection {connection_id}: {source}")]
    Handshake {
        /// Connection that failed.
        connection_id: ConnectionId,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },
}

/// Which recipients a workspace broadcast skips.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Exclusion {
    /// Deliver to everyone.
    Nobody,
    /// Skip every connection owned by this user.
    User(UserId),
    /// Skip this one connection.
    Connection(ConnectionId),
}

impl Exclusion {
    /// Exclusion for an event emitted by `origin` under `policy`.
    pub fn for_origin(policy: ExclusionPolicy, origin: &Origin) -> Self {
        match policy {
            ExclusionPolicy::User => Self::User(origin.user_id.clone()),
            ExclusionPolicy::Connection => Self::Connection(origin.connection_id.clone()),
        }
    }

    fn skips(&self, connection_id: &ConnectionId, user_id: &UserId) -> bool {
        match self {
            Self::Nobody => false,
            Self::User(excluded) => excluded == user_id,
            Self::Connection(excluded) => excluded == connection_id,
        }
    }
}

/// What [`ConnectionRegistry::disconnect`] removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedConnection {
    /// Workspace the connection belonged to.
    pub workspace_id: WorkspaceId,
    /// Owning user.
    pub user_id: UserId,
    /// Whether this was the workspace's last local connection.
    pub workspace_emptied: bool,
}

struct ConnectionEntry {
    workspace_id: WorkspaceId,
    user_id: UserId,
    transport: Arc<dyn Transport>,
}

#[derive(Default)]
struct RegistryState {
    workspaces: HashMap<WorkspaceId, Vec<ConnectionId>>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

type Target = (ConnectionId, Arc<dyn Transport>);

/// Live connections on this process.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete the transport handshake and register the connection.
    ///
    /// The duplicate check runs before the handshake and again under the
    /// lock, so two racing registrations of one id cannot both succeed.
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        workspace_id: WorkspaceId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<(), RegistryError> {
        let known = self.state.lock().connections.contains_key(&connection_id);
        if known {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        if let Err(source) = transport.accept().await {
            warn!(connection_id = %connection_id, error = %source, "transport handshake failed");
            return Err(RegistryError::Handshake {
                connection_id,
                source,
            });
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.connections.contains_key(&connection_id) {
                return Err(RegistryError::DuplicateConnection(connection_id));
            }
            state
                .workspaces
                .entry(workspace_id.clone())
                .or_default()
                .push(connection_id.clone());
            let _ = state
                .users
                .entry(user_id.clone())
                .or_default()
                .insert(connection_id.clone());
            let _ = state.connections.insert(
                connection_id.clone(),
                ConnectionEntry {
                    workspace_id: workspace_id.clone(),
                    user_id: user_id.clone(),
                    transport,
                },
            );
        }

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(
            connection_id = %connection_id,
            workspace_id = %workspace_id,
            user_id = %user_id,
            "connection registered"
        );
        Ok(())
    }

    /// Remove a connection from every index and close its transport.
    ///
    /// Idempotent: an unknown id is logged at debug and yields `None`.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<RemovedConnection> {
        let (entry, workspace_emptied) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(entry) = state.connections.get(connection_id) else {
                debug!(connection_id = %connection_id, "disconnect for unknown connection");
                return None;
            };
            let workspace_id = entry.workspace_id.clone();
            let user_id = entry.user_id.clone();

            let mut workspace_emptied = false;
            if let Some(members) = state.workspaces.get_mut(&workspace_id) {
                members.retain(|id| id != connection_id);
                if members.is_empty() {
                    let _ = state.workspaces.remove(&workspace_id);
                    workspace_emptied = true;
                }
            }
            if let Some(owned) = state.users.get_mut(&user_id) {
                let _ = owned.remove(connection_id);
                if owned.is_empty() {
                    let _ = state.users.remove(&user_id);
                }
            }
            let entry = state.connections.remove(connection_id)?;
            (entry, workspace_emptied)
        };

        entry.transport.close();
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            connection_id = %connection_id,
            workspace_id = %entry.workspace_id,
            user_id = %entry.user_id,
            "connection removed"
        );
        Some(RemovedConnection {
            workspace_id: entry.workspace_id,
            user_id: entry.user_id,
            workspace_emptied,
        })
    }

    /// Send `message` to every connection in a workspace except those
    /// `exclusion` skips. Returns how many sends succeeded.
    pub fn broadcast_to_workspace<T: Serialize + ?Sized>(
        &self,
        workspace_id: &WorkspaceId,
        message: &T,
        exclusion: &Exclusion,
    ) -> usize {
        let Some(payload) = encode(message) else {
            return 0;
        };
        let targets: Vec<Target> = {
            let state = self.state.lock();
            let Some(members) = state.workspaces.get(workspace_id) else {
                return 0;
            };
            members
                .iter()
                .filter_map(|id| {
                    let entry = state.connections.get(id)?;
                    (!exclusion.skips(id, &entry.user_id))
                        .then(|| (id.clone(), Arc::clone(&entry.transport)))
                })
                .collect()
        };
        let sent = self.deliver(&targets, &payload);
        debug!(
            workspace_id = %workspace_id,
            targets = targets.len(),
            sent,
            "workspace broadcast"
        );
        sent
    }

    /// Send `message` to every connection of a user, across workspaces.
    pub fn send_to_user<T: Serialize + ?Sized>(&self, user_id: &UserId, message: &T) -> usize {
        let Some(payload) = encode(message) else {
            return 0;
        };
        let targets: Vec<Target> = {
            let state = self.state.lock();
            let Some(owned) = state.users.get(user_id) else {
                return 0;
            };
            owned
                .iter()
                .filter_map(|id| {
                    let entry = state.connections.get(id)?;
                    Some((id.clone(), Arc::clone(&entry.transport)))
                })
                .collect()
        };
        self.deliver(&targets, &payload)
    }

    /// Send `message` to one connection. A failed send disconnects it.
    pub fn send_to_connection<T: Serialize + ?Sized>(
        &self,
        connection_id: &ConnectionId,
        message: &T,
    ) -> bool {
        let Some(payload) = encode(message) else {
            return false;
        };
        let transport = self
            .state
            .lock()
            .connections
            .get(connection_id)
            .map(|entry| Arc::clone(&entry.transport));
        let Some(transport) = transport else {
            return false;
        };
        let target = [(connection_id.clone(), transport)];
        self.deliver(&target, &payload) == 1
    }

    fn deliver(&self, targets: &[Target], payload: &Arc<String>) -> usize {
        let mut sent = 0;
        let mut failed = Vec::new();
        for (id, transport) in targets {
            match transport.send(Arc::clone(payload)) {
                Ok(()) => sent += 1,
                Err(error) => {
                    warn!(connection_id = %id, %error, "send failed, dropping connection");
                    failed.push(id);
                }
            }
        }
        counter!(BROADCAST_SENDS_TOTAL).increment(sent as u64);
        if !failed.is_empty() {
            counter!(BROADCAST_FAILURES_TOTAL).increment(failed.len() as u64);
            for id in failed {
                let _ = self.disconnect(id);
            }
        }
        sent
    }

    /// Local connections in a workspace.
    pub fn workspace_connection_count(&self, workspace_id: &WorkspaceId) -> usize {
        self.state
            .lock()
            .workspaces
            .get(workspace_id)
            .map_or(0, Vec::len)
    }

    /// Local connections owned by a user.
    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.state.lock().users.get(user_id).map_or(0, HashSet::len)
    }

    /// All local connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Workspaces with at least one local connection.
    pub fn workspace_ids(&self) -> Vec<WorkspaceId> {
        self.state.lock().workspaces.keys().cloned().collect()
    }

    /// Whether `connection_id` is registered.
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.state.lock().connections.contains_key(connection_id)
    }

    /// Disconnect everything. Returns how many connections were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.state.lock().connections.keys().cloned().collect();
        ids.iter().filter_map(|id| self.disconnect(id)).count()
    }
}

fn encode<T: Serialize + ?Sized>(message: &T) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(error) => {
            warn!(%error, "failed to serialize outbound message");
            None
        }
    }
}
