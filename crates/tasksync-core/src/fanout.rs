//! Origin tracking and echo exclusion.

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, UserId, WorkspaceId};

/// The authenticated triple a session runs under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Workspace the connection joined.
    pub workspace_id: WorkspaceId,
    /// User that owns the connection.
    pub user_id: UserId,
    /// The connection itself.
    pub connection_id: ConnectionId,
}

impl Identity {
    /// Build an identity from its parts.
    pub fn new(workspace_id: WorkspaceId, user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            workspace_id,
            user_id,
            connection_id,
        }
    }

    /// The origin stamped on events this identity emits.
    pub fn origin(&self) -> Origin {
        Origin::new(self.user_id.clone(), self.connection_id.clone())
    }
}

/// Who emitted an event: the user and the exact socket it came in on.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Origin {
    /// Originating user.
    pub user_id: UserId,
    /// Originating connection.
    pub connection_id: ConnectionId,
}

impl Origin {
    /// Build an origin from its parts.
    pub fn new(user_id: UserId, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            connection_id,
        }
    }
}

/// Which recipients are skipped when an event fans out to its workspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExclusionPolicy {
    /// Skip every connection of the originating user, including their other
    /// devices.
    #[default]
    User,
    /// Skip only the originating socket; the user's other devices still
    /// receive the event.
    Connection,
}

impl ExclusionPolicy {
    /// Parse a lowercase policy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "connection" => Some(Self::Connection),
            _ => None,
        }
    }

    /// Lowercase policy name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Connection => "connection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_origin() {
        let identity = Identity::new("w".into(), "u".into(), "c".into());
        let origin = identity.origin();
        assert_eq!(origin.user_id.as_str(), "u");
        assert_eq!(origin.connection_id.as_str(), "c");
    }

    #[test]
    fn default_policy_is_user() {
        assert_eq!(ExclusionPolicy::default(), ExclusionPolicy::User);
    }

    #[test]
    fn policy_serde_lowercase() {
        let json = serde_json::to_string(&ExclusionPolicy::Connection).unwrap();
        assert_eq!(json, "\"connection\"");
        let back: ExclusionPolicy = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(back, ExclusionPolicy::User);
    }

    #[test]
    fn policy_parse() {
        assert_eq!(ExclusionPolicy::parse(" Connection "), Some(ExclusionPolicy::Connection));
        assert_eq!(ExclusionPolicy::parse("user"), Some(ExclusionPolicy::User));
        assert_eq!(ExclusionPolicy::parse("everyone"), None);
        assert_eq!(ExclusionPolicy::Connection.as_str(), "connection");
    }
}
