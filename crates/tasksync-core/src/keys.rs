//! Broker channel and shared-store key names.
//!
//! Every instance must derive identical names for a workspace, otherwise
//! publishes and subscriptions would miss each other.

use crate::ids::WorkspaceId;

const PREFIX: &str = "workspace:";

/// Pub/sub channel carrying a workspace's events.
pub fn workspace_channel(workspace_id: &WorkspaceId) -> String {
    format!("{PREFIX}{workspace_id}:events")
}

/// Hash holding a workspace's presence records.
pub fn presence_key(workspace_id: &WorkspaceId) -> String {
    format!("{PREFIX}{workspace_id}:presence")
}

/// List holding a workspace's recent broadcast history.
pub fn history_key(workspace_id: &WorkspaceId) -> String {
    format!("{PREFIX}{workspace_id}:messages")
}

/// Recover the workspace id from an events channel name.
pub fn parse_workspace_channel(channel: &str) -> Option<WorkspaceId> {
    let id = channel.strip_prefix(PREFIX)?.strip_suffix(":events")?;
    if id.is_empty() {
        return None;
    }
    Some(WorkspaceId::from(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes() {
        let ws = WorkspaceId::from("abc");
        assert_eq!(workspace_channel(&ws), "workspace:abc:events");
        assert_eq!(presence_key(&ws), "workspace:abc:presence");
        assert_eq!(history_key(&ws), "workspace:abc:messages");
    }

    #[test]
    fn parse_channel() {
        let ws = WorkspaceId::from("w:1");
        assert_eq!(parse_workspace_channel(&workspace_channel(&ws)), Some(ws));
        assert_eq!(parse_workspace_channel("workspace::events"), None);
        assert_eq!(parse_workspace_channel("workspace:abc:presence"), None);
        assert_eq!(parse_workspace_channel("other"), None);
    }
}
