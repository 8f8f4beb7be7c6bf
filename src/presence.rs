//! Workspace presence: who is here, and who is typing.
//!
//! Presence is ephemeral bookkeeping — rebuilt from zero on process
//! restart, mutated only in response to join/leave/typing events. There is
//! no server-side typing timeout: the client sends an explicit stop-typing,
//! and `leave` (always invoked on disconnect) clears any stuck indicator.
//!
//! A user holds one presence slot per workspace regardless of how many
//! connections they have open; the last disconnect removes the slot
//! (documented policy, no reference counting).

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Point-in-time view of a workspace's presence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceSnapshot {
    pub joined: Vec<Uuid>,
    pub typing: Vec<Uuid>,
}

#[derive(Debug, Default)]
struct WorkspacePresence {
    joined: HashSet<Uuid>,
    typing: HashSet<Uuid>,
}

/// Per-workspace sets of active and typing users.
pub struct PresenceTracker {
    workspaces: RwLock<HashMap<Uuid, WorkspacePresence>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    /// Add a user to a workspace and return the full post-join roster,
    /// so the caller can announce the join with the current member count.
    pub async fn join(&self, workspace_id: Uuid, user_id: Uuid) -> Vec<Uuid> {
        let mut workspaces = self.workspaces.write().await;
        let presence = workspaces.entry(workspace_id).or_default();
        presence.joined.insert(user_id);
        presence.joined.iter().copied().collect()
    }

    /// Remove a user from both the joined and typing sets.
    ///
    /// Idempotent: a second call leaves the snapshot unchanged.
    pub async fn leave(&self, workspace_id: Uuid, user_id: Uuid) {
        let mut workspaces = self.workspaces.write().await;
        if let Some(presence) = workspaces.get_mut(&workspace_id) {
            presence.joined.remove(&user_id);
            presence.typing.remove(&user_id);
            if presence.joined.is_empty() {
                workspaces.remove(&workspace_id);
            }
        }
    }

    /// Mark a joined user as typing. Returns false for non-members.
    pub async fn set_typing(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        let mut workspaces = self.workspaces.write().await;
        match workspaces.get_mut(&workspace_id) {
            Some(presence) if presence.joined.contains(&user_id) => {
                presence.typing.insert(user_id);
                true
            }
            _ => false,
        }
    }

    /// Clear a user's typing indicator. Returns false if it was not set.
    pub async fn clear_typing(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        let mut workspaces = self.workspaces.write().await;
        workspaces
            .get_mut(&workspace_id)
            .map_or(false, |presence| presence.typing.remove(&user_id))
    }

    /// Current joined + typing sets for a workspace.
    pub async fn snapshot(&self, workspace_id: Uuid) -> PresenceSnapshot {
        let workspaces = self.workspaces.read().await;
        workspaces
            .get(&workspace_id)
            .map(|presence| PresenceSnapshot {
                joined: presence.joined.iter().copied().collect(),
                typing: presence.typing.iter().copied().collect(),
            })
            .unwrap_or_default()
    }

    /// Whether a user is currently joined to a workspace.
    pub async fn is_joined(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        self.workspaces
            .read()
            .await
            .get(&workspace_id)
            .map_or(false, |presence| presence.joined.contains(&user_id))
    }

    /// Number of users joined to a workspace.
    pub async fn member_count(&self, workspace_id: Uuid) -> usize {
        self.workspaces
            .read()
            .await
            .get(&workspace_id)
            .map_or(0, |presence| presence.joined.len())
    }

    /// Number of workspaces with at least one joined user.
    pub async fn workspace_count(&self) -> usize {
        self.workspaces.read().await.len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
