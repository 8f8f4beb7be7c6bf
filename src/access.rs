//! Access gate: may this user join this workspace?
//!
//! A pure predicate evaluated before any registry or presence mutation.
//! Membership truth lives outside this crate (the platform's team store);
//! the gate consumes it through the [`MembershipLookup`] seam and layers an
//! optional per-workspace allow-list on top.
//!
//! The gate fails closed: a lookup error or an unknown workspace is a deny,
//! never a crash and never an implicit allow.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Membership lookup failures.
#[derive(Debug, Clone)]
pub enum LookupError {
    /// The backing store could not be reached.
    Unavailable(String),
    /// The workspace has no membership record at all.
    UnknownWorkspace(Uuid),
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Membership lookup unavailable: {e}"),
            Self::UnknownWorkspace(id) => write!(f, "No membership record for workspace {id}"),
        }
    }
}

impl std::error::Error for LookupError {}

/// External collaborator: the platform's team-membership store.
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    /// Whether the user is an active member of the workspace's team.
    async fn is_active_member(&self, workspace_id: Uuid, user_id: Uuid)
        -> Result<bool, LookupError>;
}

/// In-memory membership table for tests and demos.
pub struct StaticMembership {
    members: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_member(&self, workspace_id: Uuid, user_id: Uuid) {
        self.members
            .write()
            .await
            .entry(workspace_id)
            .or_default()
            .insert(user_id);
    }

    pub async fn remove_member(&self, workspace_id: Uuid, user_id: Uuid) {
        if let Some(users) = self.members.write().await.get_mut(&workspace_id) {
            users.remove(&user_id);
        }
    }
}

impl Default for StaticMembership {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MembershipLookup for StaticMembership {
    async fn is_active_member(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, LookupError> {
        let members = self.members.read().await;
        match members.get(&workspace_id) {
            Some(users) => Ok(users.contains(&user_id)),
            None => Err(LookupError::UnknownWorkspace(workspace_id)),
        }
    }
}

/// Join predicate combining team membership with an optional allow-list.
pub struct AccessGate {
    lookup: std::sync::Arc<dyn MembershipLookup>,
    /// Per-workspace read-permission allow-list. Absent list = members only.
    allow_lists: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl AccessGate {
    pub fn new(lookup: std::sync::Arc<dyn MembershipLookup>) -> Self {
        Self {
            lookup,
            allow_lists: RwLock::new(HashMap::new()),
        }
    }

    /// Restrict a workspace to an explicit subset of its members.
    pub async fn set_allow_list(&self, workspace_id: Uuid, users: HashSet<Uuid>) {
        self.allow_lists.write().await.insert(workspace_id, users);
    }

    /// Remove a workspace's allow-list (back to members-only).
    pub async fn clear_allow_list(&self, workspace_id: Uuid) {
        self.allow_lists.write().await.remove(&workspace_id);
    }

    /// Whether the user may join the workspace. No side effects.
    pub async fn can_join(&self, workspace_id: Uuid, user_id: Uuid) -> bool {
        let member = match self.lookup.is_active_member(workspace_id, user_id).await {
            Ok(member) => member,
            Err(e) => {
                // Fail closed on any lookup failure.
                log::warn!("Membership lookup failed for workspace {workspace_id}: {e}");
                return false;
            }
        };
        if !member {
            return false;
        }

        let allow_lists = self.allow_lists.read().await;
        match allow_lists.get(&workspace_id) {
            Some(allowed) => allowed.contains(&user_id),
            None => true,
        }
    }
}
