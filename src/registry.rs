//! Connection registry: identity and workspace membership per live socket.
//!
//! The registry is the single owner of connection state. A connection is
//! created on the transport handshake (after `session:hello`), optionally
//! bound to one workspace, and destroyed on disconnect. Each entry carries
//! the outbound channel handle used by the broadcast router — the registry
//! never writes to sockets itself.
//!
//! Two maps, two locks: the connection table and the per-workspace user
//! index are guarded independently so that unrelated workspaces never
//! serialize on each other, and neither lock is ever held across I/O.

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub user_name: String,
    pub avatar: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: Uuid, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// One live connection's bookkeeping.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub connection_id: Uuid,
    pub identity: UserIdentity,
    /// Non-`None` only between a successful join and a leave/disconnect.
    pub workspace_id: Option<Uuid>,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionEntry {
    /// Outbound channel handle for this connection.
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.sender.clone()
    }
}

/// A recipient snapshot taken for fan-out.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownConnection(Uuid),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownConnection(id) => write!(f, "Unknown connection {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Tracks every live connection and its workspace binding.
pub struct ConnectionRegistry {
    /// connection_id → entry
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
    /// workspace_id → user_id → connection_id (newest connection wins)
    by_workspace: RwLock<HashMap<Uuid, HashMap<Uuid, Uuid>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            by_workspace: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection. Never fails; returns the connection id.
    pub async fn register(
        &self,
        identity: UserIdentity,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        let entry = ConnectionEntry {
            connection_id,
            identity,
            workspace_id: None,
            sender,
        };
        self.connections.write().await.insert(connection_id, entry);
        connection_id
    }

    /// Bind a connection to a workspace.
    ///
    /// Re-joining the same workspace is a no-op. Access control happens
    /// before this call (see `AccessGate`); the registry only records the
    /// binding. A user's newest connection owns the point-to-point routing
    /// slot for the workspace.
    pub async fn set_workspace(
        &self,
        connection_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<(), RegistryError> {
        let user_id = {
            let mut connections = self.connections.write().await;
            let entry = connections
                .get_mut(&connection_id)
                .ok_or(RegistryError::UnknownConnection(connection_id))?;
            if entry.workspace_id == Some(workspace_id) {
                return Ok(()); // idempotent re-join
            }
            entry.workspace_id = Some(workspace_id);
            entry.identity.user_id
        };

        let mut index = self.by_workspace.write().await;
        index
            .entry(workspace_id)
            .or_default()
            .insert(user_id, connection_id);
        Ok(())
    }

    /// Unbind a connection from its workspace (leave without disconnect).
    pub async fn clear_workspace(&self, connection_id: Uuid) -> Option<Uuid> {
        let (workspace_id, user_id) = {
            let mut connections = self.connections.write().await;
            let entry = connections.get_mut(&connection_id)?;
            let workspace_id = entry.workspace_id.take()?;
            (workspace_id, entry.identity.user_id)
        };

        let mut index = self.by_workspace.write().await;
        if let Some(users) = index.get_mut(&workspace_id) {
            // Only remove the routing slot if this connection still owns it.
            if users.get(&user_id) == Some(&connection_id) {
                users.remove(&user_id);
            }
            if users.is_empty() {
                index.remove(&workspace_id);
            }
        }
        Some(workspace_id)
    }

    /// Remove a connection entirely.
    ///
    /// Safe to call multiple times; the second call returns `None`.
    /// Returns the removed entry so the caller can run presence and call
    /// cleanup for the workspace it was bound to.
    pub async fn unregister(&self, connection_id: Uuid) -> Option<ConnectionEntry> {
        let entry = self.connections.write().await.remove(&connection_id)?;

        if let Some(workspace_id) = entry.workspace_id {
            let mut index = self.by_workspace.write().await;
            if let Some(users) = index.get_mut(&workspace_id) {
                if users.get(&entry.identity.user_id) == Some(&connection_id) {
                    users.remove(&entry.identity.user_id);
                }
                if users.is_empty() {
                    index.remove(&workspace_id);
                }
            }
        }
        Some(entry)
    }

    /// Look up a single connection.
    pub async fn get(&self, connection_id: Uuid) -> Option<ConnectionEntry> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    /// Snapshot every connection currently bound to a workspace.
    pub async fn connections_in(&self, workspace_id: Uuid) -> Vec<Recipient> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|e| e.workspace_id == Some(workspace_id))
            .map(|e| Recipient {
                connection_id: e.connection_id,
                user_id: e.identity.user_id,
                sender: e.sender.clone(),
            })
            .collect()
    }

    /// Find the routing slot for a user inside a workspace (signaling).
    pub async fn find(&self, workspace_id: Uuid, user_id: Uuid) -> Option<Recipient> {
        let connection_id = *self
            .by_workspace
            .read()
            .await
            .get(&workspace_id)?
            .get(&user_id)?;
        let connections = self.connections.read().await;
        let entry = connections.get(&connection_id)?;
        Some(Recipient {
            connection_id,
            user_id,
            sender: entry.sender.clone(),
        })
    }

    /// Every live connection belonging to a user, across workspaces
    /// (used for notification push; may be empty).
    pub async fn connections_for_user(&self, user_id: Uuid) -> Vec<Recipient> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|e| e.identity.user_id == user_id)
            .map(|e| Recipient {
                connection_id: e.connection_id,
                user_id,
                sender: e.sender.clone(),
            })
            .collect()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Number of connections bound to a workspace.
    pub async fn workspace_len(&self, workspace_id: Uuid) -> usize {
        self.by_workspace
            .read()
            .await
            .get(&workspace_id)
            .map_or(0, |users| users.len())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let identity = UserIdentity::new(Uuid::new_v4(), "Alice");

        let conn = registry.register(identity.clone(), tx).await;
        let entry = registry.get(conn).await.unwrap();

        assert_eq!(entry.identity, identity);
        assert!(entry.workspace_id.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_set_workspace_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let conn = registry
            .register(UserIdentity::new(Uuid::new_v4(), "Alice"), tx)
            .await;
        let ws = Uuid::new_v4();

        registry.set_workspace(conn, ws).await.unwrap();
        registry.set_workspace(conn, ws).await.unwrap(); // re-join is a no-op

        assert_eq!(registry.get(conn).await.unwrap().workspace_id, Some(ws));
        assert_eq!(registry.workspace_len(ws).await, 1);
    }

    #[tokio::test]
    async fn test_set_workspace_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let result = registry.set_workspace(Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(RegistryError::UnknownConnection(_))));
    }

    #[tokio::test]
    async fn test_unregister_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let conn = registry
            .register(UserIdentity::new(Uuid::new_v4(), "Alice"), tx)
            .await;

        assert!(registry.unregister(conn).await.is_some());
        assert!(registry.unregister(conn).await.is_none()); // second call is a no-op
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_clears_workspace_index() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let user = Uuid::new_v4();
        let ws = Uuid::new_v4();
        let conn = registry.register(UserIdentity::new(user, "Alice"), tx).await;
        registry.set_workspace(conn, ws).await.unwrap();

        let entry = registry.unregister(conn).await.unwrap();
        assert_eq!(entry.workspace_id, Some(ws));
        assert!(registry.find(ws, user).await.is_none());
        assert_eq!(registry.workspace_len(ws).await, 0);
    }

    #[tokio::test]
    async fn test_connections_in_workspace() {
        let registry = ConnectionRegistry::new();
        let ws = Uuid::new_v4();
        let other_ws = Uuid::new_v4();

        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();
        let c1 = registry
            .register(UserIdentity::new(Uuid::new_v4(), "Alice"), tx1)
            .await;
        let c2 = registry
            .register(UserIdentity::new(Uuid::new_v4(), "Bob"), tx2)
            .await;
        let c3 = registry
            .register(UserIdentity::new(Uuid::new_v4(), "Carol"), tx3)
            .await;
        registry.set_workspace(c1, ws).await.unwrap();
        registry.set_workspace(c2, ws).await.unwrap();
        registry.set_workspace(c3, other_ws).await.unwrap();

        let recipients = registry.connections_in(ws).await;
        assert_eq!(recipients.len(), 2);
        let ids: Vec<Uuid> = recipients.iter().map(|r| r.connection_id).collect();
        assert!(ids.contains(&c1));
        assert!(ids.contains(&c2));
        assert!(!ids.contains(&c3));
    }

    #[tokio::test]
    async fn test_newest_connection_wins_routing_slot() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let ws = Uuid::new_v4();

        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let first = registry.register(UserIdentity::new(user, "Alice"), tx1).await;
        let second = registry.register(UserIdentity::new(user, "Alice"), tx2).await;
        registry.set_workspace(first, ws).await.unwrap();
        registry.set_workspace(second, ws).await.unwrap();

        let slot = registry.find(ws, user).await.unwrap();
        assert_eq!(slot.connection_id, second);

        // The older connection going away must not evict the newer slot.
        registry.unregister(first).await;
        let slot = registry.find(ws, user).await.unwrap();
        assert_eq!(slot.connection_id, second);
    }

    #[tokio::test]
    async fn test_clear_workspace() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let user = Uuid::new_v4();
        let ws = Uuid::new_v4();
        let conn = registry.register(UserIdentity::new(user, "Alice"), tx).await;
        registry.set_workspace(conn, ws).await.unwrap();

        assert_eq!(registry.clear_workspace(conn).await, Some(ws));
        assert!(registry.get(conn).await.unwrap().workspace_id.is_none());
        assert!(registry.find(ws, user).await.is_none());

        // Clearing again is a no-op.
        assert!(registry.clear_workspace(conn).await.is_none());
    }

    #[tokio::test]
    async fn test_connections_for_user_spans_workspaces() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();

        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let c1 = registry.register(UserIdentity::new(user, "Alice"), tx1).await;
        let _c2 = registry.register(UserIdentity::new(user, "Alice"), tx2).await;
        registry.set_workspace(c1, Uuid::new_v4()).await.unwrap();

        assert_eq!(registry.connections_for_user(user).await.len(), 2);
        assert!(registry
            .connections_for_user(Uuid::new_v4())
            .await
            .is_empty());
    }
}
