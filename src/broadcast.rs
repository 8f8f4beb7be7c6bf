//! Fan-out delivery to workspace members, with sender exclusion.
//!
//! ```text
//! handler ──► BroadcastRouter
//!                  │  snapshot recipients (registry read lock)
//!                  │  release lock
//!                  ▼
//!        ┌── conn A: mpsc ──► writer task ──► socket
//!        ├── conn B: mpsc ──► writer task ──► socket
//!        └── conn C: (closed) ──► reported as dead
//! ```
//!
//! Delivery is best-effort fire-and-forget per connection: a failed send
//! (the connection's writer task has exited) never aborts delivery to the
//! rest; the dead connection ids are returned so the caller can run the
//! normal disconnect cleanup for them. Broadcasting into a workspace with
//! zero live connections delivers to nobody and is not an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Outcome of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    /// Connections the event was handed to.
    pub delivered: usize,
    /// Connections whose outbound channel was closed (implicit disconnects).
    pub dead: Vec<Uuid>,
}

/// Point-to-point routing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    UnknownConnection(Uuid),
    /// The target user has no live connection in the workspace.
    UserNotConnected(Uuid),
    /// The target connection's writer has already exited.
    ConnectionClosed(Uuid),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownConnection(id) => write!(f, "Unknown connection {id}"),
            Self::UserNotConnected(id) => write!(f, "User {id} is not connected"),
            Self::ConnectionClosed(id) => write!(f, "Connection {id} is closed"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Router statistics, tracked lock-free.
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
}

struct AtomicRouterStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
}

/// Delivers events to workspace members through their outbound channels.
pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
    stats: AtomicRouterStats,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: AtomicRouterStats {
                broadcasts: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                failed_deliveries: AtomicU64::new(0),
            },
        }
    }

    /// Deliver an event to every connection in the workspace, except the
    /// excluded one (so a sender never receives its own echo).
    ///
    /// The recipient set is snapshotted under the registry lock, then the
    /// lock is released before any channel send.
    pub async fn broadcast_to_workspace(
        &self,
        workspace_id: Uuid,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> Delivery {
        let recipients = self.registry.connections_in(workspace_id).await;
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let mut delivery = Delivery::default();
        for recipient in recipients {
            if Some(recipient.connection_id) == exclude {
                continue;
            }
            if recipient.sender.send(event.clone()).is_ok() {
                delivery.delivered += 1;
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
            } else {
                delivery.dead.push(recipient.connection_id);
                self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivery
    }

    /// Deliver to a single connection (error replies, direct acks).
    pub async fn send_to_connection(
        &self,
        connection_id: Uuid,
        event: ServerEvent,
    ) -> Result<(), RouteError> {
        let entry = self
            .registry
            .get(connection_id)
            .await
            .ok_or(RouteError::UnknownConnection(connection_id))?;
        entry.sender().send(event).map_err(|_| {
            self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
            RouteError::ConnectionClosed(connection_id)
        })?;
        self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Deliver to a user's routing slot inside a workspace (call signaling).
    pub async fn send_to_user(
        &self,
        workspace_id: Uuid,
        user_id: Uuid,
        event: ServerEvent,
    ) -> Result<(), RouteError> {
        let recipient = self
            .registry
            .find(workspace_id, user_id)
            .await
            .ok_or(RouteError::UserNotConnected(user_id))?;
        recipient.sender.send(event).map_err(|_| {
            self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
            RouteError::ConnectionClosed(recipient.connection_id)
        })?;
        self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Push to every live connection of a user, across workspaces
    /// (notification fan-out from the event bus). Returns the delivery
    /// count; zero connections is a no-op.
    pub async fn push_to_user(&self, user_id: Uuid, event: &ServerEvent) -> Delivery {
        let recipients = self.registry.connections_for_user(user_id).await;
        let mut delivery = Delivery::default();
        for recipient in recipients {
            if recipient.sender.send(event.clone()).is_ok() {
                delivery.delivered += 1;
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
            } else {
                delivery.dead.push(recipient.connection_id);
                self.stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivery
    }

    /// Lock-free stats snapshot.
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            failed_deliveries: self.stats.failed_deliveries.load(Ordering::Relaxed),
        }
    }

    /// The registry this router fans out over.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
