//! Built-in event handlers: reputation, achievements, notifications.
//!
//! The handlers form a cascade over the bus:
//!
//! ```text
//! submission.evaluated ──► ReputationHandler ──► reputation.updated
//!                                                      │
//!                                     AchievementHandler (1000 threshold)
//!                                                      │
//!                                           achievement.unlocked
//!                                                      │
//! challenge.created ───────┐                           │
//! team.member.joined ──────┼──► NotificationHandler ◄──┘
//!                          │            │
//!                          │   notification.created ──► LivePushHandler
//!                          │            │                     │
//!                          │     NotificationDispatch    BroadcastRouter
//!                          │     (email, digest, …)      (live sockets)
//! ```
//!
//! Each step is an ordinary subscriber; replacing or reordering the
//! cascade is a wiring change, not a code change.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::broadcast::BroadcastRouter;
use crate::protocol::ServerEvent;

use super::bus::{EventBus, EventHandler, HandlerError};
use super::event::{DomainEvent, EventKind, EventRecord};

/// Reputation score that unlocks the milestone achievement.
pub const ACHIEVEMENT_THRESHOLD: i64 = 1000;

/// Name of the milestone achievement.
pub const MILESTONE_ACHIEVEMENT: &str = "reputation-1000";

/// External delivery channel for notifications (email, digest queue).
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    async fn enqueue(
        &self,
        user_id: Uuid,
        title: &str,
        body: &str,
    ) -> Result<(), DispatchError>;
}

/// Dispatch failures.
#[derive(Debug, Clone)]
pub enum DispatchError {
    Unavailable(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(e) => write!(f, "Notification dispatch unavailable: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Dispatch that drops everything (live push only deployments).
pub struct NullDispatch;

#[async_trait]
impl NotificationDispatch for NullDispatch {
    async fn enqueue(&self, _: Uuid, _: &str, _: &str) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// In-memory reputation scores.
pub struct ReputationLedger {
    scores: RwLock<HashMap<Uuid, i64>>,
}

impl ReputationLedger {
    pub fn new() -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
        }
    }

    /// Apply a delta; returns (old, new).
    pub async fn apply(&self, user_id: Uuid, change: i64) -> (i64, i64) {
        let mut scores = self.scores.write().await;
        let entry = scores.entry(user_id).or_insert(0);
        let old = *entry;
        *entry += change;
        (old, *entry)
    }

    pub async fn score(&self, user_id: Uuid) -> i64 {
        self.scores.read().await.get(&user_id).copied().unwrap_or(0)
    }
}

impl Default for ReputationLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns submission results into reputation deltas.
///
/// The delta is the score percentage minus 50, so an exactly average
/// submission moves nothing: 92% earns +42, 30% costs -20.
pub struct ReputationHandler {
    ledger: Arc<ReputationLedger>,
}

impl ReputationHandler {
    pub fn new(ledger: Arc<ReputationLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventHandler for ReputationHandler {
    fn name(&self) -> &str {
        "reputation"
    }

    async fn handle(&self, record: &EventRecord, bus: &EventBus) -> Result<(), HandlerError> {
        let DomainEvent::SubmissionEvaluated {
            user_id,
            score,
            max_score,
            ..
        } = record.event
        else {
            return Ok(());
        };

        let percent = (score as u64 * 100 / max_score as u64) as i64;
        let change = percent - 50;
        if change == 0 {
            return Ok(());
        }

        let (_, new_score) = self.ledger.apply(user_id, change).await;
        bus.publish(DomainEvent::ReputationUpdated {
            user_id,
            change,
            new_score,
        })
        .await
        .map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(())
    }
}

/// Unlocks the milestone achievement when reputation first crosses the
/// threshold. Deduplicates per (user, achievement) so oscillating around
/// the threshold never unlocks twice.
pub struct AchievementHandler {
    unlocked: Mutex<HashSet<(Uuid, String)>>,
}

impl AchievementHandler {
    pub fn new() -> Self {
        Self {
            unlocked: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for AchievementHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for AchievementHandler {
    fn name(&self) -> &str {
        "achievements"
    }

    async fn handle(&self, record: &EventRecord, bus: &EventBus) -> Result<(), HandlerError> {
        let DomainEvent::ReputationUpdated {
            user_id,
            change,
            new_score,
        } = record.event
        else {
            return Ok(());
        };

        // Crossing, not standing: the update itself must carry the user
        // over the threshold.
        let crossed =
            new_score >= ACHIEVEMENT_THRESHOLD && new_score - change < ACHIEVEMENT_THRESHOLD;
        if !crossed {
            return Ok(());
        }

        {
            let mut unlocked = self.unlocked.lock().await;
            if !unlocked.insert((user_id, MILESTONE_ACHIEVEMENT.to_string())) {
                return Ok(());
            }
        }

        bus.publish(DomainEvent::AchievementUnlocked {
            user_id,
            achievement: MILESTONE_ACHIEVEMENT.to_string(),
        })
        .await
        .map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(())
    }
}

/// Materializes notifications for the events users should hear about,
/// hands them to the external dispatch, and publishes the created
/// notification back onto the bus for live push.
pub struct NotificationHandler {
    dispatch: Arc<dyn NotificationDispatch>,
}

impl NotificationHandler {
    pub fn new(dispatch: Arc<dyn NotificationDispatch>) -> Self {
        Self { dispatch }
    }

    /// Which events produce a notification, for whom, and what it says.
    fn compose(event: &DomainEvent) -> Option<(Uuid, String, String)> {
        match event {
            DomainEvent::ChallengeCreated {
                title, created_by, ..
            } => Some((
                *created_by,
                "Challenge published".to_string(),
                format!("Your challenge '{title}' is now live"),
            )),
            DomainEvent::TeamMemberJoined {
                user_id, team_name, ..
            } => Some((
                *user_id,
                "Welcome to the team".to_string(),
                format!("You joined team '{team_name}'"),
            )),
            DomainEvent::AchievementUnlocked {
                user_id,
                achievement,
            } => Some((
                *user_id,
                "Achievement unlocked".to_string(),
                format!("You earned the '{achievement}' achievement"),
            )),
            _ => None,
        }
    }
}

#[async_trait]
impl EventHandler for NotificationHandler {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn handle(&self, record: &EventRecord, bus: &EventBus) -> Result<(), HandlerError> {
        let Some((user_id, title, body)) = Self::compose(&record.event) else {
            return Ok(());
        };

        self.dispatch
            .enqueue(user_id, &title, &body)
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        bus.publish(DomainEvent::NotificationCreated {
            notification_id: Uuid::new_v4(),
            user_id,
            title,
            body,
        })
        .await
        .map_err(|e| HandlerError::Failed(e.to_string()))?;
        Ok(())
    }
}

/// Bridges notifications onto live WebSocket connections.
///
/// A user with no open connection simply misses the push; the dispatch
/// side already queued the durable copy.
pub struct LivePushHandler {
    router: Arc<BroadcastRouter>,
}

impl LivePushHandler {
    pub fn new(router: Arc<BroadcastRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EventHandler for LivePushHandler {
    fn name(&self) -> &str {
        "live-push"
    }

    async fn handle(&self, record: &EventRecord, _bus: &EventBus) -> Result<(), HandlerError> {
        let DomainEvent::NotificationCreated {
            notification_id,
            user_id,
            ref title,
            ref body,
        } = record.event
        else {
            return Ok(());
        };

        let push = ServerEvent::Notification {
            id: notification_id,
            user_id,
            title: title.clone(),
            body: body.clone(),
            timestamp: record.occurred_at,
        };
        let delivery = self.router.push_to_user(user_id, &push).await;
        log::debug!(
            "Pushed notification {notification_id} to {} connections of {user_id}",
            delivery.delivered
        );
        Ok(())
    }
}

/// Register the standard cascade on a bus. Returns the ledger so callers
/// can read scores back.
pub async fn wire_default_handlers(
    bus: &EventBus,
    router: Arc<BroadcastRouter>,
    dispatch: Arc<dyn NotificationDispatch>,
) -> Arc<ReputationLedger> {
    let ledger = Arc::new(ReputationLedger::new());

    bus.subscribe(
        &[EventKind::SubmissionEvaluated],
        Arc::new(ReputationHandler::new(ledger.clone())),
    )
    .await;
    bus.subscribe(
        &[EventKind::ReputationUpdated],
        Arc::new(AchievementHandler::new()),
    )
    .await;
    bus.subscribe(
        &[
            EventKind::ChallengeCreated,
            EventKind::TeamMemberJoined,
            EventKind::AchievementUnlocked,
        ],
        Arc::new(NotificationHandler::new(dispatch)),
    )
    .await;
    bus.subscribe(
        &[EventKind::NotificationCreated],
        Arc::new(LivePushHandler::new(router)),
    )
    .await;

    ledger
}
