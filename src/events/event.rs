//! Domain event types and the audit record wrapper.
//!
//! Events describe things that happened elsewhere on the platform
//! (challenges, teams, submissions). The bus validates and persists them
//! before any handler runs; handlers may publish follow-up events of their
//! own (reputation changes, achievements, notifications).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Event classification, used for subscription routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChallengeCreated,
    TeamMemberJoined,
    SubmissionEvaluated,
    ReputationUpdated,
    AchievementUnlocked,
    NotificationCreated,
    SystemAlert,
}

impl EventKind {
    /// Every kind, for handlers that subscribe to the whole stream.
    pub const ALL: [EventKind; 7] = [
        EventKind::ChallengeCreated,
        EventKind::TeamMemberJoined,
        EventKind::SubmissionEvaluated,
        EventKind::ReputationUpdated,
        EventKind::AchievementUnlocked,
        EventKind::NotificationCreated,
        EventKind::SystemAlert,
    ];

    /// Dot-namespaced name (e.g. `"submission.evaluated"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChallengeCreated => "challenge.created",
            EventKind::TeamMemberJoined => "team.member.joined",
            EventKind::SubmissionEvaluated => "submission.evaluated",
            EventKind::ReputationUpdated => "reputation.updated",
            EventKind::AchievementUnlocked => "achievement.unlocked",
            EventKind::NotificationCreated => "notification.created",
            EventKind::SystemAlert => "system.alert",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    ChallengeCreated {
        challenge_id: Uuid,
        title: String,
        created_by: Uuid,
    },
    TeamMemberJoined {
        team_id: Uuid,
        user_id: Uuid,
        team_name: String,
    },
    SubmissionEvaluated {
        submission_id: Uuid,
        challenge_id: Uuid,
        user_id: Uuid,
        score: u32,
        max_score: u32,
    },
    ReputationUpdated {
        user_id: Uuid,
        change: i64,
        new_score: i64,
    },
    AchievementUnlocked {
        user_id: Uuid,
        achievement: String,
    },
    NotificationCreated {
        notification_id: Uuid,
        user_id: Uuid,
        title: String,
        body: String,
    },
    SystemAlert {
        source: String,
        message: String,
    },
}

/// Rejected events never reach the audit log or any handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EmptyField(&'static str),
    /// score exceeds max_score, or max_score is zero.
    InvalidScore { score: u32, max_score: u32 },
    /// A reputation update must move the score.
    ZeroChange,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "Field '{field}' must not be empty"),
            Self::InvalidScore { score, max_score } => {
                write!(f, "Invalid score {score}/{max_score}")
            }
            Self::ZeroChange => write!(f, "Reputation change must not be zero"),
        }
    }
}

impl std::error::Error for ValidationError {}

impl DomainEvent {
    /// The kind used for subscription routing.
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::ChallengeCreated { .. } => EventKind::ChallengeCreated,
            DomainEvent::TeamMemberJoined { .. } => EventKind::TeamMemberJoined,
            DomainEvent::SubmissionEvaluated { .. } => EventKind::SubmissionEvaluated,
            DomainEvent::ReputationUpdated { .. } => EventKind::ReputationUpdated,
            DomainEvent::AchievementUnlocked { .. } => EventKind::AchievementUnlocked,
            DomainEvent::NotificationCreated { .. } => EventKind::NotificationCreated,
            DomainEvent::SystemAlert { .. } => EventKind::SystemAlert,
        }
    }

    /// The user this event is about, where one exists.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            DomainEvent::ChallengeCreated { created_by, .. } => Some(*created_by),
            DomainEvent::TeamMemberJoined { user_id, .. }
            | DomainEvent::SubmissionEvaluated { user_id, .. }
            | DomainEvent::ReputationUpdated { user_id, .. }
            | DomainEvent::AchievementUnlocked { user_id, .. }
            | DomainEvent::NotificationCreated { user_id, .. } => Some(*user_id),
            DomainEvent::SystemAlert { .. } => None,
        }
    }

    /// Structural validation, run once at publish time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            DomainEvent::ChallengeCreated { title, .. } => {
                if title.trim().is_empty() {
                    return Err(ValidationError::EmptyField("title"));
                }
            }
            DomainEvent::TeamMemberJoined { team_name, .. } => {
                if team_name.trim().is_empty() {
                    return Err(ValidationError::EmptyField("team_name"));
                }
            }
            DomainEvent::SubmissionEvaluated {
                score, max_score, ..
            } => {
                if *max_score == 0 || score > max_score {
                    return Err(ValidationError::InvalidScore {
                        score: *score,
                        max_score: *max_score,
                    });
                }
            }
            DomainEvent::ReputationUpdated { change, .. } => {
                if *change == 0 {
                    return Err(ValidationError::ZeroChange);
                }
            }
            DomainEvent::AchievementUnlocked { achievement, .. } => {
                if achievement.trim().is_empty() {
                    return Err(ValidationError::EmptyField("achievement"));
                }
            }
            DomainEvent::NotificationCreated { title, .. } => {
                if title.trim().is_empty() {
                    return Err(ValidationError::EmptyField("title"));
                }
            }
            DomainEvent::SystemAlert { source, message } => {
                if source.trim().is_empty() {
                    return Err(ValidationError::EmptyField("source"));
                }
                if message.trim().is_empty() {
                    return Err(ValidationError::EmptyField("message"));
                }
            }
        }
        Ok(())
    }
}

/// The persisted and dispatched form of an event.
///
/// Assembled by the bus at publish time; the record handlers see is
/// exactly the record the audit log stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique event identifier
    pub id: Uuid,
    /// When the bus accepted the event (UTC)
    pub occurred_at: DateTime<Utc>,
    /// The user the event is about, where one exists
    pub user_id: Option<Uuid>,
    /// The domain payload
    pub event: DomainEvent,
    /// Free-form key/value metadata supplied by the publisher
    pub metadata: HashMap<String, String>,
}

impl EventRecord {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            user_id: event.user_id(),
            event,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The routing kind of the wrapped event.
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
