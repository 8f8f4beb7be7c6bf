//! Platform event bus: validated, audited, fan-out domain events.
//!
//! - [`event`] — Domain event types, validation, and the audit record
//! - [`audit`] — Durable append-only log written before any dispatch
//! - [`bus`] — Subscription routing and handler isolation
//! - [`handlers`] — The built-in reputation / achievement / notification cascade

pub mod audit;
pub mod bus;
pub mod event;
pub mod handlers;

pub use audit::{AuditError, AuditLog, FileAuditLog, MemoryAuditLog};
pub use bus::{EventBus, EventHandler, HandlerError, PublishError, SubscriptionId};
pub use event::{DomainEvent, EventKind, EventRecord, ValidationError};
pub use handlers::{
    wire_default_handlers, AchievementHandler, DispatchError, LivePushHandler,
    NotificationDispatch, NotificationHandler, NullDispatch, ReputationHandler,
    ReputationLedger, ACHIEVEMENT_THRESHOLD, MILESTONE_ACHIEVEMENT,
};
