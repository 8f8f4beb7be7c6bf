//! Event bus: validate, persist, then dispatch.
//!
//! ```text
//! publish(event)
//!    │ validate ── reject ──► PublishError::Validation
//!    │ append to audit log (awaited — write-ahead of dispatch)
//!    ▼
//! spawn ── handlers for kind, in registration order ── handler.handle()
//!                                                          │ Err
//!                                                          ▼
//!                                          log + publish system.alert
//! ```
//!
//! A handler failure never stops the remaining handlers and never reaches
//! the publisher: `publish` returns as soon as the record is durable.
//! Handlers receive the bus itself so they can publish follow-up events
//! (reputation changes, achievements, notifications).

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::audit::{AuditError, AuditLog};
use super::event::{DomainEvent, EventKind, EventRecord, ValidationError};

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// Handler-side failures. Reported to the bus, never to the publisher.
#[derive(Debug, Clone)]
pub enum HandlerError {
    Failed(String),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// Publish-side failures.
#[derive(Debug, Clone)]
pub enum PublishError {
    Validation(ValidationError),
    /// The audit append failed; nothing was dispatched.
    Audit(AuditError),
    Closed,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "Event rejected: {e}"),
            Self::Audit(e) => write!(f, "Audit append failed: {e}"),
            Self::Closed => write!(f, "Event bus is closed"),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<ValidationError> for PublishError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<AuditError> for PublishError {
    fn from(e: AuditError) -> Self {
        Self::Audit(e)
    }
}

/// A subscriber reacting to dispatched event records.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name, used in logs and system alerts.
    fn name(&self) -> &str;

    /// React to one record. The bus is available for follow-up publishes.
    async fn handle(&self, record: &EventRecord, bus: &EventBus) -> Result<(), HandlerError>;
}

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

struct BusInner {
    /// kind → subscribers, in registration order
    subscribers: RwLock<HashMap<EventKind, Vec<Subscriber>>>,
    audit: Arc<dyn AuditLog>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// The event bus. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                audit,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a handler for the given kinds.
    ///
    /// Within one kind, handlers run in registration order. One
    /// subscription id covers all the kinds registered here.
    pub async fn subscribe(
        &self,
        kinds: &[EventKind],
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.inner.subscribers.write().await;
        for kind in kinds {
            subscribers.entry(*kind).or_default().push(Subscriber {
                id,
                handler: handler.clone(),
            });
        }
        log::debug!("Subscribed '{}' as #{id} to {} kinds", handler.name(), kinds.len());
        id
    }

    /// Remove a subscription everywhere it was registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.inner.subscribers.write().await;
        for subs in subscribers.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    /// Validate, persist, and dispatch an event.
    ///
    /// Returns once the record is durable in the audit log; handlers run
    /// afterwards on a spawned task. The returned record is exactly what
    /// was persisted (id, timestamp, extracted user).
    pub async fn publish(&self, event: DomainEvent) -> Result<EventRecord, PublishError> {
        self.publish_record(EventRecord::new(event)).await
    }

    /// Publish with free-form metadata attached to the record.
    pub async fn publish_with_metadata(
        &self,
        event: DomainEvent,
        metadata: HashMap<String, String>,
    ) -> Result<EventRecord, PublishError> {
        self.publish_record(EventRecord::new(event).with_metadata(metadata))
            .await
    }

    async fn publish_record(&self, record: EventRecord) -> Result<EventRecord, PublishError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PublishError::Closed);
        }
        record.event.validate()?;

        // Write-ahead: the record is durable before any handler sees it.
        self.inner.audit.append(&record).await?;

        let bus = self.clone();
        let dispatched = record.clone();
        tokio::spawn(async move {
            bus.dispatch(dispatched).await;
        });

        Ok(record)
    }

    // Boxed: dispatch publishes alerts, and publish spawns dispatch, so
    // the future type is recursive without the indirection.
    fn dispatch(&self, record: EventRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.dispatch_inner(record))
    }

    async fn dispatch_inner(&self, record: EventRecord) {
        let kind = record.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers
                .get(&kind)
                .map(|subs| subs.iter().map(|s| s.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(e) = handler.handle(&record, self).await {
                log::error!(
                    "Handler '{}' failed on {kind} event {}: {e}",
                    handler.name(),
                    record.id
                );
                // Alert on handler failures, but never on failures while
                // handling an alert (that would loop).
                if kind != EventKind::SystemAlert {
                    let alert = DomainEvent::SystemAlert {
                        source: handler.name().to_string(),
                        message: format!("Failed to handle {kind}: {e}"),
                    };
                    if let Err(e) = self.publish(alert).await {
                        log::error!("Failed to publish handler-failure alert: {e}");
                    }
                }
            }
        }
    }

    /// Number of subscriptions registered for a kind.
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .read()
            .await
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Stop accepting publishes. In-flight dispatches finish.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::audit::MemoryAuditLog;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Forwards every record it sees to an mpsc channel.
    struct Probe {
        name: String,
        tx: mpsc::UnboundedSender<EventRecord>,
    }

    impl Probe {
        fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<EventRecord>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    name: name.to_string(),
                    tx,
                }),
                rx,
            )
        }
    }

    #[async_trait]
    impl EventHandler for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, record: &EventRecord, _bus: &EventBus) -> Result<(), HandlerError> {
            self.tx
                .send(record.clone())
                .map_err(|e| HandlerError::Failed(e.to_string()))
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl EventHandler for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        async fn handle(&self, _: &EventRecord, _: &EventBus) -> Result<(), HandlerError> {
            Err(HandlerError::Failed("simulated failure".into()))
        }
    }

    fn challenge_event() -> DomainEvent {
        DomainEvent::ChallengeCreated {
            challenge_id: Uuid::new_v4(),
            title: "Graphs".into(),
            created_by: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_publish_dispatches_to_subscriber() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let (probe, mut rx) = Probe::new("probe");
        bus.subscribe(&[EventKind::ChallengeCreated], probe).await;

        let record = bus.publish(challenge_event()).await.unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen, record);
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_event() {
        let audit = Arc::new(MemoryAuditLog::new());
        let bus = EventBus::new(audit.clone());

        let result = bus
            .publish(DomainEvent::ChallengeCreated {
                challenge_id: Uuid::new_v4(),
                title: "".into(),
                created_by: Uuid::new_v4(),
            })
            .await;
        assert!(matches!(result, Err(PublishError::Validation(_))));
        // Rejected events never reach the audit log.
        assert!(audit.is_empty().await);
    }

    #[tokio::test]
    async fn test_audit_written_before_dispatch() {
        let audit = Arc::new(MemoryAuditLog::new());
        let bus = EventBus::new(audit.clone());
        let (probe, mut rx) = Probe::new("probe");
        bus.subscribe(&[EventKind::ChallengeCreated], probe).await;

        let record = bus.publish(challenge_event()).await.unwrap();
        // The append is awaited inside publish, so the record is already
        // durable here even though dispatch may not have run yet.
        assert_eq!(audit.records().await, vec![record]);
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_kind_routing() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let (challenge_probe, mut challenge_rx) = Probe::new("challenges");
        let (team_probe, mut team_rx) = Probe::new("teams");
        bus.subscribe(&[EventKind::ChallengeCreated], challenge_probe)
            .await;
        bus.subscribe(&[EventKind::TeamMemberJoined], team_probe).await;

        bus.publish(challenge_event()).await.unwrap();

        assert_eq!(
            challenge_rx.recv().await.unwrap().kind(),
            EventKind::ChallengeCreated
        );
        assert!(team_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_failure_isolated_and_alerted() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let (probe, mut rx) = Probe::new("survivor");
        let (alert_probe, mut alert_rx) = Probe::new("alerts");
        bus.subscribe(&[EventKind::ChallengeCreated], Arc::new(AlwaysFails))
            .await;
        bus.subscribe(&[EventKind::ChallengeCreated], probe).await;
        bus.subscribe(&[EventKind::SystemAlert], alert_probe).await;

        bus.publish(challenge_event()).await.unwrap();

        // The failing handler does not stop the next one.
        rx.recv().await.unwrap();
        // And its failure surfaces as a system alert.
        let alert = alert_rx.recv().await.unwrap();
        match alert.event {
            DomainEvent::SystemAlert { source, message } => {
                assert_eq!(source, "always-fails");
                assert!(message.contains("simulated failure"));
            }
            other => panic!("Expected SystemAlert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failing_alert_handler_does_not_loop() {
        let audit = Arc::new(MemoryAuditLog::new());
        let bus = EventBus::new(audit.clone());
        bus.subscribe(&[EventKind::ChallengeCreated], Arc::new(AlwaysFails))
            .await;
        bus.subscribe(&[EventKind::SystemAlert], Arc::new(AlwaysFails))
            .await;

        bus.publish(challenge_event()).await.unwrap();

        // Give dispatch time to settle: the original event plus exactly
        // one alert, never an alert about the alert.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(audit.len().await, 2);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let (probe, mut rx) = Probe::new("probe");
        let id = bus
            .subscribe(&[EventKind::ChallengeCreated], probe)
            .await;
        assert_eq!(bus.subscriber_count(EventKind::ChallengeCreated).await, 1);

        bus.unsubscribe(id).await;
        assert_eq!(bus.subscriber_count(EventKind::ChallengeCreated).await, 0);

        bus.publish(challenge_event()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_bus_rejects_publish() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        bus.close();
        assert!(bus.is_closed());

        let result = bus.publish(challenge_event()).await;
        assert!(matches!(result, Err(PublishError::Closed)));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let audit = Arc::new(MemoryAuditLog::new());
        let bus = EventBus::new(audit.clone());
        bus.publish(challenge_event()).await.unwrap();
        assert_eq!(audit.len().await, 1);
    }

    #[tokio::test]
    async fn test_metadata_flows_to_handlers() {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let (probe, mut rx) = Probe::new("probe");
        bus.subscribe(&[EventKind::ChallengeCreated], probe).await;

        bus.publish_with_metadata(
            challenge_event(),
            HashMap::from([("origin".to_string(), "api".to_string())]),
        )
        .await
        .unwrap();

        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.metadata.get("origin").map(String::as_str), Some("api"));
    }
}
