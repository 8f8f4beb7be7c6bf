use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use campus_collab::broadcast::BroadcastRouter;
use campus_collab::call::CallRelay;
use campus_collab::events::{DomainEvent, EventBus, EventRecord, FileAuditLog, MemoryAuditLog};
use campus_collab::presence::PresenceTracker;
use campus_collab::protocol::{CallKind, ChatKind, ClientEvent, ServerEvent};
use campus_collab::registry::{ConnectionRegistry, UserIdentity};
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn chat_event() -> ServerEvent {
    ServerEvent::ChatMessage {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        user_name: "Alice".into(),
        message: "The tests on challenge 4 are flaky again".into(),
        timestamp: Utc::now(),
        kind: ChatKind::Text,
    }
}

fn bench_chat_encode(c: &mut Criterion) {
    let event = chat_event();

    c.bench_function("chat_encode", |b| {
        b.iter(|| {
            black_box(black_box(&event).encode().unwrap());
        })
    });
}

fn bench_chat_decode(c: &mut Criterion) {
    let encoded = chat_event().encode().unwrap();

    c.bench_function("chat_decode", |b| {
        b.iter(|| {
            black_box(ServerEvent::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_client_event_decode(c: &mut Criterion) {
    let encoded = ClientEvent::ChatSend {
        workspace_id: Uuid::new_v4(),
        message: "hello".into(),
        kind: ChatKind::Text,
    }
    .encode()
    .unwrap();

    c.bench_function("client_event_decode", |b| {
        b.iter(|| {
            black_box(ClientEvent::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_broadcast_100_connections(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_100_connections", |b| {
        let (registry, receivers, workspace) = rt.block_on(async {
            let registry = Arc::new(ConnectionRegistry::new());
            let workspace = Uuid::new_v4();
            let mut receivers = Vec::new();
            for i in 0..100 {
                let (tx, rx) = mpsc::unbounded_channel();
                let conn = registry
                    .register(UserIdentity::new(Uuid::new_v4(), format!("User{i}")), tx)
                    .await;
                registry.set_workspace(conn, workspace).await.unwrap();
                receivers.push(rx);
            }
            (registry, receivers, workspace)
        });
        let router = BroadcastRouter::new(registry);
        let event = chat_event();

        b.iter(|| {
            rt.block_on(async {
                let delivery = router
                    .broadcast_to_workspace(workspace, black_box(&event), None)
                    .await;
                black_box(delivery);
            });
        });

        // Drain so the channels never grow unbounded across iterations.
        drop(receivers);
    });
}

fn bench_presence_snapshot_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tracker = PresenceTracker::new();
    let workspace = Uuid::new_v4();

    rt.block_on(async {
        for _ in 0..1000 {
            tracker.join(workspace, Uuid::new_v4()).await;
        }
    });

    c.bench_function("presence_snapshot_1000_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(tracker.snapshot(workspace).await);
            });
        })
    });
}

fn bench_call_relay_validate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let relay = CallRelay::new();
    let workspace = Uuid::new_v4();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let call_id = rt.block_on(async {
        let call = relay.start(workspace, alice, CallKind::Video).await.unwrap();
        relay.join(call.call_id, bob).await.unwrap();
        call.call_id
    });

    c.bench_function("call_relay_validate", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    relay
                        .validate_relay(black_box(call_id), alice, bob)
                        .await
                        .unwrap(),
                );
            });
        })
    });
}

fn bench_event_publish_memory(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_publish_memory_audit", |b| {
        let bus = EventBus::new(Arc::new(MemoryAuditLog::new()));
        let user = Uuid::new_v4();
        b.iter(|| {
            rt.block_on(async {
                let record = bus
                    .publish(black_box(DomainEvent::ReputationUpdated {
                        user_id: user,
                        change: 42,
                        new_score: 42,
                    }))
                    .await
                    .unwrap();
                black_box(record);
            });
        })
    });
}

fn bench_file_audit_append(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = std::env::temp_dir().join(format!("collab_bench_audit_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let log = FileAuditLog::open(dir.join("bench.audit")).unwrap();
    let record = EventRecord::new(DomainEvent::ChallengeCreated {
        challenge_id: Uuid::new_v4(),
        title: "Graphs".into(),
        created_by: Uuid::new_v4(),
    });

    c.bench_function("file_audit_append", |b| {
        b.iter(|| {
            rt.block_on(async {
                use campus_collab::events::AuditLog;
                black_box(log.append(black_box(&record)).await.unwrap());
            });
        })
    });

    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    benches,
    bench_chat_encode,
    bench_chat_decode,
    bench_client_event_decode,
    bench_broadcast_100_connections,
    bench_presence_snapshot_1000,
    bench_call_relay_validate,
    bench_event_publish_memory,
    bench_file_audit_append,
);
criterion_main!(benches);
