//! Performance benchmarks for resolution and agent switching.

use agent_sync::{
    MemoryService, Resolver, Row, SessionPrincipal, SyncConfig, SyncedStore, Table, UserId,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

fn seeded(agents: usize) -> Arc<MemoryService> {
    let service = Arc::new(MemoryService::new());
    for i in 0..agents {
        service
            .insert(
                Table::Organizations,
                row(json!({"id": format!("org-{i}"), "name": "Org", "owner_id": "user-1"})),
            )
            .unwrap();
        service
            .insert(
                Table::Agents,
                row(json!({
                    "id": format!("agent-{i}"),
                    "name": format!("Agent {i}"),
                    "organization_id": format!("org-{i}")
                })),
            )
            .unwrap();
    }
    service
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark a full resolution (agent read plus owned organization read)
fn bench_resolve(c: &mut Criterion) {
    let rt = runtime();
    let resolver = Resolver::new(seeded(1));
    let user = UserId::from("user-1");

    c.bench_function("resolve_with_organization", |b| {
        b.to_async(&rt).iter(|| async {
            let view = resolver
                .resolve(&"agent-0".into(), Some(&user))
                .await
                .unwrap();
            black_box(view)
        })
    });
}

/// Benchmark switching between agents, which re-scopes both feeds
fn bench_switch_agents(c: &mut Criterion) {
    let mut group = c.benchmark_group("switch_agents");

    for agents in [2usize, 16] {
        group.bench_with_input(BenchmarkId::new("agents", agents), &agents, |b, &agents| {
            let rt = runtime();
            let service = seeded(agents);
            let store = rt.block_on(async {
                SyncedStore::new(
                    service.clone(),
                    Arc::new(SessionPrincipal::signed_in("user-1")),
                    SyncConfig::default(),
                )
            });
            let mut next = 0usize;

            b.iter(|| {
                next = (next + 1) % agents;
                rt.block_on(store.set_root_id(format!("agent-{next}"))).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark a background refresh of an unchanged agent
fn bench_refresh(c: &mut Criterion) {
    let rt = runtime();
    let service = seeded(1);
    let store = rt.block_on(async {
        let store = SyncedStore::new(
            service.clone(),
            Arc::new(SessionPrincipal::signed_in("user-1")),
            SyncConfig::default(),
        );
        store.set_root_id("agent-0").await.unwrap();
        store
    });

    c.bench_function("refresh", |b| {
        b.iter(|| rt.block_on(store.refresh()).unwrap());
    });
}

criterion_group!(benches, bench_resolve, bench_switch_agents, bench_refresh);
criterion_main!(benches);
