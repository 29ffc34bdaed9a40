//! Shared fixtures for store tests.

#![allow(dead_code)]

use agent_sync::{
    DataService, FeedId, FeedSpec, FeedSubscription, MemoryService, PointQuery, Result, Row,
    SessionPrincipal, StoreSnapshot, SyncConfig, SyncedStore, Table,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::time::timeout;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().expect("fixture rows are objects")
}

/// A service with:
/// - agent-1 → org-9 (owned by user-1)
/// - agent-2 without an organization
/// - agent-3 → org-7 (owned by user-2)
pub fn seeded_service() -> Arc<MemoryService> {
    init_tracing();
    let service = Arc::new(MemoryService::new());
    service
        .insert(
            Table::Agents,
            row(json!({
                "id": "agent-1",
                "name": "Front desk",
                "organization_id": "org-9",
                "greeting": "Thanks for calling!"
            })),
        )
        .unwrap();
    service
        .insert(Table::Agents, row(json!({"id": "agent-2", "name": "Night line"})))
        .unwrap();
    service
        .insert(
            Table::Agents,
            row(json!({"id": "agent-3", "name": "Sales", "organization_id": "org-7"})),
        )
        .unwrap();
    service
        .insert(
            Table::Organizations,
            row(json!({"id": "org-9", "name": "Acme", "owner_id": "user-1"})),
        )
        .unwrap();
    service
        .insert(
            Table::Organizations,
            row(json!({"id": "org-7", "name": "Globex", "owner_id": "user-2"})),
        )
        .unwrap();
    service
}

pub fn store_for(service: Arc<dyn DataService>, user: &str) -> SyncedStore {
    SyncedStore::new(
        service,
        Arc::new(SessionPrincipal::signed_in(user)),
        SyncConfig {
            min_update_interval: Duration::ZERO,
            reconnect_delay: Duration::from_millis(10),
            ..Default::default()
        },
    )
}

/// Wait until a snapshot satisfies `pred`, failing after one second.
pub async fn wait_for<F>(rx: &mut watch::Receiver<StoreSnapshot>, pred: F) -> StoreSnapshot
where
    F: Fn(&StoreSnapshot) -> bool,
{
    let result = timeout(Duration::from_secs(1), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if pred(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("store dropped");
        }
    })
    .await;
    result.expect("timed out waiting for store state")
}

/// Poll `check` until it holds, failing after one second.
pub async fn eventually<F>(check: F)
where
    F: Fn() -> bool,
{
    timeout(Duration::from_secs(1), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// A gate that holds the response of one read until released.
pub struct Gate {
    pub entered: Notify,
    permits: Semaphore,
}

impl Gate {
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

/// Wraps a [`MemoryService`] and lets tests hold reads of chosen ids.
pub struct GatedService {
    pub inner: Arc<MemoryService>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
}

impl GatedService {
    pub fn new(inner: Arc<MemoryService>) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Hold the response to the next read of `id` until the gate is released.
    pub fn gate(&self, id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            permits: Semaphore::new(0),
        });
        self.gates.lock().insert(id.to_string(), gate.clone());
        gate
    }
}

#[async_trait]
impl DataService for GatedService {
    /// Gated reads are served immediately but their response is held, so a
    /// released gate delivers data as it was when the read happened.
    async fn read(&self, query: &PointQuery) -> Result<Row> {
        let result = self.inner.read(query).await;
        let gate = self.gates.lock().remove(&query.id);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            let permit = gate.permits.acquire().await.expect("gate closed");
            permit.forget();
        }
        result
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row> {
        self.inner.update(table, id, fields).await
    }

    async fn subscribe(&self, spec: FeedSpec) -> Result<FeedSubscription> {
        self.inner.subscribe(spec).await
    }

    async fn unsubscribe(&self, id: FeedId) -> Result<()> {
        self.inner.unsubscribe(id).await
    }
}

/// A feed call seen by [`RecordingService`], by channel name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedCall {
    Subscribe(String),
    Unsubscribe(String),
}

/// Wraps a [`MemoryService`] and records subscribe/unsubscribe in call order.
pub struct RecordingService {
    pub inner: Arc<MemoryService>,
    calls: Mutex<Vec<FeedCall>>,
    channels: Mutex<HashMap<FeedId, String>>,
}

impl RecordingService {
    pub fn new(inner: Arc<MemoryService>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Take the calls recorded so far.
    pub fn take_calls(&self) -> Vec<FeedCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

#[async_trait]
impl DataService for RecordingService {
    async fn read(&self, query: &PointQuery) -> Result<Row> {
        self.inner.read(query).await
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row> {
        self.inner.update(table, id, fields).await
    }

    async fn subscribe(&self, spec: FeedSpec) -> Result<FeedSubscription> {
        let channel = spec.channel.clone();
        self.calls.lock().push(FeedCall::Subscribe(channel.clone()));
        let subscription = self.inner.subscribe(spec).await?;
        self.channels.lock().insert(subscription.id, channel);
        Ok(subscription)
    }

    async fn unsubscribe(&self, id: FeedId) -> Result<()> {
        let channel = self.channels.lock().remove(&id).unwrap_or_default();
        self.calls.lock().push(FeedCall::Unsubscribe(channel));
        self.inner.unsubscribe(id).await
    }
}
