//! In-process data service with live change feeds.

use crate::error::{Result, SyncError};
use crate::types::{Row, Table};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::types::{
    ChangeKind, DropReason, FeedEvent, FeedId, FeedSpec, FeedSubscription, Filter, PointQuery,
};
use super::DataService;

/// Internal feed state.
struct Feed {
    spec: FeedSpec,
    sender: mpsc::Sender<FeedEvent>,
}

impl Feed {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (feed will be dropped).
    fn try_send(&self, event: FeedEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn matches(&self, table: Table, row: &Row) -> bool {
        self.spec.table == table && self.spec.filter.matches(row)
    }
}

/// Tables held in memory plus the feeds watching them.
///
/// Reads respect [`PointQuery`] filters, so owner-scoped reads behave like a
/// row-level-security backend: a filtered-out row is indistinguishable from a
/// missing one.
pub struct MemoryService {
    tables: RwLock<HashMap<Table, HashMap<String, Row>>>,
    /// Active feeds by ID.
    feeds: RwLock<HashMap<FeedId, Feed>>,
    /// Counter for generating feed IDs.
    next_id: AtomicU64,
    available: AtomicBool,
    reads: AtomicU64,
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            reads: AtomicU64::new(0),
        }
    }

    /// Insert or replace a row. The row must carry a string `id` column.
    pub fn insert(&self, table: Table, row: Row) -> Result<()> {
        let id = row_id(&row)?;
        let previous = self
            .tables
            .write()
            .entry(table)
            .or_default()
            .insert(id, row.clone());

        let kind = if previous.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.broadcast(table, kind, &row);
        Ok(())
    }

    /// Delete a row, notifying feeds that matched it.
    pub fn remove(&self, table: Table, id: &str) -> Option<Row> {
        let removed = self
            .tables
            .write()
            .get_mut(&table)
            .and_then(|rows| rows.remove(id));

        if let Some(row) = &removed {
            self.broadcast(table, ChangeKind::Delete, row);
        }
        removed
    }

    /// Fetch a row without any filtering.
    pub fn get(&self, table: Table, id: &str) -> Option<Row> {
        self.tables
            .read()
            .get(&table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Toggle availability. While unavailable every call fails with
    /// `ServiceUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drop every feed as if the connection had gone away.
    pub fn disconnect_all(&self) {
        let dropped: Vec<Feed> = self.feeds.write().drain().map(|(_, feed)| feed).collect();
        for feed in dropped {
            let _ = feed.sender.try_send(FeedEvent::Dropped {
                reason: DropReason::Disconnected,
            });
        }
    }

    /// Get feed count.
    pub fn feed_count(&self) -> usize {
        self.feeds.read().len()
    }

    /// Number of live feeds on `table` with exactly this filter.
    pub fn feed_count_for(&self, table: Table, filter: &Filter) -> usize {
        self.feeds
            .read()
            .values()
            .filter(|f| f.spec.table == table && &f.spec.filter == filter)
            .count()
    }

    /// Total point reads served (including failed ones).
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::ServiceUnavailable(
                "memory service is offline".to_string(),
            ))
        }
    }

    /// Internal broadcast helper. Drops feeds that fail to receive.
    fn broadcast(&self, table: Table, kind: ChangeKind, row: &Row) {
        let mut to_remove = Vec::new();

        {
            let feeds = self.feeds.read();
            for (id, feed) in feeds.iter() {
                if feed.matches(table, row) {
                    let event = FeedEvent::Change {
                        table,
                        kind,
                        row: Some(row.clone()),
                    };
                    if !feed.try_send(event) {
                        to_remove.push(*id);
                    }
                }
            }
        }

        if !to_remove.is_empty() {
            let mut feeds = self.feeds.write();
            for id in to_remove {
                if let Some(feed) = feeds.remove(&id) {
                    debug!(feed = %id, channel = %feed.spec.channel, "dropping slow feed");
                    // The buffer may still be full; the closed channel tells the rest.
                    let _ = feed.sender.try_send(FeedEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Row) -> Result<String> {
    match row.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(SyncError::InvalidOperation(
            "row is missing a string id".to_string(),
        )),
    }
}

#[async_trait]
impl DataService for MemoryService {
    async fn read(&self, query: &PointQuery) -> Result<Row> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        self.get(query.table, &query.id)
            .filter(|row| query.admits(row))
            .ok_or_else(|| SyncError::NotFound {
                table: query.table,
                id: query.id.clone(),
            })
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row> {
        self.ensure_available()?;

        let updated = {
            let mut tables = self.tables.write();
            let row = tables
                .get_mut(&table)
                .and_then(|rows| rows.get_mut(id))
                .ok_or_else(|| SyncError::NotFound {
                    table,
                    id: id.to_string(),
                })?;
            for (column, value) in fields {
                if column != "id" {
                    row.insert(column, value);
                }
            }
            row.clone()
        };

        self.broadcast(table, ChangeKind::Update, &updated);
        Ok(updated)
    }

    async fn subscribe(&self, spec: FeedSpec) -> Result<FeedSubscription> {
        self.ensure_available()?;

        let id = FeedId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::channel(spec.buffer_size.max(1));
        debug!(feed = %id, channel = %spec.channel, filter = %spec.filter, "feed opened");
        self.feeds.write().insert(id, Feed { spec, sender });

        Ok(FeedSubscription { id, receiver })
    }

    async fn unsubscribe(&self, id: FeedId) -> Result<()> {
        if let Some(feed) = self.feeds.write().remove(&id) {
            debug!(feed = %id, channel = %feed.spec.channel, "feed closed");
            let _ = feed.sender.try_send(FeedEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
        Ok(())
    }
}
