//! Query and feed types exchanged with the data service.

use crate::types::{Row, Table, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Column holding the owner reference on owned tables.
pub const OWNER_COLUMN: &str = "owner_id";

/// A row filter expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Match on the primary key.
    pub fn id(value: impl Into<String>) -> Self {
        Filter::eq("id", value)
    }

    /// Check whether a row satisfies the filter.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::Eq { column, value } => {
                row.get(column).and_then(|v| v.as_str()) == Some(value.as_str())
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Eq { column, value } => write!(f, "{column}=eq.{value}"),
        }
    }
}

/// A single-row read, optionally narrowed by extra filters.
///
/// Extra filters are evaluated by the service. A row that exists but fails a
/// filter is reported exactly like a missing row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointQuery {
    pub table: Table,
    pub id: String,
    pub filters: Vec<Filter>,
}

impl PointQuery {
    pub fn by_id(table: Table, id: impl Into<String>) -> Self {
        Self {
            table,
            id: id.into(),
            filters: Vec::new(),
        }
    }

    /// Restrict the read to rows owned by `owner`.
    pub fn owned_by(mut self, owner: &UserId) -> Self {
        self.filters.push(Filter::eq(OWNER_COLUMN, owner.as_str()));
        self
    }

    /// Check the extra filters against a row.
    pub fn admits(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// Parameters for opening a change feed.
#[derive(Clone, Debug)]
pub struct FeedSpec {
    /// Channel name, for diagnostics.
    pub channel: String,
    pub table: Table,
    pub filter: Filter,
    /// Max buffered events before the subscriber is dropped.
    pub buffer_size: usize,
}

/// Kind of row change carried by a feed event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Events delivered on a feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A row matching the feed's filter changed.
    Change {
        table: Table,
        kind: ChangeKind,
        /// Row after the change (before it, for deletes). May be incomplete.
        row: Option<Row>,
    },

    /// The feed was closed by the service.
    Dropped { reason: DropReason },
}

/// Why a feed was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Underlying connection went away.
    Disconnected,
    /// Internal error.
    Error(String),
    /// Explicitly unsubscribed.
    Unsubscribed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BufferOverflow => f.write_str("buffer overflow"),
            DropReason::Disconnected => f.write_str("disconnected"),
            DropReason::Error(msg) => write!(f, "error: {msg}"),
            DropReason::Unsubscribed => f.write_str("unsubscribed"),
        }
    }
}

/// Service-assigned identifier of a live feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a live feed.
pub struct FeedSubscription {
    pub id: FeedId,
    /// Channel to receive events.
    pub receiver: mpsc::Receiver<FeedEvent>,
}

impl FeedSubscription {
    /// Receive the next event. `None` once the service has closed the feed.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<FeedEvent, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}
