//! The hosted data service, as seen by the synchronization core.
//!
//! The service is an opaque request/response plus subscribe/notify backend:
//! - Point reads of a single row, optionally narrowed by filters
//! - Targeted field updates
//! - Change feeds scoped by table and row filter
//!
//! [`MemoryService`] is an in-process implementation used by tests and
//! benchmarks.

pub mod memory;
mod types;

pub use memory::MemoryService;
pub use types::{
    ChangeKind, DropReason, FeedEvent, FeedId, FeedSpec, FeedSubscription, Filter, PointQuery,
    OWNER_COLUMN,
};

use crate::error::Result;
use crate::types::{Row, Table, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;

/// A backend the store reads from and subscribes to.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Read one row. Missing rows and rows rejected by the query's filters
    /// both yield `NotFound` (or `AccessDenied`).
    async fn read(&self, query: &PointQuery) -> Result<Row>;

    /// Update the given columns of one row and return the updated row.
    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<Row>;

    /// Open a change feed.
    async fn subscribe(&self, spec: FeedSpec) -> Result<FeedSubscription>;

    /// Close a change feed. Unknown ids are ignored.
    async fn unsubscribe(&self, id: FeedId) -> Result<()>;
}

/// Source of the currently authenticated user.
#[async_trait]
pub trait PrincipalSource: Send + Sync {
    async fn current_principal_id(&self) -> Option<UserId>;
}

/// A principal that can sign in and out at runtime.
#[derive(Debug, Default)]
pub struct SessionPrincipal {
    user: RwLock<Option<UserId>>,
}

impl SessionPrincipal {
    pub fn signed_in(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(Some(user.into())),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        *self.user.write() = Some(user.into());
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

#[async_trait]
impl PrincipalSource for SessionPrincipal {
    async fn current_principal_id(&self) -> Option<UserId> {
        self.user.read().clone()
    }
}
