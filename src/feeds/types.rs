//! Feed keys and notices.

use crate::service::{DropReason, Filter};
use crate::types::{AgentId, OrganizationId, Table};
use std::fmt;

/// Which of the two managed feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedKind {
    Agent,
    Organization,
}

/// Identity of a feed: the table and row filter it is scoped to.
///
/// The service scopes a feed when it is opened, so a different key always
/// means a different subscription.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FeedKey {
    pub table: Table,
    pub filter: Filter,
}

impl FeedKey {
    pub fn agent(id: &AgentId) -> Self {
        Self {
            table: Table::Agents,
            filter: Filter::id(id.as_str()),
        }
    }

    pub fn organization(id: &OrganizationId) -> Self {
        Self {
            table: Table::Organizations,
            filter: Filter::id(id.as_str()),
        }
    }

    pub fn kind(&self) -> FeedKind {
        match self.table {
            Table::Agents => FeedKind::Agent,
            Table::Organizations => FeedKind::Organization,
        }
    }

    /// Channel name used when opening the feed, e.g. `org-42`.
    pub fn channel_name(&self) -> String {
        let prefix = match self.kind() {
            FeedKind::Agent => "agent",
            FeedKind::Organization => "org",
        };
        match &self.filter {
            Filter::Eq { value, .. } => format!("{prefix}-{value}"),
        }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.table, self.filter)
    }
}

/// Lifecycle phase of one managed feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedPhase {
    Absent,
    Subscribing,
    Active,
    /// Dropped by the service and not yet re-opened.
    Lost,
}

/// What the manager reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedNotice {
    /// Something changed on the feed; the payload is deliberately not carried.
    Changed { key: FeedKey },
    /// The feed's connection was dropped by the service.
    Lost { key: FeedKey, reason: DropReason },
    /// Time to retry a feed that could not be re-opened.
    Retry { key: FeedKey },
}

impl FeedNotice {
    pub fn key(&self) -> &FeedKey {
        match self {
            FeedNotice::Changed { key }
            | FeedNotice::Lost { key, .. }
            | FeedNotice::Retry { key } => key,
        }
    }
}
