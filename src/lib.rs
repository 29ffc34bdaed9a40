//! # Agent Sync
//!
//! A client-side store that holds one agent and its organization and keeps
//! them in sync with a hosted data service.
//!
//! ## Core Concepts
//!
//! - **Resolver**: reads an agent, follows its organization foreign key and
//!   merges both into an [`AgentView`]
//! - **Feeds**: live change subscriptions on the agent row and the
//!   organization row, re-scoped whenever either id changes
//! - **Store**: holds the current view and a loading flag, and re-resolves on
//!   every change notification
//!
//! ## Example
//!
//! ```ignore
//! use agent_sync::{MemoryService, SessionPrincipal, SyncConfig, SyncedStore};
//! use std::sync::Arc;
//!
//! let service = Arc::new(MemoryService::new());
//! let principal = Arc::new(SessionPrincipal::signed_in("user-1"));
//! let store = SyncedStore::new(service, principal, SyncConfig::default());
//!
//! store.set_root_id("agent-1").await?;
//! if let Some(view) = store.current_view() {
//!     println!("{} / {:?}", view.name, view.organization);
//! }
//! ```

pub mod edit;
pub mod error;
pub mod feeds;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use edit::{AgentEditor, EditOutcome};
pub use error::{Result, SyncError};
pub use feeds::{FeedKey, FeedKind, FeedManager, FeedNotice, FeedPhase};
pub use resolver::Resolver;
pub use service::{
    ChangeKind, DataService, DropReason, FeedEvent, FeedId, FeedSpec, FeedSubscription, Filter,
    MemoryService, PointQuery, PrincipalSource, SessionPrincipal,
};
pub use store::{StoreSnapshot, SyncConfig, SyncedStore};
pub use types::*;
