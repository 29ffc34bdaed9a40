//! Change-feed management for the synchronized store.
//!
//! The store watches at most two feeds:
//! - the agent row it is keyed on
//! - the organization that agent points at, once it is known
//!
//! Feeds are scoped when opened and cannot be re-scoped, so any change of
//! scoping id closes the old feed and opens a new one.

mod manager;
mod types;

pub use manager::{FeedManager, DEFAULT_FEED_BUFFER};
pub use types::{FeedKey, FeedKind, FeedNotice, FeedPhase};
