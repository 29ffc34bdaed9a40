//! Synchronized store tying the resolver and the feeds together.

use crate::error::{Result, SyncError};
use crate::feeds::{FeedKey, FeedManager, FeedNotice, DEFAULT_FEED_BUFFER};
use crate::resolver::Resolver;
use crate::service::{DataService, PrincipalSource};
use crate::types::{AgentId, AgentView, OrganizationId};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Max buffered events per feed before the service drops it.
    pub feed_buffer_size: usize,

    /// Minimum spacing between two agent renames.
    pub min_update_interval: Duration,

    /// Max agent name length, in characters.
    pub max_name_len: usize,

    /// Wait before retrying a lost feed that could not be re-opened.
    pub reconnect_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            feed_buffer_size: DEFAULT_FEED_BUFFER,
            min_update_interval: Duration::from_secs(1),
            max_name_len: 100,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// What a consumer renders: the current view and whether a load is pending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub view: Option<AgentView>,
    pub loading: bool,
}

struct StoreState {
    /// Agent most recently requested via `set_root_id`.
    target: Option<AgentId>,
    /// Ticket of the request that chose `target`.
    target_ticket: u64,
    /// Last ticket handed out. Tickets order requests by issuance.
    next_ticket: u64,
    /// Ticket whose result is currently held.
    applied_ticket: u64,
    view: Option<AgentView>,
    loading: bool,
    /// Set by `close`; the store takes no further requests.
    closed: bool,
}

impl StoreState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SyncError::InvalidOperation("store is closed".to_string()));
        }
        Ok(())
    }

    fn issue(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// The `(agent, organization)` pair the feeds should be scoped to.
    ///
    /// The organization comes from the held view only when that view belongs
    /// to the target; after a failed switch the old agent's organization must
    /// not be watched on behalf of the new one.
    fn feed_scope(&self) -> Option<(AgentId, Option<OrganizationId>)> {
        let target = self.target.clone()?;
        let organization = self
            .view
            .as_ref()
            .filter(|view| view.id == target)
            .and_then(|view| view.organization_id().cloned());
        Some((target, organization))
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            view: self.view.clone(),
            loading: self.loading,
        }
    }
}

struct StoreInner {
    config: SyncConfig,
    principal: Arc<dyn PrincipalSource>,
    resolver: Resolver,
    state: RwLock<StoreState>,
    snapshots: watch::Sender<StoreSnapshot>,
    feeds: Mutex<FeedManager>,
}

/// Holds one agent view and keeps it in sync with the data service.
///
/// Requests are ordered by issuance: a resolution that lands after a newer
/// request was made for a different agent is dropped, and an older refresh
/// never overwrites a newer one.
pub struct SyncedStore {
    inner: Arc<StoreInner>,
    listener: JoinHandle<()>,
}

impl SyncedStore {
    /// Create a store. Must be called from within a tokio runtime.
    pub fn new(
        service: Arc<dyn DataService>,
        principal: Arc<dyn PrincipalSource>,
        config: SyncConfig,
    ) -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (snapshots, _) = watch::channel(StoreSnapshot::default());

        let feeds = FeedManager::new(service.clone(), notices_tx, config.feed_buffer_size);
        let inner = Arc::new(StoreInner {
            config,
            principal,
            resolver: Resolver::new(service),
            state: RwLock::new(StoreState {
                target: None,
                target_ticket: 0,
                next_ticket: 0,
                applied_ticket: 0,
                view: None,
                loading: false,
                closed: false,
            }),
            snapshots,
            feeds: Mutex::new(feeds),
        });

        let listener = tokio::spawn(listen(Arc::downgrade(&inner), notices_rx));
        Self { inner, listener }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// The held view, if any.
    pub fn current_view(&self) -> Option<AgentView> {
        self.inner.state.read().view.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().loading
    }

    /// Agent most recently requested.
    pub fn root_id(&self) -> Option<AgentId> {
        self.inner.state.read().target.clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Keys of the feeds currently armed.
    pub async fn active_feeds(&self) -> Vec<FeedKey> {
        self.inner.feeds.lock().await.active_keys()
    }

    /// Switch the store to `id`: resolve it, hold the result and re-scope
    /// the feeds.
    ///
    /// On a service failure the last view is kept, loading is cleared and the
    /// error is returned.
    pub async fn set_root_id(&self, id: impl Into<AgentId>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(SyncError::InvalidOperation(
                "agent id must not be empty".to_string(),
            ));
        }
        let ticket = {
            let mut state = self.inner.state.write();
            state.ensure_open()?;
            let ticket = state.issue();
            state.target = Some(id.clone());
            state.target_ticket = ticket;
            state.loading = true;
            self.inner.snapshots.send_replace(state.snapshot());
            ticket
        };
        info!(agent = %id, ticket, "selecting agent");

        let outcome = self.inner.resolve(&id).await;
        match self.inner.complete(ticket, ticket, outcome, true) {
            Ok(true) => self.inner.arm_feeds(ticket).await,
            Ok(false) => Ok(()),
            Err(e) => {
                // Feeds scoped to the previous agent must not outlive the switch.
                if let Err(arm_err) = self.inner.arm_feeds(ticket).await {
                    debug!(agent = %id, error = %arm_err, "could not arm feeds after failed load");
                }
                Err(e)
            }
        }
    }

    /// Re-resolve the current agent in the background.
    ///
    /// Never sets the loading flag. A no-op before any agent is selected.
    pub async fn refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// Replace the held view without a resolution, e.g. with the row an
    /// update returned. The view must belong to the selected agent.
    pub fn replace_view(&self, view: AgentView) -> Result<()> {
        let mut state = self.inner.state.write();
        if state.target.as_ref() != Some(&view.id) {
            return Err(SyncError::InvalidOperation(format!(
                "view for {} does not match the selected agent",
                view.id
            )));
        }
        let ticket = state.issue();
        state.applied_ticket = ticket;
        state.view = Some(view);
        self.inner.snapshots.send_replace(state.snapshot());
        Ok(())
    }

    /// Release the feeds and stop reacting to notifications.
    ///
    /// Resolutions still in flight are discarded when they land. Later
    /// `set_root_id` and `refresh` calls fail with `InvalidOperation`.
    pub async fn close(&self) {
        self.inner.shutdown().await;
        self.listener.abort();
        debug!("store closed");
    }
}

impl Drop for SyncedStore {
    fn drop(&mut self) {
        self.listener.abort();
        if self.inner.state.read().closed {
            return;
        }
        // Feeds hold a service slot until unsubscribed.
        match Handle::try_current() {
            Ok(handle) => {
                let inner = self.inner.clone();
                handle.spawn(async move { inner.shutdown().await });
            }
            Err(_) => warn!("store dropped outside a runtime, feeds not released"),
        }
    }
}

impl StoreInner {
    async fn resolve(&self, id: &AgentId) -> Result<Option<AgentView>> {
        let principal = self.principal.current_principal_id().await;
        self.resolver.resolve(id, principal.as_ref()).await
    }

    async fn refresh(&self) -> Result<()> {
        let (target, target_ticket, ticket) = {
            let mut state = self.state.write();
            state.ensure_open()?;
            let Some(target) = state.target.clone() else {
                return Ok(());
            };
            let ticket = state.issue();
            (target, state.target_ticket, ticket)
        };
        debug!(agent = %target, ticket, "refreshing");

        let outcome = self.resolve(&target).await;
        if self.complete(ticket, target_ticket, outcome, false)? {
            self.arm_feeds(target_ticket).await?;
        }
        Ok(())
    }

    /// Fold a finished resolution into the state.
    ///
    /// Returns `Ok(false)` when the target changed since the request was
    /// issued; nothing is touched in that case.
    fn complete(
        &self,
        ticket: u64,
        target_ticket: u64,
        outcome: Result<Option<AgentView>>,
        clears_loading: bool,
    ) -> Result<bool> {
        let mut state = self.state.write();
        if state.target_ticket != target_ticket {
            debug!(ticket, "discarding resolution for superseded agent");
            return Ok(false);
        }
        if clears_loading {
            state.loading = false;
        }

        let result = match outcome {
            Ok(view) if ticket > state.applied_ticket => {
                state.applied_ticket = ticket;
                state.view = view;
                Ok(true)
            }
            Ok(_) => {
                debug!(ticket, applied = state.applied_ticket, "discarding out-of-order resolution");
                Ok(true)
            }
            Err(e) => {
                warn!(ticket, error = %e, "resolution failed, keeping last view");
                Err(e)
            }
        };
        self.snapshots.send_replace(state.snapshot());
        result
    }

    /// Scope the feeds to the current state, unless `target_ticket` has been
    /// superseded meanwhile.
    async fn arm_feeds(&self, target_ticket: u64) -> Result<()> {
        let mut feeds = self.feeds.lock().await;
        let scope = {
            let state = self.state.read();
            if state.target_ticket != target_ticket {
                return Ok(());
            }
            state.feed_scope()
        };

        match scope {
            Some((agent, organization)) => feeds.arm(&agent, organization.as_ref()).await,
            None => {
                feeds.disarm().await;
                Ok(())
            }
        }
    }

    /// Close the store: drop the target and release both feeds.
    async fn shutdown(&self) {
        let mut feeds = self.feeds.lock().await;
        {
            let mut state = self.state.write();
            let ticket = state.issue();
            state.closed = true;
            state.target = None;
            state.target_ticket = ticket;
            state.loading = false;
            self.snapshots.send_replace(state.snapshot());
        }
        feeds.disarm().await;
    }

    async fn handle_notice(&self, notice: FeedNotice) {
        match notice {
            FeedNotice::Changed { key } => {
                if !self.feeds.lock().await.is_active(&key) {
                    debug!(feed = %key, "ignoring change on stale feed");
                    return;
                }
                debug!(feed = %key, "change notification");
                if let Err(e) = self.refresh().await {
                    warn!(feed = %key, error = %e, "refresh after change failed");
                }
            }
            FeedNotice::Lost { key, reason } => {
                warn!(feed = %key, %reason, "feed lost");
                self.reconnect(&key).await;
            }
            FeedNotice::Retry { key } => {
                if !self.feeds.lock().await.is_lost(&key) {
                    debug!(feed = %key, "feed no longer waiting for retry");
                    return;
                }
                self.reconnect(&key).await;
            }
        }
    }

    /// Re-open a lost feed, then refresh since changes may have been missed.
    /// A failed attempt is retried after `reconnect_delay`.
    async fn reconnect(&self, key: &FeedKey) {
        let reconnected = {
            let mut feeds = self.feeds.lock().await;
            let reconnected = feeds.reconnect(key).await;
            if reconnected.is_err() {
                feeds.schedule_reconnect(key.clone(), self.config.reconnect_delay);
            }
            reconnected
        };
        match reconnected {
            Ok(true) => {
                if let Err(e) = self.refresh().await {
                    warn!(feed = %key, error = %e, "refresh after reconnect failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(
                error = %e,
                retry_in = ?self.config.reconnect_delay,
                "could not re-arm feed"
            ),
        }
    }
}

/// Process feed notices one at a time until the store goes away.
async fn listen(inner: Weak<StoreInner>, mut notices: mpsc::UnboundedReceiver<FeedNotice>) {
    while let Some(notice) = notices.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_notice(notice).await;
    }
}
