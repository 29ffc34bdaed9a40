//! Feed manager: keeps the agent and organization feeds scoped to the
//! current `(agent, organization)` pair.

use crate::error::{Result, SyncError};
use crate::service::{DataService, DropReason, FeedEvent, FeedId, FeedSpec};
use crate::types::{AgentId, OrganizationId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{FeedKey, FeedKind, FeedNotice, FeedPhase};

/// Default per-feed buffer (events).
pub const DEFAULT_FEED_BUFFER: usize = 64;

/// A subscribed feed and the task forwarding its events.
struct ActiveFeed {
    key: FeedKey,
    id: FeedId,
    forwarder: JoinHandle<()>,
}

enum FeedSlot {
    Absent,
    /// Subscribe call in flight. Only observable if an `arm` future was
    /// dropped mid-call; such a slot is treated as absent.
    Subscribing,
    Active(ActiveFeed),
    /// Connection dropped and re-opening failed; still scoped to the key.
    Lost(FeedKey),
}

impl FeedSlot {
    fn active_key(&self) -> Option<&FeedKey> {
        match self {
            FeedSlot::Active(feed) => Some(&feed.key),
            _ => None,
        }
    }

    /// Key the slot is scoped to, whether or not it is connected.
    fn scoped_key(&self) -> Option<&FeedKey> {
        match self {
            FeedSlot::Active(feed) => Some(&feed.key),
            FeedSlot::Lost(key) => Some(key),
            _ => None,
        }
    }

    fn phase(&self) -> FeedPhase {
        match self {
            FeedSlot::Absent => FeedPhase::Absent,
            FeedSlot::Subscribing => FeedPhase::Subscribing,
            FeedSlot::Active(_) => FeedPhase::Active,
            FeedSlot::Lost(_) => FeedPhase::Lost,
        }
    }
}

/// Owns the agent feed and the organization feed.
///
/// Every event from either feed is reported as a single [`FeedNotice`] on the
/// channel given at construction.
pub struct FeedManager {
    service: Arc<dyn DataService>,
    notices: mpsc::UnboundedSender<FeedNotice>,
    buffer_size: usize,
    agent: FeedSlot,
    organization: FeedSlot,
}

impl FeedManager {
    pub fn new(
        service: Arc<dyn DataService>,
        notices: mpsc::UnboundedSender<FeedNotice>,
        buffer_size: usize,
    ) -> Self {
        Self {
            service,
            notices,
            buffer_size,
            agent: FeedSlot::Absent,
            organization: FeedSlot::Absent,
        }
    }

    /// Scope the feeds to `(agent, organization)`.
    ///
    /// Feeds already scoped correctly are left alone. A different agent tears
    /// down both feeds before anything is opened; a different organization
    /// only replaces the organization feed.
    pub async fn arm(
        &mut self,
        agent: &AgentId,
        organization: Option<&OrganizationId>,
    ) -> Result<()> {
        let agent_key = FeedKey::agent(agent);
        let org_key = organization.map(FeedKey::organization);

        if self.agent.scoped_key() != Some(&agent_key) {
            self.disarm().await;
        } else if self.organization.scoped_key() != org_key.as_ref() {
            self.release(FeedKind::Organization).await;
        }

        if self.agent.active_key().is_none() {
            self.open(FeedKind::Agent, agent_key).await?;
        }
        if let Some(key) = org_key {
            if self.organization.active_key().is_none() {
                self.open(FeedKind::Organization, key).await?;
            }
        }
        Ok(())
    }

    /// Release both feeds. A no-op when nothing is armed.
    pub async fn disarm(&mut self) {
        self.release(FeedKind::Organization).await;
        self.release(FeedKind::Agent).await;
    }

    /// Re-open a feed whose connection was lost.
    ///
    /// Returns `Ok(false)` when `key` is no longer the current scope of its
    /// slot; the notice is stale and nothing is done. On failure the slot
    /// stays scoped to `key` in the [`FeedPhase::Lost`] phase, so a later
    /// `reconnect` or `arm` picks it up again.
    pub async fn reconnect(&mut self, key: &FeedKey) -> Result<bool> {
        let kind = key.kind();
        if self.slot(kind).scoped_key() != Some(key) {
            debug!(feed = %key, "ignoring loss of stale feed");
            return Ok(false);
        }

        self.release(kind).await;
        if let Err(e) = self.open(kind, key.clone()).await {
            *self.slot_mut(kind) = FeedSlot::Lost(key.clone());
            return Err(SyncError::SubscriptionLost(format!("{key}: {e}")));
        }
        Ok(true)
    }

    /// Send a [`FeedNotice::Retry`] for `key` after `delay`.
    pub fn schedule_reconnect(&self, key: FeedKey, delay: Duration) {
        let notices = self.notices.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = notices.send(FeedNotice::Retry { key });
        });
    }

    /// True while `key`'s slot is waiting to be re-opened.
    pub fn is_lost(&self, key: &FeedKey) -> bool {
        matches!(self.slot(key.kind()), FeedSlot::Lost(lost) if lost == key)
    }

    pub fn phase(&self, kind: FeedKind) -> FeedPhase {
        self.slot(kind).phase()
    }

    /// Service id of the feed in `kind`'s slot, if active.
    pub fn feed_id(&self, kind: FeedKind) -> Option<FeedId> {
        match self.slot(kind) {
            FeedSlot::Active(feed) => Some(feed.id),
            _ => None,
        }
    }

    pub fn is_active(&self, key: &FeedKey) -> bool {
        self.slot(key.kind()).active_key() == Some(key)
    }

    /// Keys of all active feeds, agent first.
    pub fn active_keys(&self) -> Vec<FeedKey> {
        [&self.agent, &self.organization]
            .into_iter()
            .filter_map(|slot| slot.active_key().cloned())
            .collect()
    }

    fn slot(&self, kind: FeedKind) -> &FeedSlot {
        match kind {
            FeedKind::Agent => &self.agent,
            FeedKind::Organization => &self.organization,
        }
    }

    fn slot_mut(&mut self, kind: FeedKind) -> &mut FeedSlot {
        match kind {
            FeedKind::Agent => &mut self.agent,
            FeedKind::Organization => &mut self.organization,
        }
    }

    async fn open(&mut self, kind: FeedKind, key: FeedKey) -> Result<()> {
        *self.slot_mut(kind) = FeedSlot::Subscribing;

        let spec = FeedSpec {
            channel: key.channel_name(),
            table: key.table,
            filter: key.filter.clone(),
            buffer_size: self.buffer_size,
        };
        match self.service.subscribe(spec).await {
            Ok(subscription) => {
                info!(feed = %key, id = %subscription.id, "feed armed");
                let forwarder = tokio::spawn(forward(
                    key.clone(),
                    subscription.receiver,
                    self.notices.clone(),
                ));
                *self.slot_mut(kind) = FeedSlot::Active(ActiveFeed {
                    key,
                    id: subscription.id,
                    forwarder,
                });
                Ok(())
            }
            Err(e) => {
                warn!(feed = %key, error = %e, "failed to arm feed");
                *self.slot_mut(kind) = FeedSlot::Absent;
                Err(e)
            }
        }
    }

    async fn release(&mut self, kind: FeedKind) {
        let slot = std::mem::replace(self.slot_mut(kind), FeedSlot::Absent);
        if let FeedSlot::Active(feed) = slot {
            feed.forwarder.abort();
            match self.service.unsubscribe(feed.id).await {
                Ok(()) => debug!(feed = %feed.key, id = %feed.id, "feed released"),
                Err(e) => warn!(feed = %feed.key, error = %e, "failed to release feed"),
            }
        }
    }
}

impl Drop for FeedManager {
    fn drop(&mut self) {
        for slot in [&self.agent, &self.organization] {
            if let FeedSlot::Active(feed) = slot {
                feed.forwarder.abort();
            }
        }
    }
}

/// Turn feed events into notices until the feed ends.
async fn forward(
    key: FeedKey,
    mut receiver: mpsc::Receiver<FeedEvent>,
    notices: mpsc::UnboundedSender<FeedNotice>,
) {
    loop {
        match receiver.recv().await {
            Some(FeedEvent::Change { .. }) => {
                if notices.send(FeedNotice::Changed { key: key.clone() }).is_err() {
                    return;
                }
            }
            Some(FeedEvent::Dropped {
                reason: DropReason::Unsubscribed,
            }) => return,
            Some(FeedEvent::Dropped { reason }) => {
                let _ = notices.send(FeedNotice::Lost { key, reason });
                return;
            }
            None => {
                let _ = notices.send(FeedNotice::Lost {
                    key,
                    reason: DropReason::Disconnected,
                });
                return;
            }
        }
    }
}
