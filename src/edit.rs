//! Targeted edits of the selected agent.

use crate::error::{Result, SyncError};
use crate::service::DataService;
use crate::store::{SyncConfig, SyncedStore};
use crate::types::{AgentRow, AgentView, Row, Table};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result of an edit request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// The service accepted the update; the store now holds this view.
    Updated(AgentView),
    /// The value already matched; nothing was sent.
    Unchanged,
    /// Too soon after the previous rename; nothing was sent.
    Throttled,
}

/// Writes agent fields and feeds the returned row back into a store.
pub struct AgentEditor {
    service: Arc<dyn DataService>,
    min_update_interval: Duration,
    max_name_len: usize,
    last_rename: Mutex<Option<Instant>>,
}

impl AgentEditor {
    pub fn new(service: Arc<dyn DataService>, config: &SyncConfig) -> Self {
        Self {
            service,
            min_update_interval: config.min_update_interval,
            max_name_len: config.max_name_len,
            last_rename: Mutex::new(None),
        }
    }

    /// Trim and check an agent name.
    pub fn validate_name(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Validation("Name is required".to_string()));
        }
        if name.chars().count() > self.max_name_len {
            return Err(SyncError::Validation("Name is too long".to_string()));
        }
        Ok(name.to_string())
    }

    /// Rename the agent selected in `store`.
    ///
    /// Renames closer together than `min_update_interval` are throttled.
    pub async fn rename(&self, store: &SyncedStore, name: &str) -> Result<EditOutcome> {
        let name = self.validate_name(name)?;
        let view = selected(store)?;
        if view.name == name {
            return Ok(EditOutcome::Unchanged);
        }
        if !self.begin_rename() {
            debug!(agent = %view.id, "rename throttled");
            return Ok(EditOutcome::Throttled);
        }

        let mut fields = Row::new();
        fields.insert("name".to_string(), Value::String(name));
        self.apply(store, view, fields).await
    }

    /// Set the greeting the agent answers calls with. Never throttled.
    pub async fn set_greeting(&self, store: &SyncedStore, greeting: &str) -> Result<EditOutcome> {
        let view = selected(store)?;
        if view.greeting.as_deref() == Some(greeting) {
            return Ok(EditOutcome::Unchanged);
        }

        let mut fields = Row::new();
        fields.insert("greeting".to_string(), Value::String(greeting.to_string()));
        self.apply(store, view, fields).await
    }

    /// Claim the rename slot. False if the previous rename was too recent.
    fn begin_rename(&self) -> bool {
        let mut last = self.last_rename.lock();
        let now = Instant::now();
        if let Some(previous) = *last {
            if now.duration_since(previous) < self.min_update_interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    async fn apply(&self, store: &SyncedStore, view: AgentView, fields: Row) -> Result<EditOutcome> {
        let row = self
            .service
            .update(Table::Agents, view.id.as_str(), fields)
            .await?;
        let agent = AgentRow::from_row(row)?;

        // Keep the resolved organization while the foreign key is unchanged;
        // the feed notification for this update re-resolves it anyway.
        let organization = view
            .organization
            .filter(|org| agent.organization_id.as_ref() == Some(&org.id));
        let updated = AgentView::from_parts(agent, organization);
        info!(agent = %updated.id, "agent updated");

        if let Err(e) = store.replace_view(updated.clone()) {
            debug!(error = %e, "selection changed during edit");
        }
        Ok(EditOutcome::Updated(updated))
    }
}

fn selected(store: &SyncedStore) -> Result<AgentView> {
    store
        .current_view()
        .ok_or_else(|| SyncError::InvalidOperation("no agent selected".to_string()))
}
