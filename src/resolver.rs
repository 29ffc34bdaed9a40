//! Resolution of an agent id into an [`AgentView`].

use crate::error::{Result, SyncError};
use crate::service::{DataService, PointQuery};
use crate::types::{
    AgentId, AgentRow, AgentView, OrganizationId, OrganizationRow, OrganizationView, Table, UserId,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads an agent and the organization it points at.
///
/// Resolution has no side effects. Absence is not an error: a missing agent
/// resolves to `None`, a missing or unowned organization to a view without
/// one. Only failures of the agent read, or an agent row that does not
/// decode, are returned as errors.
pub struct Resolver {
    service: Arc<dyn DataService>,
}

impl Resolver {
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self { service }
    }

    /// Resolve `agent_id` as seen by `principal`.
    pub async fn resolve(
        &self,
        agent_id: &AgentId,
        principal: Option<&UserId>,
    ) -> Result<Option<AgentView>> {
        if agent_id.is_empty() {
            return Err(SyncError::InvalidOperation(
                "agent id must not be empty".to_string(),
            ));
        }

        let query = PointQuery::by_id(Table::Agents, agent_id.as_str());
        let row = match self.service.read(&query).await {
            Ok(row) => row,
            Err(e) if e.is_absent() => {
                debug!(agent = %agent_id, "agent not visible");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let agent = AgentRow::from_row(row)?;

        let organization = match &agent.organization_id {
            Some(org_id) => self.resolve_organization(org_id, principal).await,
            None => None,
        };

        Ok(Some(AgentView::from_parts(agent, organization)))
    }

    async fn resolve_organization(
        &self,
        org_id: &OrganizationId,
        principal: Option<&UserId>,
    ) -> Option<OrganizationView> {
        let Some(principal) = principal else {
            debug!(organization = %org_id, "no principal, skipping organization");
            return None;
        };

        let query = PointQuery::by_id(Table::Organizations, org_id.as_str()).owned_by(principal);
        let row = match self.service.read(&query).await {
            Ok(row) => row,
            Err(e) if e.is_absent() => {
                debug!(organization = %org_id, principal = %principal, "organization not visible");
                return None;
            }
            Err(e) => {
                warn!(organization = %org_id, error = %e, "organization read failed");
                return None;
            }
        };

        match OrganizationRow::from_row(row) {
            Ok(org) => Some(org.into()),
            Err(e) => {
                warn!(organization = %org_id, error = %e, "undecodable organization row");
                None
            }
        }
    }
}
