//! Core types for the synchronization core.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw row as returned by the data service.
pub type Row = serde_json::Map<String, serde_json::Value>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }
    };
}

string_id! {
    /// Identifier of an agent (the root entity).
    AgentId
}

string_id! {
    /// Identifier of an organization (the related entity).
    OrganizationId
}

string_id! {
    /// Identifier of an authenticated user.
    UserId
}

/// Tables this crate reads from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Agents,
    Organizations,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Agents => "agents",
            Table::Organizations => "organizations",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns of an `agents` row that the resolver reads.
#[derive(Clone, Debug, Deserialize)]
pub struct AgentRow {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub greeting: Option<String>,
}

impl AgentRow {
    /// Decode from a service row.
    pub fn from_row(row: Row) -> crate::Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(row))?)
    }
}

/// Columns of an `organizations` row that the resolver reads.
#[derive(Clone, Debug, Deserialize)]
pub struct OrganizationRow {
    pub id: OrganizationId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

impl OrganizationRow {
    /// Decode from a service row.
    pub fn from_row(row: Row) -> crate::Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(row))?)
    }
}

/// Reference to the user owning an organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: UserId,
}

/// Organization snapshot nested inside an [`AgentView`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationView {
    pub id: OrganizationId,
    /// None until the organization row has a name.
    pub name: Option<String>,
    pub owner: Option<OwnerRef>,
}

impl From<OrganizationRow> for OrganizationView {
    fn from(row: OrganizationRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            owner: row.owner_id.map(|id| OwnerRef { id }),
        }
    }
}

/// The composite view of an agent and its organization.
///
/// Always rebuilt wholesale from a resolution; never patched field by field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentView {
    pub id: AgentId,
    pub name: String,
    pub greeting: Option<String>,
    /// None when the agent has no organization, or the organization is not
    /// visible to the current principal.
    pub organization: Option<OrganizationView>,
}

impl AgentView {
    /// Build a view from an agent row and an already resolved organization.
    pub fn from_parts(agent: AgentRow, organization: Option<OrganizationView>) -> Self {
        Self {
            id: agent.id,
            name: agent.name,
            greeting: agent.greeting,
            organization,
        }
    }

    /// Identifier of the resolved organization, if any.
    pub fn organization_id(&self) -> Option<&OrganizationId> {
        self.organization.as_ref().map(|org| &org.id)
    }
}
