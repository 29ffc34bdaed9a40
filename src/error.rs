//! Error types for the synchronization core.

use crate::types::Table;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Record not found: {table}/{id}")]
    NotFound { table: Table, id: String },

    #[error("Access denied: {table}/{id}")]
    AccessDenied { table: Table, id: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    /// True for errors that mean "no such row as far as the caller can tell".
    ///
    /// Denied reads are folded into absence so callers cannot probe for rows
    /// they are not allowed to see.
    pub fn is_absent(&self) -> bool {
        matches!(self, SyncError::NotFound { .. } | SyncError::AccessDenied { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Deserialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
