//! Error types for MeterBill
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;
use uuid::Uuid;

use crate::types::reading::{ReadingStatus, Transition};

/// Result type alias using MeterBillError
pub type Result<T> = std::result::Result<T, MeterBillError>;

/// Unified error type for MeterBill operations
#[derive(Debug, Error)]
pub enum MeterBillError {
    // Bad or missing caller input
    #[error("Validation error: {0}")]
    Validation(String),

    // Lifecycle operation attempted from the wrong state
    #[error("Cannot {action} reading {reading_id}: reading is {from}")]
    InvalidTransition {
        reading_id: Uuid,
        from: ReadingStatus,
        action: Transition,
    },

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    // Store or settings collaborator failed
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeterBillError {
    /// Whether a transport layer may retry the failed request as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeterBillError::Dependency(_))
    }

    /// Short machine-readable kind, used for metrics labels and API payloads
    pub fn kind(&self) -> &'static str {
        match self {
            MeterBillError::Validation(_) => "validation",
            MeterBillError::InvalidTransition { .. } => "invalid_transition",
            MeterBillError::NotFound(_) => "not_found",
            MeterBillError::Dependency(_) => "dependency",
            MeterBillError::Serialization(_) => "serialization",
            MeterBillError::Internal(_) => "internal",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MeterBillError::Validation(msg.into())
    }
}

/// Unknown identifiers
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("reading {0}")]
    Reading(Uuid),

    #[error("flat {0}")]
    Flat(String),
}

/// Collaborator failures. All of these are retryable by the caller.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    #[error("concurrent write on reading {reading_id}: expected version {expected}, found {actual}")]
    Conflict {
        reading_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for MeterBillError {
    fn from(err: serde_json::Error) -> Self {
        MeterBillError::Serialization(err.to_string())
    }
}
