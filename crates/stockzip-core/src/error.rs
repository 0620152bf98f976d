//! # Error Types
//!
//! Domain-specific error types for stockzip-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  stockzip-core errors (this file)                                      │
//! │  ├── CoreError        - Queue and scan session lifecycle violations    │
//! │  └── ValidationError  - Unparseable stored values                      │
//! │                                                                         │
//! │  stockzip-store errors (separate crate)                                │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  stockzip-sync errors (separate crate)                                 │
//! │  └── SyncError        - Drain, probe and config failures               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError / SyncError → UI layer    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport failures for a single operation are NOT errors here. They are
//! recorded on the operation itself (`retry_count`, `last_error`, `status`).

use thiserror::Error;

use crate::types::OperationStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Mutation queue and scan session errors.
///
/// Every variant is a programming error on the caller's side: asking the
/// queue to move an operation along an edge its lifecycle does not have, or
/// writing to a session that is already closed.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No operation with this id is queued.
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// The requested status change is not an edge of the lifecycle.
    ///
    /// ## Allowed Edges
    /// ```text
    /// pending ──► syncing ──► completed
    ///    ▲           │
    ///    │           ├──► pending (retry scheduled)
    ///    │           └──► failed
    ///    └──── failed (manual reset)
    /// ```
    #[error("Operation {operation_id} is {from}, cannot move to {to}")]
    InvalidTransition {
        operation_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Scans were recorded against a session that has been completed.
    #[error("Scan session {0} is already completed")]
    SessionCompleted(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Value validation errors.
///
/// Raised when text coming from storage or configuration does not map onto
/// one of the queue's closed enums.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g., unparseable payload JSON).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    pub(crate) fn not_allowed(field: &str, allowed: &[&str]) -> Self {
        ValidationError::NotAllowed {
            field: field.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = CoreError::InvalidTransition {
            operation_id: "op-1".to_string(),
            from: OperationStatus::Completed,
            to: OperationStatus::Syncing,
        };
        assert_eq!(
            err.to_string(),
            "Operation op-1 is completed, cannot move to syncing"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "entity_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
