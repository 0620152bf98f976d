//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Engine              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  SyncInProgress         │ │
//! │  │  ConfigLoad     │  │  Timeout        │  │  Offline                │ │
//! │  │  ConfigSave     │  │  ServerError    │  │  Queue (CoreError)      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────┐                          │
//! │  │    Database     │  │    Scan Sessions    │                          │
//! │  │                 │  │                     │                          │
//! │  │  DatabaseError  │  │  ScanSessionNotFound│                          │
//! │  └─────────────────┘  └─────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A transport error returned from `OperationApplier::apply` never aborts a
//! drain. The engine records its message on the operation and moves on.

use stockzip_core::CoreError;
use stockzip_store::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors (raised by appliers and probes)
    // =========================================================================
    /// Could not reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out.
    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    /// Server answered with an error.
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// A drain is already running on this engine.
    #[error("Sync already in progress")]
    SyncInProgress,

    /// Sync was requested while the device is offline.
    #[error("Cannot sync while offline")]
    Offline,

    /// Queue lifecycle violation.
    #[error("Queue error: {0}")]
    Queue(#[from] CoreError),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Persistence failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Scan Session Errors
    // =========================================================================
    /// No scan session with this id is stored.
    #[error("Scan session not found: {0}")]
    ScanSessionNotFound(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if trying again later may succeed.
    ///
    /// ## Retryable Errors
    /// - Connection failures and timeouts
    /// - 5xx server errors and 429
    /// - Being offline, or racing another drain
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - 4xx rejections
    /// - Queue lifecycle violations and missing scan sessions
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::Offline
            | SyncError::SyncInProgress => true,
            SyncError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
