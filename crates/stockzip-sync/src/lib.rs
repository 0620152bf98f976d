//! # stockzip-sync: Sync Engine for StockZip Offline
//!
//! The async half of offline mode. Mutations recorded in the
//! [`stockzip_core::MutationQueue`] are pushed to the server through an
//! injected [`OperationApplier`], one pass at a time, with a bounded retry
//! budget per operation.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Offline Sync Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                OfflineSyncAgent (orchestrator)                    │  │
//! │  │                                                                  │  │
//! │  │  Write-through persistence, status, background tasks             │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  SyncEngine    │  │ OnlineStatus   │  │  AutoSync              │    │
//! │  │                │  │ Monitor        │  │                        │    │
//! │  │ Sequential     │  │ Periodic probe │  │ Drains 2s after the    │    │
//! │  │ drain, retry   │  │ + transition   │  │ device reconnects      │    │
//! │  │ bookkeeping    │  │ subscribers    │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  INJECTED BY THE CALLER:                                               │
//! │  • OperationApplier  - sends one operation, Ok(true) when applied      │
//! │  • ConnectivityProbe - Ok(true) when the server is reachable           │
//! │  • SyncEventEmitter  - online/offline, progress and error events       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `OfflineSyncAgent` orchestrator and event emitter trait
//! - [`applier`] - Transport seams (`OperationApplier`, `ConnectivityProbe`)
//! - [`auto_sync`] - Reconnect-triggered drain task
//! - [`config`] - Offline configuration (TOML + environment)
//! - [`engine`] - `SyncEngine` drain loop
//! - [`error`] - Sync error types
//! - [`monitor`] - `OnlineStatusMonitor`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockzip_store::Database;
//! use stockzip_sync::{OfflineConfig, OfflineSyncAgent};
//!
//! let config = OfflineConfig::load_or_default(None);
//! let db = Database::new(config.db_config()).await?;
//! let agent = Arc::new(OfflineSyncAgent::open(config, db).await?);
//!
//! let _probe = agent.start_probing(Arc::new(|| async { api.ping().await }));
//! let _auto = agent.start_auto_sync(Arc::new(|op| async move { api.apply(op).await }));
//!
//! agent.adjust_quantity("item-42", -1).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod applier;
pub mod auto_sync;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    connectivity_event, NoOpEmitter, OfflineSyncAgent, SyncEventEmitter, SyncStatus,
    OFFLINE_EVENT, ONLINE_EVENT, QUANTITY_FIELD,
};
pub use applier::{ConnectivityProbe, OperationApplier};
pub use auto_sync::{AutoSync, AutoSyncHandle, EngineTarget, SyncTarget, DEFAULT_AUTO_SYNC_DELAY};
pub use config::OfflineConfig;
pub use engine::{RetryReport, SharedQueue, SyncEngine, SyncReport, REJECTED_BY_SERVER};
pub use error::{SyncError, SyncResult};
pub use monitor::{OnlineStatusMonitor, ProbeHandle, Subscription};

/// Default seconds between connectivity probes.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
