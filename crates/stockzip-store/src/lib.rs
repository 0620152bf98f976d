//! # stockzip-store: Database Layer for StockZip Offline
//!
//! Local SQLite persistence for the offline mutation queue. It uses sqlx
//! for async access and embeds its migrations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      StockZip Offline Data Flow                         │
//! │                                                                         │
//! │  OfflineSyncAgent (stockzip-sync)                                      │
//! │       │  save_snapshot / load_snapshot / sync_metadata                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockzip-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐   ┌───────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │   │Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                    │   │(embedded) │  │   │
//! │  │   │               │    │ PendingOperation   │   │           │  │   │
//! │  │   │ SqlitePool    │◄───│ CachedEntity       │   │ 001_...   │  │   │
//! │  │   │               │    │ SyncMetadata       │   │ 002_...   │  │   │
//! │  │   │               │    │ ScanSession        │   │           │  │   │
//! │  │   └───────────────┘    └────────────────────┘   └───────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │        <data dir>/stockzip/offline.db  (or :memory:)            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool and snapshot boundary
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Table repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockzip_store::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("offline.db")).await?;
//! db.save_snapshot(&queue.snapshot()).await?;
//! let restored = db.load_snapshot().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::entities::CachedEntityRepository;
pub use repository::metadata::{
    SyncMetadataRepository, LAST_CACHE_SYNC, LAST_SUCCESSFUL_SYNC, LAST_SYNC_ERROR,
};
pub use repository::operations::PendingOperationRepository;
pub use repository::scan_sessions::ScanSessionRepository;
