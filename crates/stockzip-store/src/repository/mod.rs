//! # Repository Module
//!
//! Table-level access for the offline store.
//!
//! ## Tables
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Store Tables                             │
//! │                                                                         │
//! │  pending_changes   ◄── PendingOperationRepository                      │
//! │  ├── one row per QueuedOperation                                       │
//! │  └── payload as tagged JSON                                            │
//! │                                                                         │
//! │  cached_items      ◄── CachedEntityRepository                          │
//! │  ├── one row per CachedEntity                                          │
//! │  └── barcode / sku columns mirrored from fields for lookups            │
//! │                                                                         │
//! │  sync_metadata     ◄── SyncMetadataRepository                          │
//! │  └── key/value: last_successful_sync, last_cache_sync, ...             │
//! │                                                                         │
//! │  scan_sessions     ◄── ScanSessionRepository                           │
//! │  └── one row per ScanSession, scans as a JSON array                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Queries use runtime-checked `sqlx::query` with `FromRow` row structs, and
//! each row struct converts into its domain type with `TryFrom`.

pub mod entities;
pub mod metadata;
pub mod operations;
pub mod scan_sessions;
