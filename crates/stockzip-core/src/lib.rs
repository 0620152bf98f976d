//! # stockzip-core: Offline Queue Logic for StockZip
//!
//! The pure half of StockZip's offline mode: the operation model, the
//! optimistic local mirror and the mutation queue. Nothing in here touches a
//! socket, a file or a clock other than `Utc::now()` for enqueue timestamps.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      StockZip Offline Architecture                      │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI / Scanner Layer                           │   │
//! │  │    scan ──► lookup ──► adjust quantity ──► badge "3 pending"    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               stockzip-sync (agent, engine, monitor)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ stockzip-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐     ┌───────────┐     ┌───────────────┐        │   │
//! │  │   │   types   │     │  mirror   │     │     queue     │        │   │
//! │  │   │ Operation │     │ id index  │     │ enqueue_*     │        │   │
//! │  │   │  Payload  │     │ barcode / │     │ lifecycle     │        │   │
//! │  │   │  Status   │     │ sku index │     │ snapshot      │        │   │
//! │  │   └───────────┘     └───────────┘     └───────────────┘        │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              stockzip-store (SQLite persistence)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Operation model (QueuedOperation, OperationPayload, etc.)
//! - [`mirror`] - Optimistic entity cache with barcode/SKU indexes
//! - [`queue`] - Mutation queue and operation lifecycle
//! - [`scan`] - Batch scan sessions
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use stockzip_core::{EntityType, FieldMap, MutationQueue};
//! use serde_json::json;
//!
//! let mut queue = MutationQueue::new();
//!
//! let mut fields = FieldMap::new();
//! fields.insert("name".into(), json!("Widget"));
//! fields.insert("sku".into(), json!("WID-001"));
//! let receipt = queue.enqueue_create(EntityType::Item, fields);
//!
//! // Visible before the server has seen it.
//! let cached = queue.mirror().lookup_by_secondary_key("WID-001").unwrap();
//! assert_eq!(cached.id, receipt.optimistic_id);
//! assert_eq!(queue.pending_count(), 1);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod mirror;
pub mod queue;
pub mod scan;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use mirror::{LocalMirror, SecondaryKey};
pub use queue::{MutationQueue, QueueSnapshot, RetryDisposition};
pub use scan::{ScanEntry, ScanSession};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Failed attempts allowed per operation before it is marked failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Prefix of ids handed out for entities the server has not created yet.
pub const OPTIMISTIC_ID_PREFIX: &str = "temp-";
