//! # Domain Types
//!
//! The operation model shared by the queue, the sync engine and storage.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌──────────────────┐   ┌─────────────────┐  │
//! │  │  QueuedOperation    │   │ OperationPayload │   │  CachedEntity   │  │
//! │  │  ─────────────────  │   │ ──────────────── │   │ ─────────────── │  │
//! │  │  id (UUID)          │   │ Create{fields}   │   │ id              │  │
//! │  │  entity_type        │──►│ Update{patch}    │   │ entity_type     │  │
//! │  │  entity_id          │   │ Delete           │   │ fields (JSON)   │  │
//! │  │  status / retries   │   │ QuantityAdj{δ}   │   └─────────────────┘  │
//! │  └─────────────────────┘   └──────────────────┘                        │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   EntityType    │   │ OperationStatus │   │ OperationKind   │       │
//! │  │  Item           │   │  Pending        │   │  Create         │       │
//! │  │  Folder         │   │  Syncing        │   │  Update         │       │
//! │  │  Checkout       │   │  Completed      │   │  Delete         │       │
//! │  └─────────────────┘   │  Failed         │   │  QuantityAdj.   │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Typed Payloads
//! The operation kind is not stored next to an untyped map. It is derived from
//! the payload variant, so an `Update` can never carry a quantity delta and the
//! engine and mirror match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::ValidationError;

/// JSON field bag carried by create/update payloads and cached entities.
pub type FieldMap = serde_json::Map<String, Value>;

// =============================================================================
// Entity Type
// =============================================================================

/// Domain category an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Inventory item (the common case).
    #[default]
    Item,
    /// Folder grouping items.
    Folder,
    /// Checkout of an item to a person or location.
    Checkout,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Item => "item",
            EntityType::Folder => "folder",
            EntityType::Checkout => "checkout",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(EntityType::Item),
            "folder" => Ok(EntityType::Folder),
            "checkout" => Ok(EntityType::Checkout),
            _ => Err(ValidationError::not_allowed(
                "entity_type",
                &["item", "folder", "checkout"],
            )),
        }
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// Kind of change an operation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    QuantityAdjustment,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::QuantityAdjustment => "quantity_adjustment",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Lifecycle status of a queued operation.
///
/// ## State Machine
/// ```text
///             begin_sync              apply → true
///  ┌─────────┐ ─────────► ┌─────────┐ ─────────────► ┌───────────┐
///  │ Pending │            │ Syncing │                │ Completed │
///  └─────────┘ ◄───────── └─────────┘                └───────────┘
///       ▲     retry < max      │
///       │                      │ retry == max
///       │  manual reset        ▼
///       └──────────────── ┌─────────┐
///                         │ Failed  │
///                         └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next sync pass.
    Pending,
    /// Handed to the transport in the current pass.
    Syncing,
    /// Applied by the server. Immutable from here on.
    Completed,
    /// Retries exhausted. Only a manual reset revives it.
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
        }
    }

    /// Returns true for statuses no sync pass will change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "syncing" => Ok(OperationStatus::Syncing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            _ => Err(ValidationError::not_allowed(
                "status",
                &["pending", "syncing", "completed", "failed"],
            )),
        }
    }
}

// =============================================================================
// Operation Payload
// =============================================================================

/// The change an operation carries, one variant per operation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Full field set of a new entity, including its optimistic `id`.
    Create {
        #[ts(type = "Record<string, unknown>")]
        fields: FieldMap,
    },
    /// Fields to shallow-merge into an existing entity.
    Update {
        #[ts(type = "Record<string, unknown>")]
        patch: FieldMap,
    },
    /// Removal of the entity.
    Delete,
    /// Signed change to the entity's quantity.
    QuantityAdjustment { delta: i64 },
}

impl OperationPayload {
    /// Returns the operation kind this payload belongs to.
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::Create { .. } => OperationKind::Create,
            OperationPayload::Update { .. } => OperationKind::Update,
            OperationPayload::Delete => OperationKind::Delete,
            OperationPayload::QuantityAdjustment { .. } => OperationKind::QuantityAdjustment,
        }
    }
}

// =============================================================================
// Queued Operation
// =============================================================================

/// A pending change waiting to be applied by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedOperation {
    /// Unique identifier (UUID v4), generated at enqueue time.
    pub id: String,

    /// Domain category of the affected entity.
    pub entity_type: EntityType,

    /// Affected entity. For creates this is the optimistic `temp-` id.
    pub entity_id: String,

    /// The change itself.
    pub payload: OperationPayload,

    /// Enqueue time, non-decreasing within one queue.
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    /// Lifecycle status.
    pub status: OperationStatus,

    /// Failed attempts so far.
    pub retry_count: u32,

    /// Failed attempts allowed before the operation is marked failed.
    pub max_retries: u32,

    /// Reason recorded by the most recent failed attempt.
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Returns the kind derived from the payload.
    #[inline]
    pub fn kind(&self) -> OperationKind {
        self.payload.kind()
    }

    /// Returns true once no automatic retry is left.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

// =============================================================================
// Cached Entity
// =============================================================================

/// The client's optimistic view of one server entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CachedEntity {
    /// Primary id (server id or optimistic `temp-` id).
    pub id: String,

    /// Domain category.
    pub entity_type: EntityType,

    /// Entity fields as last seen or optimistically written.
    #[ts(type = "Record<string, unknown>")]
    pub fields: FieldMap,
}

impl CachedEntity {
    pub fn new(id: impl Into<String>, entity_type: EntityType, fields: FieldMap) -> Self {
        CachedEntity {
            id: id.into(),
            entity_type,
            fields,
        }
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a field as a string slice, if it is a string.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Returns a field as an integer, if it is one.
    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }
}

// =============================================================================
// Enqueue Receipts & Results
// =============================================================================

/// Returned by `enqueue_create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateReceipt {
    pub operation_id: String,
    /// Placeholder id the entity lives under until the server assigns one.
    pub optimistic_id: String,
}

/// Returned by `enqueue_update` and `enqueue_delete`.
///
/// `previous_value` is the mirror's view before the mutation, kept so the
/// caller can roll back if the server later rejects the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MutationReceipt {
    pub operation_id: String,
    pub previous_value: Option<CachedEntity>,
}

/// Outcome of one operation within a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OperationResult {
    pub operation_id: String,
    pub success: bool,
    pub error: Option<String>,
}

impl OperationResult {
    pub fn succeeded(operation_id: impl Into<String>) -> Self {
        OperationResult {
            operation_id: operation_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(operation_id: impl Into<String>, error: impl Into<String>) -> Self {
        OperationResult {
            operation_id: operation_id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}
