//! # Mutation Queue
//!
//! Ordered collection of pending changes plus the optimistic mirror they
//! write through.
//!
//! ## Enqueue Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mutation Queue                                   │
//! │                                                                         │
//! │  enqueue_create(item, {name: "Widget"})                                │
//! │       │                                                                 │
//! │       ├──► operations.push(create, status = pending)                   │
//! │       │                                                                 │
//! │       └──► mirror.upsert({name: "Widget", id: "temp-…"})  (optimistic) │
//! │                                                                         │
//! │  enqueue_update(id, {quantity: 45})                                    │
//! │       │                                                                 │
//! │       ├──► previous = mirror[id].clone()          (for rollback)       │
//! │       ├──► operations.push(update, status = pending)                   │
//! │       └──► mirror.patch(id, {quantity: 45})                            │
//! │                                                                         │
//! │  Sync engine (stockzip-sync) then walks the lifecycle:                  │
//! │    begin_sync ─► mark_completed | record_failure                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutations are synchronous and local. Lifecycle calls that do not match
//! the operation's current status are rejected with
//! [`CoreError::InvalidTransition`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::mirror::LocalMirror;
use crate::types::{
    CachedEntity, CreateReceipt, EntityType, FieldMap, MutationReceipt, OperationPayload,
    OperationStatus, QueuedOperation,
};
use crate::{DEFAULT_MAX_RETRIES, OPTIMISTIC_ID_PREFIX};

// =============================================================================
// Retry Disposition
// =============================================================================

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Back to pending; the next pass tries again.
    RetryScheduled,
    /// Retry budget used up; the operation is now failed.
    Exhausted,
}

impl RetryDisposition {
    /// Reason reported in sync results.
    pub fn reason(&self) -> &'static str {
        match self {
            RetryDisposition::RetryScheduled => "Retry scheduled",
            RetryDisposition::Exhausted => "Max retries exceeded",
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Serializable image of a queue and its mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub operations: Vec<QueuedOperation>,
    pub entities: Vec<CachedEntity>,
}

// =============================================================================
// Mutation Queue
// =============================================================================

/// Pending changes in insertion order, with the mirror they update.
#[derive(Debug, Clone)]
pub struct MutationQueue {
    operations: Vec<QueuedOperation>,
    mirror: LocalMirror,
    max_retries: u32,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Default for MutationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationQueue {
    /// Creates an empty queue with the default retry ceiling.
    pub fn new() -> Self {
        Self::with_max_retries(DEFAULT_MAX_RETRIES)
    }

    /// Creates an empty queue whose new operations allow `max_retries` failures.
    pub fn with_max_retries(max_retries: u32) -> Self {
        MutationQueue {
            operations: Vec::new(),
            mirror: LocalMirror::new(),
            max_retries,
            last_timestamp: None,
        }
    }

    /// Rebuilds a queue from a snapshot.
    pub fn from_snapshot(snapshot: QueueSnapshot, max_retries: u32) -> Self {
        let mut queue = Self::with_max_retries(max_retries);
        queue.restore(snapshot);
        queue
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    /// Mutable mirror access, for seeding the cache and for quantity changes
    /// the caller applies next to `enqueue_quantity_adjustment`.
    pub fn mirror_mut(&mut self) -> &mut LocalMirror {
        &mut self.mirror
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Queues a create and writes the new entity into the mirror under an
    /// optimistic id.
    pub fn enqueue_create(&mut self, entity_type: EntityType, fields: FieldMap) -> CreateReceipt {
        let optimistic_id = format!("{}{}", OPTIMISTIC_ID_PREFIX, Uuid::new_v4());

        let mut fields = fields;
        fields.insert("id".to_string(), Value::String(optimistic_id.clone()));

        let mut cached = fields.clone();
        cached.remove("id");
        self.mirror
            .upsert(CachedEntity::new(optimistic_id.clone(), entity_type, cached));

        let operation_id = self.push(
            entity_type,
            optimistic_id.clone(),
            OperationPayload::Create { fields },
        );

        CreateReceipt {
            operation_id,
            optimistic_id,
        }
    }

    /// Queues an update, returning the mirror's value from before the patch.
    ///
    /// The patch is merged into the mirror only if the entity is cached.
    pub fn enqueue_update(&mut self, entity_id: &str, patch: FieldMap) -> MutationReceipt {
        let previous_value = self.mirror.lookup_by_primary_id(entity_id).cloned();
        let entity_type = previous_value
            .as_ref()
            .map(|e| e.entity_type)
            .unwrap_or_default();

        self.mirror.patch(entity_id, &patch);
        let operation_id = self.push(
            entity_type,
            entity_id.to_string(),
            OperationPayload::Update { patch },
        );

        MutationReceipt {
            operation_id,
            previous_value,
        }
    }

    /// Queues a delete and drops the entity from the mirror.
    pub fn enqueue_delete(&mut self, entity_type: EntityType, entity_id: &str) -> MutationReceipt {
        let previous_value = self.mirror.remove(entity_id);
        let operation_id = self.push(entity_type, entity_id.to_string(), OperationPayload::Delete);

        MutationReceipt {
            operation_id,
            previous_value,
        }
    }

    /// Queues a quantity delta. The mirror is left alone; callers adjust it
    /// with [`LocalMirror::adjust_numeric_field`].
    pub fn enqueue_quantity_adjustment(&mut self, entity_id: &str, delta: i64) -> String {
        let entity_type = self
            .mirror
            .lookup_by_primary_id(entity_id)
            .map(|e| e.entity_type)
            .unwrap_or_default();

        self.push(
            entity_type,
            entity_id.to_string(),
            OperationPayload::QuantityAdjustment { delta },
        )
    }

    fn push(&mut self, entity_type: EntityType, entity_id: String, payload: OperationPayload) -> String {
        let id = Uuid::new_v4().to_string();
        let timestamp = self.next_timestamp();

        self.operations.push(QueuedOperation {
            id: id.clone(),
            entity_type,
            entity_id,
            payload,
            timestamp,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            last_error: None,
        });

        id
    }

    /// Wall clock, nudged forward so timestamps strictly increase within the
    /// queue even when the clock stalls or steps back.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last >= now => last + Duration::nanoseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub fn get(&self, operation_id: &str) -> Option<&QueuedOperation> {
        self.operations.iter().find(|op| op.id == operation_id)
    }

    pub fn all(&self) -> Vec<QueuedOperation> {
        self.operations.clone()
    }

    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.with_status(OperationStatus::Pending)
    }

    pub fn failed(&self) -> Vec<QueuedOperation> {
        self.with_status(OperationStatus::Failed)
    }

    pub fn pending_count(&self) -> usize {
        self.count_status(OperationStatus::Pending)
    }

    pub fn failed_count(&self) -> usize {
        self.count_status(OperationStatus::Failed)
    }

    /// Ids of pending operations in insertion order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.operations
            .iter()
            .filter(|op| op.status == OperationStatus::Pending)
            .map(|op| op.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    fn with_status(&self, status: OperationStatus) -> Vec<QueuedOperation> {
        self.operations
            .iter()
            .filter(|op| op.status == status)
            .cloned()
            .collect()
    }

    fn count_status(&self, status: OperationStatus) -> usize {
        self.operations.iter().filter(|op| op.status == status).count()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Moves a pending operation to syncing and returns a copy for the transport.
    pub fn begin_sync(&mut self, operation_id: &str) -> CoreResult<QueuedOperation> {
        let op = self.transition(operation_id, OperationStatus::Pending, OperationStatus::Syncing)?;
        Ok(op.clone())
    }

    /// Marks a syncing operation as applied by the server.
    pub fn mark_completed(&mut self, operation_id: &str) -> CoreResult<()> {
        let op = self.transition(operation_id, OperationStatus::Syncing, OperationStatus::Completed)?;
        op.last_error = None;
        Ok(())
    }

    /// Records a failed attempt on a syncing operation.
    ///
    /// The retry count goes up by one. Once it reaches the ceiling the
    /// operation is failed; before that it returns to pending for the next
    /// pass, never for the current one.
    pub fn record_failure(
        &mut self,
        operation_id: &str,
        reason: impl Into<String>,
    ) -> CoreResult<RetryDisposition> {
        let op = self.find_mut(operation_id)?;
        if op.status != OperationStatus::Syncing {
            return Err(CoreError::InvalidTransition {
                operation_id: operation_id.to_string(),
                from: op.status,
                to: OperationStatus::Pending,
            });
        }

        op.retry_count = (op.retry_count + 1).min(op.max_retries);
        op.last_error = Some(reason.into());

        if op.is_exhausted() {
            op.status = OperationStatus::Failed;
            Ok(RetryDisposition::Exhausted)
        } else {
            op.status = OperationStatus::Pending;
            Ok(RetryDisposition::RetryScheduled)
        }
    }

    /// Resets every failed operation to pending with a fresh retry budget.
    ///
    /// Returns the number of operations reset.
    pub fn reset_failed(&mut self) -> usize {
        let mut reset = 0;
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.status == OperationStatus::Failed)
        {
            Self::revive(op);
            reset += 1;
        }
        reset
    }

    /// Resets a single failed operation to pending.
    pub fn reset_operation(&mut self, operation_id: &str) -> CoreResult<()> {
        let op = self.transition(operation_id, OperationStatus::Failed, OperationStatus::Pending)?;
        Self::revive(op);
        Ok(())
    }

    /// Returns operations stranded in `syncing` (e.g. by a crash mid-pass) to
    /// pending without charging a retry.
    pub fn requeue_stranded(&mut self) -> usize {
        let mut requeued = 0;
        for op in self
            .operations
            .iter_mut()
            .filter(|op| op.status == OperationStatus::Syncing)
        {
            op.status = OperationStatus::Pending;
            requeued += 1;
        }
        requeued
    }

    /// Drops completed operations. Returns how many were removed.
    pub fn clear_completed(&mut self) -> usize {
        let before = self.operations.len();
        self.operations
            .retain(|op| op.status != OperationStatus::Completed);
        before - self.operations.len()
    }

    /// Empties the queue and the mirror.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.mirror.clear();
    }

    fn revive(op: &mut QueuedOperation) {
        op.status = OperationStatus::Pending;
        op.retry_count = 0;
        op.last_error = None;
    }

    fn find_mut(&mut self, operation_id: &str) -> CoreResult<&mut QueuedOperation> {
        self.operations
            .iter_mut()
            .find(|op| op.id == operation_id)
            .ok_or_else(|| CoreError::OperationNotFound(operation_id.to_string()))
    }

    fn transition(
        &mut self,
        operation_id: &str,
        from: OperationStatus,
        to: OperationStatus,
    ) -> CoreResult<&mut QueuedOperation> {
        let op = self.find_mut(operation_id)?;
        if op.status != from {
            return Err(CoreError::InvalidTransition {
                operation_id: operation_id.to_string(),
                from: op.status,
                to,
            });
        }
        op.status = to;
        Ok(op)
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Captures operations and mirror contents.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            operations: self.operations.clone(),
            entities: self.mirror.entities(),
        }
    }

    /// Replaces the queue and mirror contents with a snapshot.
    ///
    /// Operations are ordered by timestamp so insertion order survives the
    /// round trip through storage.
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        let mut operations = snapshot.operations;
        operations.sort_by_key(|op| op.timestamp);

        self.last_timestamp = operations.last().map(|op| op.timestamp);
        self.operations = operations;

        self.mirror.clear();
        for entity in snapshot.entities {
            self.mirror.upsert(entity);
        }
    }
}
