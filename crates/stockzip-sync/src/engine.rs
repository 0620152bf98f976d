//! # Sync Engine
//!
//! Drains the mutation queue through an [`OperationApplier`].
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          process_queue()                                │
//! │                                                                         │
//! │   acquire pass flag ──── busy ────► Err(SyncInProgress)                │
//! │         │                                                               │
//! │         ▼                                                               │
//! │   requeue stranded syncing ops, snapshot pending ids                   │
//! │         │                                                               │
//! │         ▼   (for each id, in enqueue order)                             │
//! │   ┌───────────────┐   ┌──────────────────┐   ┌──────────────────────┐  │
//! │   │ lock queue    │   │ applier.apply()  │   │ lock queue           │  │
//! │   │ begin_sync    │──►│ (no lock held)   │──►│ completed / retry /  │  │
//! │   │ unlock        │   │                  │   │ failed               │  │
//! │   └───────────────┘   └──────────────────┘   └──────────────────────┘  │
//! │         │                                                               │
//! │         ▼                                                               │
//! │   release pass flag (guard drop, also on panic or cancellation)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Operations enqueued while a pass runs are left for the next pass, and so
//! are operations that failed in this pass and went back to pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stockzip_core::{MutationQueue, OperationResult, RetryDisposition};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::applier::OperationApplier;
use crate::error::{SyncError, SyncResult};

/// The queue shared between the engine, the agent and callers.
pub type SharedQueue = Arc<Mutex<MutationQueue>>;

/// Recorded on an operation when the server declines it without an error.
pub const REJECTED_BY_SERVER: &str = "Operation rejected by server";

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// One entry per operation attempted, in attempt order.
    pub results: Vec<OperationResult>,
    pub success_count: usize,
    /// Operations that ran out of retries during this pass.
    pub failed_count: usize,
}

impl SyncReport {
    /// Number of attempts that did not succeed, exhausted or not.
    pub fn unsuccessful_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// Error text of the last unsuccessful attempt.
    pub fn last_error(&self) -> Option<&str> {
        self.results
            .iter()
            .rev()
            .find(|r| !r.success)
            .and_then(|r| r.error.as_deref())
    }
}

/// Outcome of [`SyncEngine::retry_failed`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    /// Failed operations that were reset to pending.
    pub retried_count: usize,
    pub success_count: usize,
    /// The drain that followed the reset.
    pub report: SyncReport,
}

// =============================================================================
// Pass Guard
// =============================================================================

/// Holds the engine's in-progress flag for the lifetime of one pass.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SyncResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SyncInProgress)?;
        Ok(PassGuard { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Drains a [`SharedQueue`], one pass at a time.
#[derive(Debug)]
pub struct SyncEngine {
    queue: SharedQueue,
    in_progress: AtomicBool,
}

impl SyncEngine {
    pub fn new(queue: SharedQueue) -> Self {
        SyncEngine {
            queue,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Attempts every pending operation once.
    ///
    /// Fails with [`SyncError::SyncInProgress`] without touching the queue
    /// when another pass is running. Per-operation failures are reported in
    /// the returned [`SyncReport`], never as an error.
    pub async fn process_queue<A>(&self, applier: &A) -> SyncResult<SyncReport>
    where
        A: OperationApplier + ?Sized,
    {
        let _guard = PassGuard::acquire(&self.in_progress)?;
        self.drain(applier).await
    }

    /// Resets every failed operation to pending, then drains.
    pub async fn retry_failed<A>(&self, applier: &A) -> SyncResult<RetryReport>
    where
        A: OperationApplier + ?Sized,
    {
        let _guard = PassGuard::acquire(&self.in_progress)?;

        let retried_count = self.queue.lock().await.reset_failed();
        info!(retried_count, "Resetting failed operations");

        let report = self.drain(applier).await?;
        Ok(RetryReport {
            retried_count,
            success_count: report.success_count,
            report,
        })
    }

    async fn drain<A>(&self, applier: &A) -> SyncResult<SyncReport>
    where
        A: OperationApplier + ?Sized,
    {
        let ids = {
            let mut queue = self.queue.lock().await;
            let requeued = queue.requeue_stranded();
            if requeued > 0 {
                warn!(requeued, "Requeued operations left in syncing by an interrupted pass");
            }
            queue.pending_ids()
        };

        if ids.is_empty() {
            debug!("Nothing to sync");
            return Ok(SyncReport::default());
        }

        info!(count = ids.len(), "Starting sync pass");
        let mut report = SyncReport::default();

        for id in ids {
            let operation = match self.queue.lock().await.begin_sync(&id) {
                Ok(op) => op,
                Err(e) => {
                    debug!(operation_id = %id, error = %e, "Operation no longer pending, skipping");
                    continue;
                }
            };

            debug!(
                operation_id = %id,
                kind = %operation.kind(),
                entity_id = %operation.entity_id,
                "Applying operation"
            );
            let outcome = applier.apply(operation).await;

            let (result, disposition) = self.settle(&id, outcome).await;
            if result.success {
                report.success_count += 1;
            }
            if disposition == Some(RetryDisposition::Exhausted) {
                report.failed_count += 1;
            }
            report.results.push(result);
        }

        info!(
            attempted = report.results.len(),
            succeeded = report.success_count,
            failed = report.failed_count,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Applies the transport outcome to the queue and builds the result entry.
    async fn settle(
        &self,
        id: &str,
        outcome: SyncResult<bool>,
    ) -> (OperationResult, Option<RetryDisposition>) {
        let mut queue = self.queue.lock().await;

        let (error, rejected) = match outcome {
            Ok(true) => {
                if let Err(e) = queue.mark_completed(id) {
                    warn!(operation_id = %id, error = %e, "Applied operation vanished from queue");
                }
                return (OperationResult::succeeded(id), None);
            }
            Ok(false) => (REJECTED_BY_SERVER.to_string(), true),
            Err(err) => (err.to_string(), false),
        };

        let disposition = match queue.record_failure(id, error.clone()) {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(operation_id = %id, error = %e, "Failed operation vanished from queue");
                return (OperationResult::failed(id, error), None);
            }
        };

        match disposition {
            RetryDisposition::RetryScheduled => {
                warn!(operation_id = %id, error = %error, "Operation failed, retry scheduled")
            }
            RetryDisposition::Exhausted => {
                warn!(operation_id = %id, error = %error, "Operation failed, max retries exceeded")
            }
        }

        let reason = if rejected {
            disposition.reason().to_string()
        } else {
            error
        };
        (OperationResult::failed(id, reason), Some(disposition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use stockzip_core::{EntityType, FieldMap, OperationStatus, QueuedOperation};
    use tokio::sync::Notify;

    fn fields(value: serde_json::Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn engine_with(queue: MutationQueue) -> SyncEngine {
        SyncEngine::new(Arc::new(Mutex::new(queue)))
    }

    fn ok_applier(op: QueuedOperation) -> impl std::future::Future<Output = SyncResult<bool>> {
        let _ = op;
        async { Ok(true) }
    }

    #[tokio::test]
    async fn test_drains_everything_on_success() {
        let mut queue = MutationQueue::new();
        queue.enqueue_create(EntityType::Item, fields(json!({"name": "Widget"})));
        queue.enqueue_quantity_adjustment("item-1", 5);
        queue.enqueue_delete(EntityType::Folder, "folder-1");
        let engine = engine_with(queue);

        let report = engine.process_queue(&ok_applier).await.unwrap();

        assert_eq!(report.success_count, 3);
        assert_eq!(report.failed_count, 0);
        assert!(report.results.iter().all(|r| r.success && r.error.is_none()));

        let queue = engine.queue().lock().await;
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.all().iter().all(|op| op.status == OperationStatus::Completed));
    }

    #[tokio::test]
    async fn test_applies_in_enqueue_order() {
        let mut queue = MutationQueue::new();
        let first = queue.enqueue_quantity_adjustment("item-1", 1);
        let second = queue.enqueue_quantity_adjustment("item-1", 2);
        let third = queue.enqueue_quantity_adjustment("item-1", 3);
        let engine = engine_with(queue);

        let seen = std::sync::Mutex::new(Vec::new());
        let applier = |op: QueuedOperation| {
            seen.lock().unwrap().push(op.id.clone());
            async { Ok::<_, SyncError>(true) }
        };
        engine.process_queue(&applier).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_rejection_goes_through_retry_budget() {
        let mut queue = MutationQueue::with_max_retries(3);
        let id = queue.enqueue_quantity_adjustment("item-1", -2);
        let engine = engine_with(queue);
        let reject = |_op: QueuedOperation| async { Ok::<_, SyncError>(false) };

        for _ in 0..2 {
            let report = engine.process_queue(&reject).await.unwrap();
            assert_eq!(report.results[0].error.as_deref(), Some("Retry scheduled"));
            assert_eq!(report.failed_count, 0);
        }

        let report = engine.process_queue(&reject).await.unwrap();
        assert_eq!(report.results[0].error.as_deref(), Some("Max retries exceeded"));
        assert_eq!(report.failed_count, 1);

        let queue = engine.queue().lock().await;
        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.retry_count, 3);
        assert_eq!(op.last_error.as_deref(), Some(REJECTED_BY_SERVER));
    }

    #[tokio::test]
    async fn test_retry_waits_for_next_pass() {
        let mut queue = MutationQueue::new();
        queue.enqueue_delete(EntityType::Item, "item-1");
        let engine = engine_with(queue);

        let calls = AtomicUsize::new(0);
        let applier = |_op: QueuedOperation| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SyncError>(false) }
        };

        let report = engine.process_queue(&applier).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.queue().lock().await.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_is_recorded() {
        let mut queue = MutationQueue::new();
        let id = queue.enqueue_delete(EntityType::Item, "item-1").operation_id;
        let engine = engine_with(queue);

        let applier =
            |_op: QueuedOperation| async { Err::<bool, _>(SyncError::ConnectionFailed("network down".into())) };
        let report = engine.process_queue(&applier).await.unwrap();

        assert_eq!(
            report.results[0].error.as_deref(),
            Some("Connection failed: network down")
        );
        assert_eq!(report.last_error(), Some("Connection failed: network down"));
        let queue = engine.queue().lock().await;
        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 1);
        assert_eq!(op.last_error.as_deref(), Some("Connection failed: network down"));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let mut queue = MutationQueue::new();
        queue.enqueue_quantity_adjustment("bad", 1);
        queue.enqueue_quantity_adjustment("good", 1);
        let engine = engine_with(queue);

        let applier = |op: QueuedOperation| async move {
            if op.entity_id == "bad" {
                Err(SyncError::Timeout(10))
            } else {
                Ok(true)
            }
        };
        let report = engine.process_queue(&applier).await.unwrap();

        assert_eq!(report.results.len(), 2);
        assert!(!report.results[0].success);
        assert!(report.results[1].success);
        assert_eq!(report.success_count, 1);
        assert_eq!(report.unsuccessful_count(), 1);
    }

    #[tokio::test]
    async fn test_third_create_failing_leaves_first_two_applied() {
        let mut queue = MutationQueue::new();
        let receipts: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|name| queue.enqueue_create(EntityType::Item, fields(json!({ "name": name }))))
            .collect();
        let engine = engine_with(queue);

        let failing = receipts[2].optimistic_id.clone();
        let calls = AtomicUsize::new(0);
        let applier = |op: QueuedOperation| {
            calls.fetch_add(1, Ordering::SeqCst);
            let fail = op.entity_id == failing;
            async move {
                if fail {
                    Err(SyncError::ServerError { status: 500, message: "boom".into() })
                } else {
                    Ok(true)
                }
            }
        };
        let report = engine.process_queue(&applier).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.failed_count, 0);
        assert!(!report.results[2].success);

        let queue = engine.queue().lock().await;
        for receipt in &receipts[..2] {
            assert_eq!(queue.get(&receipt.operation_id).unwrap().status, OperationStatus::Completed);
        }
        let third = queue.get(&receipts[2].operation_id).unwrap();
        assert_eq!(third.status, OperationStatus::Pending);
        assert_eq!(third.retry_count, 1);
        assert_eq!(third.last_error.as_deref(), Some("Server error 500: boom"));
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_rejected() {
        let mut queue = MutationQueue::new();
        let first = queue.enqueue_quantity_adjustment("item-1", 1);
        let engine = Arc::new(engine_with(queue));

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let applier = {
            let entered = entered.clone();
            let release = release.clone();
            move |_op: QueuedOperation| {
                let entered = entered.clone();
                let release = release.clone();
                async move {
                    entered.notify_one();
                    release.notified().await;
                    Ok::<_, SyncError>(true)
                }
            }
        };

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_queue(&applier).await })
        };
        entered.notified().await;
        assert!(engine.is_sync_in_progress());

        // Enqueued mid-pass: must wait for the next pass.
        let late = engine.queue().lock().await.enqueue_quantity_adjustment("item-1", 2);

        let err = engine.process_queue(&ok_applier).await.unwrap_err();
        assert_eq!(err.to_string(), "Sync already in progress");

        release.notify_one();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].operation_id, first);
        assert!(!engine.is_sync_in_progress());

        let queue = engine.queue().lock().await;
        assert_eq!(queue.get(&late).unwrap().status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_pass_releases_flag_and_requeues() {
        let mut queue = MutationQueue::new();
        let id = queue.enqueue_quantity_adjustment("item-1", 1);
        let engine = engine_with(queue);

        let hang = |_op: QueuedOperation| std::future::pending::<SyncResult<bool>>();
        let pass = engine.process_queue(&hang);
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), pass).await;
        assert!(timed_out.is_err());

        assert!(!engine.is_sync_in_progress());
        assert_eq!(
            engine.queue().lock().await.get(&id).unwrap().status,
            OperationStatus::Syncing
        );

        let report = engine.process_queue(&ok_applier).await.unwrap();
        assert_eq!(report.success_count, 1);
        let queue = engine.queue().lock().await;
        let op = queue.get(&id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.retry_count, 0);
    }

    #[tokio::test]
    async fn test_retry_failed_resets_and_drains() {
        let mut queue = MutationQueue::with_max_retries(1);
        queue.enqueue_delete(EntityType::Item, "item-1");
        queue.enqueue_delete(EntityType::Item, "item-2");
        let engine = engine_with(queue);

        let reject = |_op: QueuedOperation| async { Ok::<_, SyncError>(false) };
        let report = engine.process_queue(&reject).await.unwrap();
        assert_eq!(report.failed_count, 2);
        assert_eq!(engine.queue().lock().await.failed_count(), 2);

        let retry = engine.retry_failed(&ok_applier).await.unwrap();
        assert_eq!(retry.retried_count, 2);
        assert_eq!(retry.success_count, 2);
        assert_eq!(retry.report.results.len(), 2);
        assert!(retry.report.last_error().is_none());
        assert_eq!(engine.queue().lock().await.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_reports_nothing() {
        let engine = engine_with(MutationQueue::new());
        let report = engine.process_queue(&ok_applier).await.unwrap();
        assert_eq!(report, SyncReport::default());
    }
}
