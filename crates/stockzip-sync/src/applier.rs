//! # Transport Seams
//!
//! The sync layer never talks to the network itself. Callers inject two
//! async capabilities:
//!
//! - [`OperationApplier`] sends one queued operation to the server and
//!   reports whether it was applied.
//! - [`ConnectivityProbe`] answers "can we reach the server right now?".
//!
//! Both are implemented for plain async closures, so tests and thin
//! integrations don't need a named type:
//!
//! ```rust,ignore
//! let applier = |op: QueuedOperation| async move {
//!     http.post(op).await.map(|resp| resp.ok)
//! };
//! engine.process_queue(&applier).await?;
//! ```

use std::future::Future;

use async_trait::async_trait;
use stockzip_core::QueuedOperation;

use crate::error::SyncResult;

// =============================================================================
// Operation Applier
// =============================================================================

/// Applies a queued operation against the server.
///
/// - `Ok(true)`: the server applied it.
/// - `Ok(false)`: the server declined it; the engine schedules a retry.
/// - `Err(_)`: transport failure; the error text is recorded on the
///   operation and the engine schedules a retry.
#[async_trait]
pub trait OperationApplier: Send + Sync {
    async fn apply(&self, operation: QueuedOperation) -> SyncResult<bool>;
}

#[async_trait]
impl<F, Fut> OperationApplier for F
where
    F: Fn(QueuedOperation) -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<bool>> + Send,
{
    async fn apply(&self, operation: QueuedOperation) -> SyncResult<bool> {
        (self)(operation).await
    }
}

// =============================================================================
// Connectivity Probe
// =============================================================================

/// Reports whether the server is reachable. An error counts as offline.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> SyncResult<bool>;
}

#[async_trait]
impl<F, Fut> ConnectivityProbe for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<bool>> + Send,
{
    async fn probe(&self) -> SyncResult<bool> {
        (self)().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use stockzip_core::{EntityType, MutationQueue};

    #[tokio::test]
    async fn test_closure_applier() {
        let mut queue = MutationQueue::new();
        queue.enqueue_delete(EntityType::Item, "item-1");
        let op = queue.all().remove(0);

        let applier = |op: QueuedOperation| async move { Ok(op.entity_id == "item-1") };
        assert!(applier.apply(op).await.unwrap());
    }

    #[tokio::test]
    async fn test_closure_probe_error() {
        let probe = || async { Err(SyncError::Timeout(5)) };
        assert!(matches!(probe.probe().await, Err(SyncError::Timeout(5))));
    }

    #[tokio::test]
    async fn test_boxed_dyn_applier() {
        let applier: Box<dyn OperationApplier> =
            Box::new(|_op: QueuedOperation| async { Ok(false) });

        let mut queue = MutationQueue::new();
        queue.enqueue_quantity_adjustment("item-1", 2);
        assert!(!applier.apply(queue.all().remove(0)).await.unwrap());
    }
}
