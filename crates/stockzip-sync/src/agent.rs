//! # Offline Sync Agent
//!
//! Ties the mutation queue, sync engine, connectivity monitor and SQLite
//! store together.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        OfflineSyncAgent                                 │
//! │                                                                         │
//! │   enqueue_* / adjust_quantity                                          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   ┌──────────────┐   write-through   ┌──────────────────────────────┐  │
//! │   │ SharedQueue  │──────────────────►│ Database (stockzip-store)    │  │
//! │   │ + mirror     │                   │ pending_changes              │  │
//! │   └──────┬───────┘                   │ cached_items                 │  │
//! │          │      record_scan ────────►│ scan_sessions                │  │
//! │          │                           │ sync_metadata                │  │
//! │          ▼                           └──────────────────────────────┘  │
//! │   ┌──────────────┐                              ▲                       │
//! │   │ SyncEngine   │── sync_now() ── snapshot ────┘                       │
//! │   └──────────────┘                                                      │
//! │          ▲                                                              │
//! │   ┌──────┴───────┐      ┌────────────────────┐                          │
//! │   │ AutoSync     │◄─────│ OnlineStatusMonitor│◄── ConnectivityProbe    │
//! │   └──────────────┘      └────────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation is written to SQLite before the call returns, so a crash
//! loses nothing that was acknowledged. Operations a crash left in
//! `syncing` go back to `pending` when the agent is reopened.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stockzip_core::{
    CachedEntity, CreateReceipt, EntityType, FieldMap, MutationQueue, MutationReceipt, ScanEntry,
    ScanSession,
};
use stockzip_store::{Database, LAST_CACHE_SYNC, LAST_SUCCESSFUL_SYNC, LAST_SYNC_ERROR};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::applier::{ConnectivityProbe, OperationApplier};
use crate::auto_sync::{AutoSync, AutoSyncHandle, SyncTarget};
use crate::config::OfflineConfig;
use crate::engine::{RetryReport, SharedQueue, SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::monitor::{OnlineStatusMonitor, ProbeHandle};

/// Field adjusted in the mirror by [`OfflineSyncAgent::adjust_quantity`].
pub const QUANTITY_FIELD: &str = "quantity";

/// Event names used by frontends listening for connectivity changes.
pub const ONLINE_EVENT: &str = "stockzip:online";
pub const OFFLINE_EVENT: &str = "stockzip:offline";

/// Returns the connectivity event name for a status.
pub fn connectivity_event(online: bool) -> &'static str {
    if online {
        ONLINE_EVENT
    } else {
        OFFLINE_EVENT
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,

    /// Operations waiting for a sync pass.
    pub pending_count: usize,

    /// Operations that exhausted their retries.
    pub failed_count: usize,

    /// Last pass in which at least one operation succeeded.
    pub last_sync: Option<DateTime<Utc>>,

    /// Error of the most recent failed attempt, cleared by a clean pass.
    pub last_error: Option<String>,

    pub sync_in_progress: bool,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for emitting sync events to the frontend.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits `stockzip:online` or `stockzip:offline`.
    fn emit_connectivity(&self, online: bool);

    /// Emits the outcome of a sync pass.
    fn emit_progress(&self, report: &SyncReport);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_connectivity(&self, _online: bool) {}
    fn emit_progress(&self, _report: &SyncReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Offline Sync Agent
// =============================================================================

#[derive(Debug, Default)]
struct SyncHistory {
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Persistent offline queue with sync, connectivity and auto-sync.
pub struct OfflineSyncAgent {
    config: Arc<OfflineConfig>,

    db: Database,

    queue: SharedQueue,

    engine: Arc<SyncEngine>,

    monitor: OnlineStatusMonitor,

    /// Event emitter for frontend notifications.
    emitter: Arc<dyn SyncEventEmitter>,

    /// Serializes writes to the store so they land in queue order.
    persist: Mutex<()>,

    history: RwLock<SyncHistory>,
}

impl OfflineSyncAgent {
    /// Opens the agent on an initialized database.
    pub async fn open(config: OfflineConfig, db: Database) -> SyncResult<Self> {
        Self::open_with_emitter(config, db, Arc::new(NoOpEmitter)).await
    }

    pub async fn open_with_emitter(
        config: OfflineConfig,
        db: Database,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let requeued = db.pending_operations().requeue_syncing().await?;
        if requeued > 0 {
            warn!(requeued, "Requeued operations interrupted by a previous shutdown");
        }

        let snapshot = db.load_snapshot().await?;
        let queue = MutationQueue::from_snapshot(snapshot, config.queue.max_retries);

        let metadata = db.sync_metadata();
        let history = SyncHistory {
            last_sync: metadata.get_timestamp(LAST_SUCCESSFUL_SYNC).await?,
            last_error: metadata.get(LAST_SYNC_ERROR).await?,
        };

        info!(
            operations = queue.len(),
            pending = queue.pending_count(),
            failed = queue.failed_count(),
            cached = queue.mirror().len(),
            "Offline sync agent opened"
        );

        let queue: SharedQueue = Arc::new(Mutex::new(queue));
        Ok(OfflineSyncAgent {
            config: Arc::new(config),
            db,
            engine: Arc::new(SyncEngine::new(queue.clone())),
            queue,
            monitor: OnlineStatusMonitor::default(),
            emitter,
            persist: Mutex::new(()),
            history: RwLock::new(history),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &OnlineStatusMonitor {
        &self.monitor
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    pub async fn enqueue_create(
        &self,
        entity_type: EntityType,
        fields: FieldMap,
    ) -> SyncResult<CreateReceipt> {
        let _persist = self.persist.lock().await;
        let (receipt, op, entity) = {
            let mut queue = self.queue.lock().await;
            let receipt = queue.enqueue_create(entity_type, fields);
            let op = queue.get(&receipt.operation_id).cloned();
            let entity = queue.mirror().lookup_by_primary_id(&receipt.optimistic_id).cloned();
            (receipt, op, entity)
        };

        if let Some(op) = op {
            self.db.pending_operations().upsert(&op).await?;
        }
        if let Some(entity) = entity {
            self.db.cached_entities().upsert(&entity).await?;
        }

        debug!(operation_id = %receipt.operation_id, optimistic_id = %receipt.optimistic_id, "Create queued");
        Ok(receipt)
    }

    pub async fn enqueue_update(&self, entity_id: &str, patch: FieldMap) -> SyncResult<MutationReceipt> {
        let _persist = self.persist.lock().await;
        let (receipt, op, entity) = {
            let mut queue = self.queue.lock().await;
            let receipt = queue.enqueue_update(entity_id, patch);
            let op = queue.get(&receipt.operation_id).cloned();
            let entity = queue.mirror().lookup_by_primary_id(entity_id).cloned();
            (receipt, op, entity)
        };

        if let Some(op) = op {
            self.db.pending_operations().upsert(&op).await?;
        }
        if let Some(entity) = entity {
            self.db.cached_entities().upsert(&entity).await?;
        }

        debug!(operation_id = %receipt.operation_id, entity_id, "Update queued");
        Ok(receipt)
    }

    pub async fn enqueue_delete(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> SyncResult<MutationReceipt> {
        let _persist = self.persist.lock().await;
        let (receipt, op) = {
            let mut queue = self.queue.lock().await;
            let receipt = queue.enqueue_delete(entity_type, entity_id);
            let op = queue.get(&receipt.operation_id).cloned();
            (receipt, op)
        };

        if let Some(op) = op {
            self.db.pending_operations().upsert(&op).await?;
        }
        self.db.cached_entities().remove(entity_id).await?;

        debug!(operation_id = %receipt.operation_id, entity_id, "Delete queued");
        Ok(receipt)
    }

    /// Queues a quantity delta without touching the mirror.
    pub async fn enqueue_quantity_adjustment(&self, entity_id: &str, delta: i64) -> SyncResult<String> {
        self.queue_adjustment(entity_id, delta, false).await
    }

    /// Queues a quantity delta and applies it to the cached `quantity` field.
    pub async fn adjust_quantity(&self, entity_id: &str, delta: i64) -> SyncResult<String> {
        self.queue_adjustment(entity_id, delta, true).await
    }

    async fn queue_adjustment(&self, entity_id: &str, delta: i64, optimistic: bool) -> SyncResult<String> {
        let _persist = self.persist.lock().await;
        let (operation_id, op, entity) = {
            let mut queue = self.queue.lock().await;
            let operation_id = queue.enqueue_quantity_adjustment(entity_id, delta);
            let entity = if optimistic
                && queue.mirror_mut().adjust_numeric_field(entity_id, QUANTITY_FIELD, delta)
            {
                queue.mirror().lookup_by_primary_id(entity_id).cloned()
            } else {
                None
            };
            let op = queue.get(&operation_id).cloned();
            (operation_id, op, entity)
        };

        if let Some(op) = op {
            self.db.pending_operations().upsert(&op).await?;
        }
        if let Some(entity) = entity {
            self.db.cached_entities().upsert(&entity).await?;
        }

        debug!(operation_id = %operation_id, entity_id, delta, "Quantity adjustment queued");
        Ok(operation_id)
    }

    // =========================================================================
    // Mirror
    // =========================================================================

    /// Caches entities fetched from the server and records the refresh time.
    pub async fn refresh_cache(&self, entities: Vec<CachedEntity>) -> SyncResult<()> {
        let _persist = self.persist.lock().await;
        {
            let mut queue = self.queue.lock().await;
            for entity in &entities {
                queue.mirror_mut().upsert(entity.clone());
            }
        }

        self.db.cached_entities().upsert_all(&entities).await?;
        self.db
            .sync_metadata()
            .set_timestamp(LAST_CACHE_SYNC, Utc::now())
            .await?;

        info!(count = entities.len(), "Entity cache refreshed");
        Ok(())
    }

    pub async fn lookup(&self, id: &str) -> Option<CachedEntity> {
        self.queue.lock().await.mirror().lookup_by_primary_id(id).cloned()
    }

    /// Finds a cached entity by barcode, then SKU.
    pub async fn lookup_by_secondary_key(&self, key: &str) -> Option<CachedEntity> {
        self.queue.lock().await.mirror().lookup_by_secondary_key(key).cloned()
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Drains the queue if the device is online.
    pub async fn sync_now<A>(&self, applier: &A) -> SyncResult<SyncReport>
    where
        A: OperationApplier + ?Sized,
    {
        let report = self.drain(applier).await?;
        self.emitter.emit_progress(&report);
        Ok(report)
    }

    /// Resets failed operations and drains again, if the device is online.
    pub async fn retry_failed<A>(&self, applier: &A) -> SyncResult<RetryReport>
    where
        A: OperationApplier + ?Sized,
    {
        if !self.monitor.status() {
            debug!("Offline, retry skipped");
            return Err(SyncError::Offline);
        }

        let retry = self.engine.retry_failed(applier).await?;
        self.record_pass(&retry.report).await?;
        self.emitter.emit_progress(&retry.report);
        Ok(retry)
    }

    /// One recorded pass without the progress event.
    async fn drain<A>(&self, applier: &A) -> SyncResult<SyncReport>
    where
        A: OperationApplier + ?Sized,
    {
        if !self.monitor.status() {
            debug!("Offline, sync skipped");
            return Err(SyncError::Offline);
        }

        let report = self.engine.process_queue(applier).await?;
        self.record_pass(&report).await?;
        Ok(report)
    }

    async fn record_pass(&self, report: &SyncReport) -> SyncResult<()> {
        self.persist_snapshot().await?;

        if report.success_count > 0 {
            self.record_success(Utc::now()).await?;
        }

        let metadata = self.db.sync_metadata();
        match report.last_error() {
            Some(error) => {
                metadata.set(LAST_SYNC_ERROR, error).await?;
                self.history.write().await.last_error = Some(error.to_string());
            }
            None if !report.results.is_empty() => {
                metadata.remove(LAST_SYNC_ERROR).await?;
                self.history.write().await.last_error = None;
            }
            None => {}
        }

        self.emitter.emit_status(&self.status().await);
        Ok(())
    }

    async fn record_success(&self, at: DateTime<Utc>) -> SyncResult<()> {
        self.db
            .sync_metadata()
            .set_timestamp(LAST_SUCCESSFUL_SYNC, at)
            .await?;
        self.history.write().await.last_sync = Some(at);
        Ok(())
    }

    async fn persist_snapshot(&self) -> SyncResult<()> {
        let _persist = self.persist.lock().await;
        let snapshot = self.queue.lock().await.snapshot();
        self.db.save_snapshot(&snapshot).await?;
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Gives one failed operation a fresh retry budget.
    pub async fn reset_operation(&self, operation_id: &str) -> SyncResult<()> {
        let _persist = self.persist.lock().await;
        let op = {
            let mut queue = self.queue.lock().await;
            queue.reset_operation(operation_id)?;
            queue.get(operation_id).cloned()
        };

        if let Some(op) = op {
            self.db.pending_operations().upsert(&op).await?;
        }
        Ok(())
    }

    /// Drops completed operations. Returns how many were removed.
    pub async fn clear_completed(&self) -> SyncResult<usize> {
        let _persist = self.persist.lock().await;
        let removed = self.queue.lock().await.clear_completed();
        self.db.pending_operations().delete_completed().await?;

        debug!(removed, "Completed operations cleared");
        Ok(removed)
    }

    /// Empties the queue, the mirror and the stored copies of both.
    pub async fn clear(&self) -> SyncResult<()> {
        self.queue.lock().await.clear();
        self.persist_snapshot().await?;
        info!("Offline queue cleared");
        Ok(())
    }

    // =========================================================================
    // Scan Sessions
    // =========================================================================

    pub async fn start_scan_session(&self, name: Option<String>) -> SyncResult<ScanSession> {
        let session = ScanSession::new(name);
        self.db.scan_sessions().save(&session).await?;

        info!(session_id = %session.id, "Scan session started");
        Ok(session)
    }

    pub async fn scan_session(&self, id: &str) -> SyncResult<Option<ScanSession>> {
        Ok(self.db.scan_sessions().get(id).await?)
    }

    /// Most recently used session that is not completed.
    pub async fn active_scan_session(&self) -> SyncResult<Option<ScanSession>> {
        Ok(self.db.scan_sessions().active().await?)
    }

    /// Every stored session, newest first.
    pub async fn scan_sessions(&self) -> SyncResult<Vec<ScanSession>> {
        Ok(self.db.scan_sessions().list_all().await?)
    }

    /// Records a scan, resolving the code against the mirror by barcode, then SKU.
    pub async fn record_scan(
        &self,
        session_id: &str,
        code: &str,
        quantity: i64,
    ) -> SyncResult<ScanEntry> {
        let _persist = self.persist.lock().await;
        let mut session = self.load_scan_session(session_id).await?;

        let entity_id = self
            .queue
            .lock()
            .await
            .mirror()
            .lookup_by_secondary_key(code)
            .map(|entity| entity.id.clone());
        let entry = session.record(code, entity_id, quantity)?.clone();
        self.db.scan_sessions().save(&session).await?;

        debug!(
            session_id,
            code,
            entity_id = entry.entity_id.as_deref().unwrap_or("-"),
            quantity,
            "Scan recorded"
        );
        Ok(entry)
    }

    /// Closes a session. Completing it twice is a no-op.
    pub async fn complete_scan_session(&self, session_id: &str) -> SyncResult<ScanSession> {
        let _persist = self.persist.lock().await;
        let mut session = self.load_scan_session(session_id).await?;

        if session.complete() {
            self.db.scan_sessions().save(&session).await?;
            info!(session_id, scans = session.entries.len(), "Scan session completed");
        }
        Ok(session)
    }

    /// Deletes a session. Returns false if it did not exist.
    pub async fn delete_scan_session(&self, session_id: &str) -> SyncResult<bool> {
        let _persist = self.persist.lock().await;
        Ok(self.db.scan_sessions().delete(session_id).await?)
    }

    async fn load_scan_session(&self, session_id: &str) -> SyncResult<ScanSession> {
        self.db
            .scan_sessions()
            .get(session_id)
            .await?
            .ok_or_else(|| SyncError::ScanSessionNotFound(session_id.to_string()))
    }

    // =========================================================================
    // Status & Background Tasks
    // =========================================================================

    pub async fn status(&self) -> SyncStatus {
        let (pending_count, failed_count) = {
            let queue = self.queue.lock().await;
            (queue.pending_count(), queue.failed_count())
        };
        let history = self.history.read().await;

        SyncStatus {
            online: self.monitor.status(),
            pending_count,
            failed_count,
            last_sync: history.last_sync,
            last_error: history.last_error.clone(),
            sync_in_progress: self.engine.is_sync_in_progress(),
        }
    }

    /// Starts probing at the configured interval.
    pub fn start_probing<P>(&self, probe: Arc<P>) -> Option<ProbeHandle>
    where
        P: ConnectivityProbe + ?Sized + 'static,
    {
        self.monitor.start_probing(probe, self.config.probe_interval())
    }

    /// Starts auto-sync unless it is disabled in the config.
    pub fn start_auto_sync(
        self: &Arc<Self>,
        applier: Arc<dyn OperationApplier>,
    ) -> Option<AutoSyncHandle> {
        if !self.config.auto_sync.enabled {
            info!("Auto-sync disabled by config");
            return None;
        }

        let target = AgentTarget {
            agent: Arc::clone(self),
            applier,
        };
        let handle = AutoSync::new(Arc::new(target), self.monitor.clone(), self.emitter.clone())
            .with_delay(self.config.auto_sync_delay())
            .spawn();
        Some(handle)
    }
}

/// Auto-sync through the agent, so passes are persisted.
struct AgentTarget {
    agent: Arc<OfflineSyncAgent>,
    applier: Arc<dyn OperationApplier>,
}

#[async_trait]
impl SyncTarget for AgentTarget {
    fn is_sync_in_progress(&self) -> bool {
        self.agent.engine.is_sync_in_progress()
    }

    async fn pending_count(&self) -> usize {
        self.agent.queue.lock().await.pending_count()
    }

    async fn sync(&self) -> SyncResult<SyncReport> {
        self.agent.drain(self.applier.as_ref()).await
    }
}
