//! # Auto-Sync
//!
//! Drains the queue shortly after the device comes back online.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  OnlineStatusMonitor ──(transition)──► channel ──► auto-sync task      │
//! │                                                     │                   │
//! │          offline → online:  emit online, arm delay timer (2s)          │
//! │          online → offline:  emit offline, disarm timer                 │
//! │          timer fires:       skip if busy or empty, else drain          │
//! │          shutdown:          unsubscribe and exit                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only transitions schedule a drain. A monitor that is already online when
//! auto-sync starts waits for the next reconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::agent::SyncEventEmitter;
use crate::applier::OperationApplier;
use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use crate::monitor::{OnlineStatusMonitor, Subscription};

/// Default wait between reconnecting and draining.
pub const DEFAULT_AUTO_SYNC_DELAY: Duration = Duration::from_millis(2000);

// =============================================================================
// Sync Target
// =============================================================================

/// What auto-sync drains.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    fn is_sync_in_progress(&self) -> bool;

    async fn pending_count(&self) -> usize;

    /// Runs one pass. Auto-sync emits the progress event for it, so
    /// implementations must not.
    async fn sync(&self) -> SyncResult<SyncReport>;
}

/// Drains a bare [`SyncEngine`] through a fixed applier.
pub struct EngineTarget {
    engine: Arc<SyncEngine>,
    applier: Arc<dyn OperationApplier>,
}

impl EngineTarget {
    pub fn new(engine: Arc<SyncEngine>, applier: Arc<dyn OperationApplier>) -> Self {
        EngineTarget { engine, applier }
    }
}

#[async_trait]
impl SyncTarget for EngineTarget {
    fn is_sync_in_progress(&self) -> bool {
        self.engine.is_sync_in_progress()
    }

    async fn pending_count(&self) -> usize {
        self.engine.queue().lock().await.pending_count()
    }

    async fn sync(&self) -> SyncResult<SyncReport> {
        self.engine.process_queue(self.applier.as_ref()).await
    }
}

// =============================================================================
// Auto-Sync Task
// =============================================================================

/// Reconnect-triggered drain loop. Start it with [`AutoSync::spawn`].
pub struct AutoSync {
    target: Arc<dyn SyncTarget>,
    monitor: OnlineStatusMonitor,
    emitter: Arc<dyn SyncEventEmitter>,
    delay: Duration,
}

impl AutoSync {
    pub fn new(
        target: Arc<dyn SyncTarget>,
        monitor: OnlineStatusMonitor,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        AutoSync {
            target,
            monitor,
            emitter,
            delay: DEFAULT_AUTO_SYNC_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Subscribes to the monitor and starts the task on the current runtime.
    pub fn spawn(self) -> AutoSyncHandle {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let subscription = self.monitor.subscribe(move |online| {
            let _ = status_tx.send(online);
        });
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        info!(delay_ms = self.delay.as_millis() as u64, "Starting auto-sync");
        let task = tokio::spawn(self.run(status_rx, shutdown_rx, subscription));

        AutoSyncHandle { shutdown_tx, task }
    }

    async fn run(
        self,
        mut status_rx: mpsc::UnboundedReceiver<bool>,
        mut shutdown_rx: mpsc::Receiver<()>,
        subscription: Subscription,
    ) {
        let timer = tokio::time::sleep(self.delay);
        tokio::pin!(timer);
        let mut armed = false;

        loop {
            tokio::select! {
                Some(online) = status_rx.recv() => {
                    self.emitter.emit_connectivity(online);
                    if online {
                        debug!(delay_ms = self.delay.as_millis() as u64, "Back online, sync scheduled");
                        timer.as_mut().reset(Instant::now() + self.delay);
                        armed = true;
                    } else if armed {
                        info!("Went offline, scheduled sync cancelled");
                        armed = false;
                    }
                }

                () = &mut timer, if armed => {
                    armed = false;
                    self.sync_once().await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Auto-sync received shutdown");
                    break;
                }
            }
        }

        subscription.unsubscribe();
    }

    async fn sync_once(&self) {
        if self.target.is_sync_in_progress() {
            debug!("Sync already running, auto-sync skipped");
            return;
        }

        let pending = self.target.pending_count().await;
        if pending == 0 {
            debug!("Nothing pending, auto-sync skipped");
            return;
        }

        info!(pending, "Auto-sync starting");
        match self.target.sync().await {
            Ok(report) => self.emitter.emit_progress(&report),
            Err(SyncError::SyncInProgress) => debug!("Lost race with another sync pass"),
            Err(e) => {
                error!(error = %e, "Auto-sync failed");
                self.emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }
    }
}

/// Controls a running auto-sync task. Dropping it also stops the task.
#[derive(Debug)]
pub struct AutoSyncHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Signals the task to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::agent::SyncStatus;

    #[derive(Default)]
    struct FakeTarget {
        busy: AtomicBool,
        pending: AtomicUsize,
        syncs: AtomicUsize,
    }

    #[async_trait]
    impl SyncTarget for FakeTarget {
        fn is_sync_in_progress(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        async fn pending_count(&self) -> usize {
            self.pending.load(Ordering::SeqCst)
        }

        async fn sync(&self) -> SyncResult<SyncReport> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            self.pending.store(0, Ordering::SeqCst);
            Ok(SyncReport::default())
        }
    }

    #[derive(Default)]
    struct RecordingEmitter {
        events: Mutex<Vec<String>>,
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_status(&self, _status: &SyncStatus) {}

        fn emit_connectivity(&self, online: bool) {
            let name = if online { "online" } else { "offline" };
            self.events.lock().unwrap().push(name.to_string());
        }

        fn emit_progress(&self, report: &SyncReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("progress:{}", report.success_count));
        }

        fn emit_error(&self, message: &str, _retryable: bool) {
            self.events.lock().unwrap().push(format!("error:{}", message));
        }
    }

    fn setup(pending: usize) -> (Arc<FakeTarget>, Arc<RecordingEmitter>, OnlineStatusMonitor, AutoSyncHandle) {
        let target = Arc::new(FakeTarget::default());
        target.pending.store(pending, Ordering::SeqCst);
        let emitter = Arc::new(RecordingEmitter::default());
        let monitor = OnlineStatusMonitor::new(false);

        let handle = AutoSync::new(target.clone(), monitor.clone(), emitter.clone()).spawn();
        (target, emitter, monitor, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_syncs_after_delay_on_reconnect() {
        let (target, emitter, monitor, handle) = setup(2);

        monitor.set_status(true);
        tokio::time::sleep(Duration::from_millis(1999)).await;
        assert_eq!(target.syncs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(target.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(*emitter.events.lock().unwrap(), vec!["online", "progress:0"]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_going_offline_cancels_scheduled_sync() {
        let (target, emitter, monitor, handle) = setup(2);

        monitor.set_status(true);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        monitor.set_status(false);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(target.syncs.load(Ordering::SeqCst), 0);
        assert_eq!(*emitter.events.lock().unwrap(), vec!["online", "offline"]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_when_empty_or_busy() {
        let (target, _emitter, monitor, handle) = setup(0);

        monitor.set_status(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(target.syncs.load(Ordering::SeqCst), 0);

        target.pending.store(1, Ordering::SeqCst);
        target.busy.store(true, Ordering::SeqCst);
        monitor.set_status(false);
        monitor.set_status(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(target.syncs.load(Ordering::SeqCst), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_unsubscribes() {
        let (target, _emitter, monitor, handle) = setup(1);
        assert_eq!(monitor.subscriber_count(), 1);

        handle.shutdown().await;
        assert_eq!(monitor.subscriber_count(), 0);

        monitor.set_status(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(target.syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_real_engine() {
        use stockzip_core::{EntityType, MutationQueue, QueuedOperation};

        let mut queue = MutationQueue::new();
        queue.enqueue_delete(EntityType::Item, "item-1");
        let engine = Arc::new(SyncEngine::new(Arc::new(tokio::sync::Mutex::new(queue))));
        let applier: Arc<dyn OperationApplier> =
            Arc::new(|_op: QueuedOperation| async { Ok::<_, SyncError>(true) });

        let monitor = OnlineStatusMonitor::new(false);
        let handle = AutoSync::new(
            Arc::new(EngineTarget::new(engine.clone(), applier)),
            monitor.clone(),
            Arc::new(crate::agent::NoOpEmitter),
        )
        .with_delay(Duration::from_millis(100))
        .spawn();

        monitor.set_status(true);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(engine.queue().lock().await.pending_count(), 0);
        handle.shutdown().await;
    }
}
