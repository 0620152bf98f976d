//! # Online-Status Monitor
//!
//! Tracks whether the server is reachable and tells subscribers when that
//! changes.
//!
//! ## Probe Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   start_probing(probe, 30s) ──► ProbeHandle (stop() or drop to end)    │
//! │         │                                                               │
//! │         ▼   every interval, first tick one interval after start        │
//! │   ┌──────────────┐  Ok(v)   ┌──────────────┐  changed?  ┌───────────┐ │
//! │   │ probe.probe()│─────────►│ set_status(v)│───────────►│subscribers│ │
//! │   │              │  Err ──► │ set_status(  │            │ (in order)│ │
//! │   └──────────────┘          │   false)     │            └───────────┘ │
//! │                             └──────────────┘                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The monitor starts online. Callbacks only fire on real transitions and
//! run outside the internal lock, so a callback may call back into the
//! monitor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::applier::ConnectivityProbe;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

struct MonitorState {
    online: bool,
    subscribers: Vec<(u64, Callback)>,
    next_subscriber: u64,
    last_ping: Option<DateTime<Utc>>,
    probe: Option<(u64, AbortHandle)>,
    next_probe: u64,
}

struct Inner {
    state: Mutex<MonitorState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Aborts the probe loop. With a generation, only if that loop is current.
    fn stop_probe(&self, generation: Option<u64>) -> bool {
        let mut state = self.lock();
        let current = match (&state.probe, generation) {
            (Some((running, _)), Some(g)) => *running == g,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !current {
            return false;
        }

        if let Some((_, abort)) = state.probe.take() {
            abort.abort();
        }
        true
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Shared connectivity state. Clones observe the same status.
#[derive(Clone)]
pub struct OnlineStatusMonitor {
    inner: Arc<Inner>,
}

impl Default for OnlineStatusMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for OnlineStatusMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("OnlineStatusMonitor")
            .field("online", &state.online)
            .field("subscribers", &state.subscribers.len())
            .field("probing", &state.probe.is_some())
            .field("last_ping", &state.last_ping)
            .finish()
    }
}

impl OnlineStatusMonitor {
    pub fn new(online: bool) -> Self {
        OnlineStatusMonitor {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitorState {
                    online,
                    subscribers: Vec::new(),
                    next_subscriber: 0,
                    last_ping: None,
                    probe: None,
                    next_probe: 0,
                }),
            }),
        }
    }

    pub fn status(&self) -> bool {
        self.inner.lock().online
    }

    /// Sets the status, notifying subscribers in subscription order if it
    /// changed.
    pub fn set_status(&self, online: bool) {
        let subscribers: Vec<Callback> = {
            let mut state = self.inner.lock();
            if state.online == online {
                return;
            }
            state.online = online;
            state.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        info!(online, subscribers = subscribers.len(), "Connectivity changed");
        for callback in subscribers {
            callback(online);
        }
    }

    /// Registers a transition callback.
    ///
    /// The subscription stays active until [`Subscription::unsubscribe`] is
    /// called; dropping the returned value does not unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push((id, Arc::new(callback)));

        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    // =========================================================================
    // Probing
    // =========================================================================

    /// Starts probing every `interval` on the current tokio runtime.
    ///
    /// Returns `None` when a probe loop is already running. The first probe
    /// runs one interval after this call.
    pub fn start_probing<P>(&self, probe: Arc<P>, interval: Duration) -> Option<ProbeHandle>
    where
        P: ConnectivityProbe + ?Sized + 'static,
    {
        let mut state = self.inner.lock();
        if state.probe.is_some() {
            debug!("Probe loop already running");
            return None;
        }

        let interval = interval.max(Duration::from_millis(1));
        let generation = state.next_probe;
        state.next_probe += 1;

        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                OnlineStatusMonitor { inner }.ping(probe.as_ref()).await;
            }
        });

        state.probe = Some((generation, task.abort_handle()));
        info!(interval_ms = interval.as_millis() as u64, "Started connectivity probing");

        Some(ProbeHandle {
            inner: Arc::downgrade(&self.inner),
            generation,
        })
    }

    pub fn is_probing(&self) -> bool {
        self.inner.lock().probe.is_some()
    }

    /// Probes once, right now, and applies the result.
    pub async fn ping<P>(&self, probe: &P) -> bool
    where
        P: ConnectivityProbe + ?Sized,
    {
        let online = match probe.probe().await {
            Ok(online) => {
                self.inner.lock().last_ping = Some(Utc::now());
                online
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        };

        self.set_status(online);
        online
    }

    /// Time of the last probe that got an answer, reachable or not.
    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_ping
    }

    /// Stops any probe loop and discards every subscriber.
    pub fn stop(&self) {
        if self.inner.stop_probe(None) {
            info!("Stopped connectivity probing");
        }
        self.inner.lock().subscribers.clear();
    }
}

// =============================================================================
// Handles
// =============================================================================

/// Registration returned by [`OnlineStatusMonitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    /// Removes the callback. Calling this again is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().subscribers.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owns a running probe loop. Stops it on [`ProbeHandle::stop`] or drop.
#[derive(Debug)]
pub struct ProbeHandle {
    inner: Weak<Inner>,
    generation: u64,
}

impl ProbeHandle {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if inner.stop_probe(Some(self.generation)) {
                info!("Stopped connectivity probing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::SyncError;

    fn recorder(monitor: &OnlineStatusMonitor) -> (Arc<Mutex<Vec<bool>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |online| sink.lock().unwrap().push(online));
        (seen, sub)
    }

    #[test]
    fn test_starts_online() {
        assert!(OnlineStatusMonitor::default().status());
        assert!(!OnlineStatusMonitor::new(false).status());
    }

    #[test]
    fn test_notifies_only_on_transitions() {
        let monitor = OnlineStatusMonitor::default();
        let (seen, _sub) = recorder(&monitor);

        monitor.set_status(true);
        monitor.set_status(false);
        monitor.set_status(false);
        monitor.set_status(true);

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_subscribers_called_in_order() {
        let monitor = OnlineStatusMonitor::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            monitor.subscribe(move |_| order.lock().unwrap().push(name));
        }

        monitor.set_status(false);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let monitor = OnlineStatusMonitor::default();
        let (seen, sub) = recorder(&monitor);
        let (other, _other_sub) = recorder(&monitor);

        sub.unsubscribe();
        sub.unsubscribe();
        monitor.set_status(false);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(*other.lock().unwrap(), vec![false]);
        assert_eq!(monitor.subscriber_count(), 1);
    }

    #[test]
    fn test_callback_may_reenter_monitor() {
        let monitor = OnlineStatusMonitor::default();
        let observed = Arc::new(Mutex::new(None));
        {
            let monitor_in_cb = monitor.clone();
            let observed = observed.clone();
            monitor.subscribe(move |_| {
                *observed.lock().unwrap() = Some(monitor_in_cb.status());
            });
        }

        monitor.set_status(false);
        assert_eq!(*observed.lock().unwrap(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_probe_after_one_interval() {
        let monitor = OnlineStatusMonitor::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = {
            let calls = calls.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(false) }
            })
        };

        let _handle = monitor.start_probing(probe, Duration::from_secs(30)).unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(monitor.status());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!monitor.status());
        assert!(monitor.last_ping().is_some());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_means_offline() {
        let monitor = OnlineStatusMonitor::default();
        let (seen, _sub) = recorder(&monitor);
        let probe = Arc::new(|| async { Err::<bool, _>(SyncError::ConnectionFailed("dns".into())) });

        let _handle = monitor.start_probing(probe, Duration::from_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!monitor.status());
        assert!(monitor.last_ping().is_none());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_noop_and_stop_ends_loop() {
        let monitor = OnlineStatusMonitor::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = {
            let calls = calls.clone();
            Arc::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, SyncError>(true) }
            })
        };

        let handle = monitor.start_probing(probe.clone(), Duration::from_secs(1)).unwrap();
        assert!(monitor.start_probing(probe.clone(), Duration::from_secs(1)).is_none());
        assert!(monitor.is_probing());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handle.stop();
        assert!(!monitor.is_probing());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Probing can be restarted once the old loop is gone.
        let _again = monitor.start_probing(probe, Duration::from_secs(1)).unwrap();
        assert!(monitor.is_probing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_does_not_stop_new_loop() {
        let monitor = OnlineStatusMonitor::default();
        let probe = Arc::new(|| async { Ok::<_, SyncError>(true) });

        let first = monitor.start_probing(probe.clone(), Duration::from_secs(1)).unwrap();
        monitor.stop();
        let _second = monitor.start_probing(probe, Duration::from_secs(1)).unwrap();

        drop(first);
        assert!(monitor.is_probing());
    }

    #[tokio::test]
    async fn test_ping_applies_result_immediately() {
        let monitor = OnlineStatusMonitor::default();
        let (seen, _sub) = recorder(&monitor);

        let offline = || async { Ok::<_, SyncError>(false) };
        assert!(!monitor.ping(&offline).await);
        assert!(!monitor.status());
        let first_ping = monitor.last_ping().unwrap();

        let online = || async { Ok::<_, SyncError>(true) };
        assert!(monitor.ping(&online).await);
        assert!(monitor.last_ping().unwrap() >= first_ping);
        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_stop_discards_subscribers() {
        let monitor = OnlineStatusMonitor::default();
        let (seen, _sub) = recorder(&monitor);

        monitor.stop();
        monitor.set_status(false);

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(monitor.subscriber_count(), 0);
    }
}
