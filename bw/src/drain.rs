//! Drain manager - in-flight registry and bounded shutdown wait
//!
//! Every dispatched item registers here and receives a [`DispatchHandle`].
//! Dropping the handle removes the entry, so a unit that fails, panics or is
//! cancelled still unregisters. The entry map and the published in-flight
//! count are updated under one mutex; waiters observe the count through a
//! `watch` channel, which re-checks the current value before suspending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Monotonically increasing id assigned at dispatch
pub type DispatchId = u64;

/// One currently executing dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightEntry {
    pub dispatch_id: DispatchId,
    pub item_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<DispatchId, InFlightEntry>,
    peak: usize,
}

/// Tracks in-flight dispatches and waits for them at shutdown
#[derive(Debug)]
pub struct DrainManager {
    next_id: AtomicU64,
    registry: Mutex<Registry>,
    in_flight_tx: watch::Sender<usize>,
}

impl Default for DrainManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DrainManager {
    pub fn new() -> Self {
        debug!("DrainManager::new: called");
        let (in_flight_tx, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry::default()),
            in_flight_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Registry updates cannot leave it half-written, so a poisoned lock is still usable
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a dispatch for `item_id`
    pub fn register(self: &Arc<Self>, item_id: &str) -> DispatchHandle {
        let dispatch_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = InFlightEntry {
            dispatch_id,
            item_id: item_id.to_string(),
            started_at: Utc::now(),
        };

        {
            let mut registry = self.lock();
            registry.entries.insert(dispatch_id, entry);
            registry.peak = registry.peak.max(registry.entries.len());
            self.in_flight_tx.send_replace(registry.entries.len());
        }

        debug!(dispatch_id, %item_id, "DrainManager::register: registered");
        DispatchHandle {
            dispatch_id,
            manager: Arc::clone(self),
        }
    }

    /// Unregister a dispatch; equivalent to dropping its handle
    pub fn unregister(&self, handle: DispatchHandle) {
        debug!(dispatch_id = handle.dispatch_id, "DrainManager::unregister: called");
        drop(handle);
    }

    fn remove(&self, dispatch_id: DispatchId) {
        let mut registry = self.lock();
        if registry.entries.remove(&dispatch_id).is_some() {
            self.in_flight_tx.send_replace(registry.entries.len());
        }
    }

    /// Number of dispatches currently registered
    pub fn in_flight(&self) -> usize {
        self.lock().entries.len()
    }

    /// Highest number of simultaneously registered dispatches seen so far
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak
    }

    /// Registered dispatches ordered by dispatch id
    pub fn snapshot(&self) -> Vec<InFlightEntry> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by_key(|e| e.dispatch_id);
        entries
    }

    /// Wait until nothing is in flight or `timeout` elapses.
    ///
    /// Returns `true` if every registered dispatch finished in time. Work still
    /// running when the timeout fires is abandoned, not killed, and is logged.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut in_flight_rx = self.in_flight_tx.subscribe();
        let pending = *in_flight_rx.borrow();
        info!(pending, timeout_ms = timeout.as_millis() as u64, "Draining in-flight work");

        match tokio::time::timeout(timeout, in_flight_rx.wait_for(|count| *count == 0)).await {
            // The sender lives in self, so the channel cannot close while we wait
            Ok(_) => {
                info!("Drain complete, no work in flight");
                true
            }
            Err(_) => {
                let abandoned = self.snapshot();
                warn!(
                    abandoned = abandoned.len(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Drain timed out, abandoning in-flight work"
                );
                for entry in &abandoned {
                    warn!(
                        dispatch_id = entry.dispatch_id,
                        item_id = %entry.item_id,
                        started_at = %entry.started_at,
                        "Abandoned in-flight item"
                    );
                }
                false
            }
        }
    }
}

/// Registration of one in-flight dispatch; unregisters on drop
#[derive(Debug)]
pub struct DispatchHandle {
    dispatch_id: DispatchId,
    manager: Arc<DrainManager>,
}

impl DispatchHandle {
    pub fn dispatch_id(&self) -> DispatchId {
        self.dispatch_id
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.manager.remove(self.dispatch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_increasing_ids() {
        let manager = Arc::new(DrainManager::new());
        let a = manager.register("a");
        let b = manager.register("b");
        assert!(b.dispatch_id() > a.dispatch_id());
        assert_eq!(manager.in_flight(), 2);

        let snapshot = manager.snapshot();
        assert_eq!(snapshot[0].item_id, "a");
        assert_eq!(snapshot[1].item_id, "b");
    }

    #[test]
    fn test_drop_and_unregister_remove_entries() {
        let manager = Arc::new(DrainManager::new());
        let a = manager.register("a");
        let b = manager.register("b");

        drop(a);
        assert_eq!(manager.in_flight(), 1);
        manager.unregister(b);
        assert_eq!(manager.in_flight(), 0);
        assert_eq!(manager.peak_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight() {
        let manager = DrainManager::new();
        assert!(manager.drain(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_completes_when_work_finishes() {
        let manager = Arc::new(DrainManager::new());
        for (i, latency) in [100u64, 250, 400].into_iter().enumerate() {
            let handle = manager.register(&format!("item-{i}"));
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(latency)).await;
                drop(handle);
            });
        }

        let start = tokio::time::Instant::now();
        assert!(manager.drain(Duration::from_secs(1)).await);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_without_killing_work() {
        let manager = Arc::new(DrainManager::new());
        let handle = manager.register("slow");
        let worker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(handle);
        });

        let start = tokio::time::Instant::now();
        assert!(!manager.drain(Duration::from_secs(1)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        // The abandoned task keeps running and unregisters on its own
        assert_eq!(manager.in_flight(), 1);
        worker.await.unwrap();
        assert_eq!(manager.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_finishing_at_timeout_boundary() {
        let manager = Arc::new(DrainManager::new());
        let handle = manager.register("edge");
        drop(handle);

        // Completion is checked before the deadline, so a zero timeout still succeeds
        assert!(manager.drain(Duration::ZERO).await);

        let handle = manager.register("late");
        let finisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(handle);
        });
        assert!(!manager.drain(Duration::from_millis(499)).await);
        finisher.await.unwrap();
        assert!(manager.drain(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_remove() {
        let manager = Arc::new(DrainManager::new());
        let mut tasks = Vec::new();
        for i in 0..64 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                let handle = manager.register(&format!("item-{i}"));
                tokio::task::yield_now().await;
                drop(handle);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(manager.in_flight(), 0);
        assert!(manager.drain(Duration::from_millis(10)).await);
    }
}
