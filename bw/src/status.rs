//! Read-only status surface
//!
//! Health and monitoring adapters observe a running worker through a
//! [`StatusHandle`]. The handle is cheap to clone and never blocks the loop;
//! every field is an atomic or a short critical section.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::drain::DrainManager;
use crate::health::{HealthPolicy, HealthState, HealthTracker};
use crate::source::DispatchOutcome;

/// Scheduler loop lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LoopState {
    Starting = 0,
    Running = 1,
    FetchingBatch = 2,
    Dispatching = 3,
    /// Delay after a failed cycle
    Backoff = 4,
    /// Steady-interval delay after a successful cycle
    Idle = 5,
    Draining = 6,
    Stopped = 7,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Starting,
            1 => LoopState::Running,
            2 => LoopState::FetchingBatch,
            3 => LoopState::Dispatching,
            4 => LoopState::Backoff,
            5 => LoopState::Idle,
            6 => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoopState::Starting => "starting",
            LoopState::Running => "running",
            LoopState::FetchingBatch => "fetching-batch",
            LoopState::Dispatching => "dispatching",
            LoopState::Backoff => "backoff",
            LoopState::Idle => "idle",
            LoopState::Draining => "draining",
            LoopState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Batch and item counters (thread-safe)
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    batches_succeeded: AtomicU64,
    batches_failed: AtomicU64,
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    items_cancelled: AtomicU64,
}

impl WorkerMetrics {
    pub fn record_batch(&self, success: bool) {
        let counter = if success {
            &self.batches_succeeded
        } else {
            &self.batches_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Success => &self.items_succeeded,
            DispatchOutcome::ItemFailure(_) => &self.items_failed,
            DispatchOutcome::Cancelled => &self.items_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches_succeeded(&self) -> u64 {
        self.batches_succeeded.load(Ordering::Relaxed)
    }

    pub fn batches_failed(&self) -> u64 {
        self.batches_failed.load(Ordering::Relaxed)
    }

    pub fn items_succeeded(&self) -> u64 {
        self.items_succeeded.load(Ordering::Relaxed)
    }

    pub fn items_failed(&self) -> u64 {
        self.items_failed.load(Ordering::Relaxed)
    }

    pub fn items_cancelled(&self) -> u64 {
        self.items_cancelled.load(Ordering::Relaxed)
    }
}

/// Shared state written by the loop and its dispatched units
#[derive(Debug)]
pub(crate) struct WorkerStatus {
    pub(crate) health: HealthTracker,
    pub(crate) metrics: WorkerMetrics,
    pub(crate) drain: Arc<DrainManager>,
    state: AtomicU8,
}

impl WorkerStatus {
    pub(crate) fn new(policy: HealthPolicy, drain: Arc<DrainManager>) -> Self {
        Self {
            health: HealthTracker::new(policy),
            metrics: WorkerMetrics::default(),
            drain,
            state: AtomicU8::new(LoopState::Starting as u8),
        }
    }

    pub(crate) fn set_state(&self, state: LoopState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// Capability contract for anything that can report worker health
pub trait HealthReport {
    /// Derived health right now
    fn health_state(&self) -> HealthState;

    /// Time of the last fully successful batch (worker start until the first one)
    fn last_success_timestamp(&self) -> DateTime<Utc>;

    /// Current run of consecutive failed batches
    fn consecutive_failures(&self) -> u32;

    /// Anything short of unhealthy keeps the worker in service
    fn is_healthy(&self) -> bool {
        self.health_state() != HealthState::Unhealthy
    }
}

/// Point-in-time view of a worker, for adapters and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub health: HealthState,
    pub state: LoopState,
    pub consecutive_failures: u32,
    pub last_success: DateTime<Utc>,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_cancelled: u64,
}

/// Cloneable read-only handle onto a worker's status
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<WorkerStatus>,
}

impl StatusHandle {
    pub(crate) fn new(inner: Arc<WorkerStatus>) -> Self {
        Self { inner }
    }

    /// Current loop lifecycle state
    pub fn state(&self) -> LoopState {
        self.inner.state()
    }

    /// Number of items currently executing
    pub fn in_flight(&self) -> usize {
        self.inner.drain.in_flight()
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.inner.metrics
    }

    /// Health as it would be at `now`
    pub fn health_state_at(&self, now: DateTime<Utc>) -> HealthState {
        self.inner.health.evaluate_at(now)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let metrics = &self.inner.metrics;
        StatusSnapshot {
            health: self.health_state(),
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            last_success: self.last_success_timestamp(),
            in_flight: self.inner.drain.in_flight(),
            peak_in_flight: self.inner.drain.peak_in_flight(),
            batches_succeeded: metrics.batches_succeeded(),
            batches_failed: metrics.batches_failed(),
            items_succeeded: metrics.items_succeeded(),
            items_failed: metrics.items_failed(),
            items_cancelled: metrics.items_cancelled(),
        }
    }
}

impl HealthReport for StatusHandle {
    fn health_state(&self) -> HealthState {
        self.inner.health.health_state()
    }

    fn last_success_timestamp(&self) -> DateTime<Utc> {
        self.inner.health.last_success()
    }

    fn consecutive_failures(&self) -> u32 {
        self.inner.health.consecutive_failures()
    }
}
