//! Health tracking
//!
//! Health is never stored. It is derived on every read from the time of the
//! last fully successful batch and the current run of consecutive batch
//! failures, so it cannot go stale while the loop is stuck.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{from_ms, now_ms};

/// Derived health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Thresholds for health derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Consecutive batch failures at which the worker is unhealthy
    pub failure_threshold: u32,

    /// Time since last success at which the worker is degraded
    pub degraded_staleness: Duration,

    /// Time since last success at which the worker is unhealthy
    pub unhealthy_staleness: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            degraded_staleness: Duration::from_secs(5 * 60),
            unhealthy_staleness: Duration::from_secs(10 * 60),
        }
    }
}

impl HealthPolicy {
    /// Classify health at `now`
    pub fn evaluate(&self, now: DateTime<Utc>, last_success: DateTime<Utc>, consecutive_failures: u32) -> HealthState {
        // A last_success in the future (clock step) counts as fresh
        let staleness = now.signed_duration_since(last_success).to_std().unwrap_or_default();

        if consecutive_failures >= self.failure_threshold || staleness >= self.unhealthy_staleness {
            HealthState::Unhealthy
        } else if staleness >= self.degraded_staleness {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

/// Success timestamp and failure count, shared between the loop and readers
#[derive(Debug)]
pub struct HealthTracker {
    policy: HealthPolicy,
    last_success_ms: AtomicI64,
    consecutive_failures: AtomicU32,
}

impl HealthTracker {
    /// Create a tracker; the start time counts as the first success
    pub fn new(policy: HealthPolicy) -> Self {
        Self::starting_at(policy, Utc::now())
    }

    /// Create a tracker with an explicit start time
    pub fn starting_at(policy: HealthPolicy, started: DateTime<Utc>) -> Self {
        debug!(?policy, %started, "HealthTracker::starting_at: called");
        Self {
            policy,
            last_success_ms: AtomicI64::new(started.timestamp_millis()),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a fully successful batch cycle
    pub fn record_success(&self) {
        self.record_success_at(Utc::now());
    }

    /// Record a fully successful batch cycle at `at`
    pub fn record_success_at(&self, at: DateTime<Utc>) {
        // fetch_max keeps the timestamp monotonic if calls race
        self.last_success_ms.fetch_max(at.timestamp_millis(), Ordering::SeqCst);
    }

    /// Mirror the retry controller's failure count
    pub fn set_consecutive_failures(&self, failures: u32) {
        self.consecutive_failures.store(failures, Ordering::SeqCst);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_success(&self) -> DateTime<Utc> {
        from_ms(self.last_success_ms.load(Ordering::SeqCst))
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Health right now
    pub fn health_state(&self) -> HealthState {
        self.evaluate_at(from_ms(now_ms()))
    }

    /// Health as it would be at `now`
    pub fn evaluate_at(&self, now: DateTime<Utc>) -> HealthState {
        self.policy
            .evaluate(now, self.last_success(), self.consecutive_failures())
    }
}
