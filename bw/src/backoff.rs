//! Retry state and exponential backoff policy
//!
//! The policy is a pure function of the previous [`RetryState`] and whether
//! the last batch succeeded. Sleeping is left to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Consecutive batch failures and the delay before the next cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub next_delay: Duration,
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure, and after any success
    pub base_delay: Duration,

    /// Absolute ceiling on any computed delay
    pub max_delay: Duration,

    /// Largest exponent applied to `base_delay` (6 means at most 64x)
    pub exponent_cap: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            exponent_cap: 6,
        }
    }
}

impl BackoffPolicy {
    /// State before any batch has run
    pub fn initial_state(&self) -> RetryState {
        RetryState {
            consecutive_failures: 0,
            next_delay: self.base_delay,
        }
    }

    /// Fold one batch outcome into the retry state
    pub fn next(&self, state: RetryState, success: bool) -> RetryState {
        if success {
            debug!(previous_failures = state.consecutive_failures, "BackoffPolicy::next: success, resetting");
            return self.initial_state();
        }

        let consecutive_failures = state.consecutive_failures.saturating_add(1);
        let next_delay = self.delay_for(consecutive_failures);
        debug!(
            consecutive_failures,
            delay_ms = next_delay.as_millis() as u64,
            "BackoffPolicy::next: failure"
        );
        RetryState {
            consecutive_failures,
            next_delay,
        }
    }

    /// Delay after `failures` consecutive failures
    ///
    /// `min(max_delay, base_delay * 2^min(failures - 1, exponent_cap))`, and
    /// `base_delay` when there are no failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.base_delay;
        }

        let exponent = (failures - 1).min(self.exponent_cap);
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}
