//! Batch reports and batch-level errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limiter::AcquireError;
use crate::source::{DispatchOutcome, SourceError};

/// Infrastructure failure that fails a whole batch cycle
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("Concurrency limiter unavailable: {0}")]
    Limiter(AcquireError),

    #[error("Dispatch task failed: {0}")]
    Join(String),

    #[error("Batch stopped early after {0} item cancellation(s)")]
    ItemCancelled(u64),
}

/// Per-batch item tally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Sequence number of the batch, starting at 1
    pub batch: u64,
    pub fetched: usize,
    pub dispatched: usize,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl BatchReport {
    pub fn new(batch: u64, fetched: usize) -> Self {
        Self {
            batch,
            fetched,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Success => self.succeeded += 1,
            DispatchOutcome::ItemFailure(_) => self.failed += 1,
            DispatchOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Items whose outcome has been observed
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }
}

/// Final tally returned when the worker stops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub batches_succeeded: u64,
    pub batches_failed: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_cancelled: u64,
    pub consecutive_failures: u32,
    /// Whether every in-flight item finished inside the drain timeout
    pub drained: bool,
    /// Items still running when the drain gave up
    pub abandoned: usize,
}
