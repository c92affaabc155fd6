//! Synthetic work source and processor used by `bw run`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::source::{ItemError, ItemProcessor, SourceError, WorkItem, WorkSource};

/// Produces batches of generated items, failing at a configurable rate
#[derive(Debug)]
pub struct SyntheticSource {
    items_per_batch: usize,
    fail_rate: f64,
    produced: AtomicU64,
}

impl SyntheticSource {
    pub fn new(items_per_batch: usize, fail_rate: f64) -> Self {
        Self {
            items_per_batch,
            fail_rate: fail_rate.clamp(0.0, 1.0),
            produced: AtomicU64::new(0),
        }
    }

    /// Total items handed out so far
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WorkSource for SyntheticSource {
    async fn fetch_batch(&self, max_count: Option<usize>) -> Result<Vec<WorkItem>, SourceError> {
        debug!(?max_count, "SyntheticSource::fetch_batch: called");
        if rand::rng().random_bool(self.fail_rate) {
            return Err(SourceError::Unavailable("synthetic fetch failure".to_string()));
        }

        let count = max_count.map_or(self.items_per_batch, |max| max.min(self.items_per_batch));
        let items = (0..count)
            .map(|_| {
                let seq = self.produced.fetch_add(1, Ordering::Relaxed) + 1;
                let amount_cents: u32 = rand::rng().random_range(100..=100_000);
                WorkItem::new(
                    Uuid::now_v7().to_string(),
                    serde_json::json!({ "seq": seq, "amount_cents": amount_cents }),
                )
            })
            .collect();
        Ok(items)
    }
}

/// Sleeps for a random latency, then succeeds or fails at random
#[derive(Debug)]
pub struct SyntheticProcessor {
    fail_rate: f64,
    max_latency: Duration,
}

impl SyntheticProcessor {
    pub fn new(fail_rate: f64, max_latency: Duration) -> Self {
        Self {
            fail_rate: fail_rate.clamp(0.0, 1.0),
            max_latency,
        }
    }
}

#[async_trait]
impl ItemProcessor for SyntheticProcessor {
    async fn process(&self, item: WorkItem, cancel: CancellationToken) -> Result<(), ItemError> {
        let (latency, fails) = {
            let mut rng = rand::rng();
            let max_ms = self.max_latency.as_millis() as u64;
            (Duration::from_millis(rng.random_range(0..=max_ms)), rng.random_bool(self.fail_rate))
        };
        debug!(item_id = %item.id(), latency_ms = latency.as_millis() as u64, "SyntheticProcessor::process: called");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ItemError::Cancelled),
            _ = tokio::time::sleep(latency) => {}
        }

        if fails {
            Err(ItemError::failed(format!("synthetic failure for {}", item.id())))
        } else {
            Ok(())
        }
    }
}
