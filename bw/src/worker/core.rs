//! BatchWorker implementation

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::RetryState;
use crate::clock::sleep_or_cancel;
use crate::drain::{DispatchHandle, DrainManager};
use crate::limiter::{AcquireError, ConcurrencyLimiter, Permit, create_limiter};
use crate::source::{DispatchOutcome, ItemProcessor, WorkItem, WorkSource};
use crate::status::{HealthReport, LoopState, StatusHandle, WorkerStatus};

use super::config::WorkerConfig;
use super::report::{BatchError, BatchReport, WorkerSummary};

/// How one cycle ended
#[derive(Debug)]
enum CycleOutcome {
    Succeeded(BatchReport),
    Failed(BatchError),
    Shutdown,
}

/// Supervised batch worker
///
/// One instance owns one scheduler loop. Batches run strictly one after the
/// other; items inside a batch run concurrently up to the limiter ceiling.
pub struct BatchWorker {
    config: WorkerConfig,
    source: Arc<dyn WorkSource>,
    processor: Arc<dyn ItemProcessor>,
    limiter: Arc<dyn ConcurrencyLimiter>,
    drain: Arc<DrainManager>,
    status: Arc<WorkerStatus>,
    retry: RetryState,
    batch_seq: u64,
}

impl BatchWorker {
    /// Create a worker with the limiter strategy named in `config`
    pub fn new(config: WorkerConfig, source: Arc<dyn WorkSource>, processor: Arc<dyn ItemProcessor>) -> Self {
        debug!(?config, "BatchWorker::new: called");
        let limiter = create_limiter(config.limiter, config.max_concurrency);
        let drain = Arc::new(DrainManager::new());
        let status = Arc::new(WorkerStatus::new(config.health, Arc::clone(&drain)));
        let retry = config.backoff.initial_state();

        Self {
            config,
            source,
            processor,
            limiter,
            drain,
            status,
            retry,
            batch_seq: 0,
        }
    }

    /// Replace the limiter built from config
    pub fn with_limiter(mut self, limiter: Arc<dyn ConcurrencyLimiter>) -> Self {
        debug!(max_concurrency = limiter.max_concurrency(), "BatchWorker::with_limiter: called");
        self.limiter = limiter;
        self
    }

    /// Read-only status handle, valid for the whole life of the worker
    pub fn status(&self) -> StatusHandle {
        StatusHandle::new(Arc::clone(&self.status))
    }

    pub fn limiter(&self) -> Arc<dyn ConcurrencyLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    /// Run until `cancel` fires, then drain and stop.
    ///
    /// Batch failures never end the loop; they only lengthen the delay
    /// between cycles and worsen the reported health.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerSummary {
        info!(
            max_concurrency = self.limiter.max_concurrency(),
            batch_size = self.config.batch_size,
            limiter = %self.config.limiter,
            "BatchWorker starting"
        );

        loop {
            self.status.set_state(LoopState::Running);
            if cancel.is_cancelled() {
                debug!("BatchWorker::run: cancellation observed before fetch");
                break;
            }

            let (delay, waiting) = match self.run_cycle(&cancel).await {
                CycleOutcome::Shutdown => break,
                CycleOutcome::Succeeded(report) => {
                    self.record_batch(true);
                    info!(
                        batch = report.batch,
                        fetched = report.fetched,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "Batch complete"
                    );
                    (self.config.steady_interval, LoopState::Idle)
                }
                CycleOutcome::Failed(err) => {
                    self.record_batch(false);
                    error!(
                        batch = self.batch_seq,
                        error = %err,
                        consecutive_failures = self.retry.consecutive_failures,
                        delay_ms = self.retry.next_delay.as_millis() as u64,
                        health = %self.status().health_state(),
                        "Batch failed, backing off"
                    );
                    (self.retry.next_delay, LoopState::Backoff)
                }
            };

            self.status.set_state(waiting);
            if !sleep_or_cancel(delay, &cancel).await {
                debug!("BatchWorker::run: delay interrupted by shutdown");
                break;
            }
        }

        self.shutdown().await
    }

    /// Fold a batch outcome into retry state, health and metrics
    fn record_batch(&mut self, success: bool) {
        self.retry = self.config.backoff.next(self.retry, success);
        self.status.health.set_consecutive_failures(self.retry.consecutive_failures);
        if success {
            self.status.health.record_success();
        }
        self.status.metrics.record_batch(success);
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        self.batch_seq += 1;
        let batch = self.batch_seq;

        self.status.set_state(LoopState::FetchingBatch);
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(batch, "BatchWorker::run_cycle: shutdown during fetch");
                return CycleOutcome::Shutdown;
            }
            fetched = self.source.fetch_batch(Some(self.config.batch_size)) => fetched,
        };

        let items = match fetched {
            Ok(items) => items,
            Err(_) if cancel.is_cancelled() => return CycleOutcome::Shutdown,
            Err(e) => return CycleOutcome::Failed(BatchError::Fetch(e)),
        };

        debug!(batch, count = items.len(), "BatchWorker::run_cycle: fetched batch");
        if items.len() > self.config.batch_size {
            warn!(
                batch,
                count = items.len(),
                requested = self.config.batch_size,
                "Source returned more items than requested"
            );
        }

        self.status.set_state(LoopState::Dispatching);
        let (report, failure) = self.dispatch_batch(batch, items, cancel).await;

        if cancel.is_cancelled() {
            info!(
                batch,
                dispatched = report.dispatched,
                completed = report.completed(),
                "Shutdown requested during batch"
            );
            return CycleOutcome::Shutdown;
        }

        match failure {
            Some(err) => CycleOutcome::Failed(err),
            None => CycleOutcome::Succeeded(report),
        }
    }

    /// Dispatch every item of one batch and wait for the wave to finish.
    ///
    /// Returns the tally plus the infrastructure failure, if any, that fails
    /// the batch. Item failures are only tallied.
    async fn dispatch_batch(
        &self,
        batch: u64,
        items: Vec<WorkItem>,
        cancel: &CancellationToken,
    ) -> (BatchReport, Option<BatchError>) {
        let mut report = BatchReport::new(batch, items.len());
        let mut failure = None;
        let mut tasks = JoinSet::new();

        // Fires on shutdown, or when any item of this batch reports cancellation
        let stop = cancel.child_token();

        for item in items {
            let permit = match self.limiter.acquire(&stop).await {
                Ok(permit) => permit,
                Err(AcquireError::Cancelled) => {
                    debug!(batch, dispatched = report.dispatched, "BatchWorker::dispatch_batch: stopped early");
                    break;
                }
                Err(e @ AcquireError::Closed) => {
                    error!(batch, error = %e, "Cannot dispatch, limiter closed");
                    failure = Some(BatchError::Limiter(e));
                    break;
                }
            };

            let handle = self.drain.register(item.id());
            debug!(batch, item_id = %item.id(), dispatch_id = handle.dispatch_id(), "Dispatching item");
            tasks.spawn(run_item(
                item,
                permit,
                handle,
                Arc::clone(&self.processor),
                stop.clone(),
                self.config.item_timeout,
                Arc::clone(&self.status),
            ));
            report.dispatched += 1;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Detached, not aborted: the drain waits for these
                    info!(batch, still_running = tasks.len(), "Shutdown during dispatch, handing items to drain");
                    tasks.detach_all();
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => report.record(&outcome),
                    // Processor panics are caught in run_item; this is the task itself failing
                    Some(Err(e)) => {
                        error!(batch, error = %e, "Dispatch task failed");
                        if failure.is_none() {
                            failure = Some(BatchError::Join(e.to_string()));
                        }
                    }
                },
            }
        }

        if failure.is_none() && report.cancelled > 0 && !cancel.is_cancelled() {
            failure = Some(BatchError::ItemCancelled(report.cancelled));
        }

        (report, failure)
    }

    async fn shutdown(self) -> WorkerSummary {
        self.status.set_state(LoopState::Draining);
        info!(in_flight = self.drain.in_flight(), "BatchWorker draining");

        let drained = self.drain.drain(self.config.drain_timeout).await;
        let abandoned = if drained { 0 } else { self.drain.in_flight() };
        if !drained {
            warn!(abandoned, "Stopping with work still in flight");
        }

        self.status.set_state(LoopState::Stopped);
        let metrics = &self.status.metrics;
        let summary = WorkerSummary {
            batches_succeeded: metrics.batches_succeeded(),
            batches_failed: metrics.batches_failed(),
            items_succeeded: metrics.items_succeeded(),
            items_failed: metrics.items_failed(),
            items_cancelled: metrics.items_cancelled(),
            consecutive_failures: self.retry.consecutive_failures,
            drained,
            abandoned,
        };
        info!(?summary, "BatchWorker stopped");
        summary
    }
}

/// Body of one dispatched unit
///
/// The permit and the registry handle are owned here and released when this
/// future completes or unwinds.
async fn run_item(
    item: WorkItem,
    permit: Permit,
    handle: DispatchHandle,
    processor: Arc<dyn ItemProcessor>,
    stop: CancellationToken,
    item_timeout: Option<Duration>,
    status: Arc<WorkerStatus>,
) -> DispatchOutcome {
    let _permit = permit;
    let dispatch_id = handle.dispatch_id();
    let _handle = handle;
    let item_id = item.id().to_string();

    let item_cancel = stop.child_token();
    let processing = AssertUnwindSafe(processor.process(item, item_cancel.clone())).catch_unwind();
    tokio::pin!(processing);

    let mut timed_out = false;
    let result = match item_timeout {
        Some(limit) => {
            let finished = tokio::select! {
                result = &mut processing => Some(result),
                _ = tokio::time::sleep(limit) => None,
            };
            match finished {
                Some(result) => result,
                None => {
                    // Cooperative: the processor sees its token and decides when to return
                    warn!(%item_id, dispatch_id, timeout_ms = limit.as_millis() as u64, "Item exceeded time limit, cancelling");
                    timed_out = true;
                    item_cancel.cancel();
                    processing.await
                }
            }
        }
        None => processing.await,
    };

    let outcome = match result {
        Ok(_) if timed_out => DispatchOutcome::Cancelled,
        Ok(result) => DispatchOutcome::from(result),
        Err(panic) => {
            let reason = panic_reason(panic.as_ref());
            error!(%item_id, dispatch_id, %reason, "Item processing panicked");
            DispatchOutcome::ItemFailure(format!("panic: {}", reason))
        }
    };
    match &outcome {
        DispatchOutcome::Success => debug!(%item_id, dispatch_id, "Item succeeded"),
        DispatchOutcome::ItemFailure(reason) => warn!(%item_id, dispatch_id, %reason, "Item failed"),
        DispatchOutcome::Cancelled => {
            if !stop.is_cancelled() {
                info!(%item_id, dispatch_id, "Item cancelled, stopping batch");
                stop.cancel();
            } else {
                debug!(%item_id, dispatch_id, "Item cancelled");
            }
        }
    }

    status.metrics.record_outcome(&outcome);
    outcome
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
