//! Integration tests for BatchWorker
//!
//! These tests drive the public API end to end: a source, a processor, the
//! scheduler loop, and the status surface an adapter would read.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use batchworker::{
    BatchWorker, HealthReport, HealthState, ItemError, ItemProcessor, LoopState, SourceError, StatusHandle,
    StatusSnapshot, WorkItem, WorkSource, WorkerConfig, WorkerSummary,
};

// =============================================================================
// Test doubles
// =============================================================================

/// Step in a scripted fetch sequence
enum Fetch {
    Items(Vec<WorkItem>),
    Fail(&'static str),
    /// Request shutdown, then return an empty batch
    Shutdown(CancellationToken),
}

/// Replays a script, recording when each fetch happened
struct ScriptedSource {
    script: Mutex<VecDeque<Fetch>>,
    fetched_at: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    fn new(script: Vec<Fetch>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fetched_at: Mutex::new(Vec::new()),
        })
    }

    fn fetch_times(&self) -> Vec<Instant> {
        self.fetched_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkSource for ScriptedSource {
    async fn fetch_batch(&self, _max_count: Option<usize>) -> Result<Vec<WorkItem>, SourceError> {
        self.fetched_at.lock().unwrap().push(Instant::now());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Fetch::Items(items)) => Ok(items),
            Some(Fetch::Fail(reason)) => Err(SourceError::Unavailable(reason.to_string())),
            Some(Fetch::Shutdown(cancel)) => {
                cancel.cancel();
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Fails items whose id appears in `failing`, succeeds the rest
struct SelectiveProcessor {
    failing: Vec<&'static str>,
    processed: AtomicUsize,
}

#[async_trait]
impl ItemProcessor for SelectiveProcessor {
    async fn process(&self, item: WorkItem, _cancel: CancellationToken) -> Result<(), ItemError> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|id| *id == item.id()) {
            return Err(ItemError::failed(format!("rejected {}", item.id())));
        }
        Ok(())
    }
}

/// Sleeps for a fixed time and ignores cancellation
struct StubbornProcessor {
    latency: Duration,
}

#[async_trait]
impl ItemProcessor for StubbornProcessor {
    async fn process(&self, _item: WorkItem, _cancel: CancellationToken) -> Result<(), ItemError> {
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

fn items(prefix: &str, count: usize) -> Vec<WorkItem> {
    (0..count).map(|i| WorkItem::with_id(format!("{prefix}-{i}"))).collect()
}

fn selective(failing: Vec<&'static str>) -> Arc<SelectiveProcessor> {
    Arc::new(SelectiveProcessor {
        failing,
        processed: AtomicUsize::new(0),
    })
}

async fn wait_until(status: &StatusHandle, done: impl Fn(&StatusHandle) -> bool) {
    while !done(status) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

async fn stop(cancel: &CancellationToken, running: tokio::task::JoinHandle<WorkerSummary>) -> WorkerSummary {
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(60), running)
        .await
        .expect("Worker should stop")
        .expect("Worker task should not panic")
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn test_one_failing_item_keeps_batch_successful() {
    let source = ScriptedSource::new(vec![Fetch::Items(items("order", 5))]);
    let processor = selective(vec!["order-3"]);
    let config = WorkerConfig {
        steady_interval: Duration::from_millis(20),
        ..Default::default()
    };

    let worker = BatchWorker::new(config, source, Arc::clone(&processor) as Arc<dyn ItemProcessor>);
    let status = worker.status();

    // Make sure the batch completes strictly after worker start
    std::thread::sleep(Duration::from_millis(5));
    let before = Utc::now();

    let cancel = CancellationToken::new();
    let running = tokio::spawn(worker.run(cancel.clone()));
    wait_until(&status, |s| s.metrics().batches_succeeded() >= 1).await;

    assert_eq!(status.consecutive_failures(), 0);
    assert!(status.last_success_timestamp().timestamp_millis() >= before.timestamp_millis());
    assert_eq!(status.health_state(), HealthState::Healthy);

    let summary = stop(&cancel, running).await;
    assert_eq!(processor.processed.load(Ordering::SeqCst), 5);
    assert_eq!(summary.items_succeeded, 4);
    assert_eq!(summary.items_failed, 1);
    assert_eq!(summary.batches_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_fetch_failures_escalate_backoff() {
    let cancel = CancellationToken::new();
    let source = ScriptedSource::new(vec![
        Fetch::Fail("connection refused"),
        Fetch::Fail("connection refused"),
        Fetch::Fail("connection refused"),
        Fetch::Shutdown(cancel.clone()),
    ]);

    // Default backoff: 5s base, doubling
    let worker = BatchWorker::new(
        WorkerConfig::default(),
        Arc::clone(&source) as Arc<dyn WorkSource>,
        selective(vec![]),
    );
    let status = worker.status();
    let summary = worker.run(cancel).await;

    let times = source.fetch_times();
    assert_eq!(times.len(), 4);
    let delays: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(20)];
    for (observed, expected) in delays.iter().zip(expected) {
        assert!(
            *observed >= expected && *observed < expected + Duration::from_millis(50),
            "observed {:?}, expected {:?}",
            observed,
            expected
        );
    }

    assert_eq!(summary.consecutive_failures, 3);
    assert_eq!(summary.batches_failed, 3);
    assert_eq!(status.consecutive_failures(), 3);
    assert_eq!(status.state(), LoopState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_abandons_stuck_items() {
    let source = ScriptedSource::new(vec![Fetch::Items(items("slow", 3))]);
    let config = WorkerConfig {
        drain_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let processor = Arc::new(StubbornProcessor {
        latency: Duration::from_secs(5),
    });

    let worker = BatchWorker::new(config, source, processor);
    let status = worker.status();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(worker.run(cancel.clone()));

    wait_until(&status, |s| s.in_flight() == 3).await;

    let started = Instant::now();
    let summary = stop(&cancel, running).await;
    let elapsed = started.elapsed();

    assert!(!summary.drained);
    assert_eq!(summary.abandoned, 3);
    assert!(elapsed >= Duration::from_secs(1), "drain returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1100), "drain returned after {:?}", elapsed);
    assert_eq!(status.state(), LoopState::Stopped);
}

// =============================================================================
// Health surface
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_health_turns_unhealthy_then_recovers() {
    let mut script: Vec<Fetch> = (0..5).map(|_| Fetch::Fail("queue down")).collect();
    script.push(Fetch::Items(items("back", 2)));
    let source = ScriptedSource::new(script);

    let worker = BatchWorker::new(WorkerConfig::default(), source, selective(vec![]));
    let status = worker.status();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(worker.run(cancel.clone()));

    wait_until(&status, |s| s.consecutive_failures() == 4).await;
    assert_eq!(status.health_state(), HealthState::Healthy);
    assert!(status.is_healthy());

    wait_until(&status, |s| s.consecutive_failures() == 5).await;
    assert_eq!(status.health_state(), HealthState::Unhealthy);
    assert!(!status.is_healthy());

    wait_until(&status, |s| s.metrics().batches_succeeded() >= 1).await;
    assert_eq!(status.consecutive_failures(), 0);
    assert_eq!(status.health_state(), HealthState::Healthy);

    let summary = stop(&cancel, running).await;
    assert_eq!(summary.batches_failed, 5);
    assert_eq!(summary.items_succeeded, 2);
}

#[tokio::test]
async fn test_health_degrades_with_staleness() {
    let source = ScriptedSource::new(vec![]);
    let worker = BatchWorker::new(WorkerConfig::default(), source, selective(vec![]));
    let status = worker.status();

    let last = status.last_success_timestamp();
    assert_eq!(status.health_state_at(last + TimeDelta::minutes(4)), HealthState::Healthy);
    assert_eq!(status.health_state_at(last + TimeDelta::minutes(6)), HealthState::Degraded);
    assert_eq!(status.health_state_at(last + TimeDelta::minutes(11)), HealthState::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn test_status_snapshot_serializes_for_adapters() {
    let source = ScriptedSource::new(vec![Fetch::Items(items("snap", 3))]);
    let worker = BatchWorker::new(WorkerConfig::default(), source, selective(vec!["snap-0"]));
    let status = worker.status();
    let cancel = CancellationToken::new();
    let running = tokio::spawn(worker.run(cancel.clone()));

    wait_until(&status, |s| s.metrics().batches_succeeded() >= 1).await;
    stop(&cancel, running).await;

    let json = serde_json::to_value(status.snapshot()).unwrap();
    assert_eq!(json["health"], "healthy");
    assert_eq!(json["state"], "stopped");
    assert_eq!(json["items_succeeded"], 2);
    assert_eq!(json["items_failed"], 1);
    assert_eq!(json["in_flight"], 0);

    let back: StatusSnapshot = serde_json::from_value(json).unwrap();
    assert_eq!(back, status.snapshot());
}
