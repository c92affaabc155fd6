//! BatchWorker - Supervised Batch Worker
//!
//! BatchWorker repeatedly pulls a bounded batch of work items from an external
//! source, executes them under a concurrency ceiling, recovers from item-level
//! and batch-level failures without exiting, and reports its own health.
//!
//! # Core Concepts
//!
//! - **Continue on Error**: A failing item never fails its batch or its siblings
//! - **Backoff on Infrastructure Failure**: Failed fetches escalate the delay between cycles
//! - **Derived Health**: Healthy/Degraded/Unhealthy is computed at read time, never stored
//! - **Bounded Drain**: Shutdown waits for in-flight work up to a fixed timeout, then abandons it
//!
//! # Modules
//!
//! - [`source`] - Work source and item processor traits, work item types
//! - [`limiter`] - Concurrency limiter strategies (permits, bounded queue)
//! - [`backoff`] - Retry state and backoff policy
//! - [`health`] - Health state derivation
//! - [`drain`] - In-flight registry and shutdown drain
//! - [`worker`] - The scheduler loop composing all of the above
//! - [`status`] - Read-only status surface for adapters
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//! - [`demo`] - Synthetic source and processor for the `bw run` command

pub mod backoff;
pub mod cli;
pub mod clock;
pub mod config;
pub mod demo;
pub mod drain;
pub mod health;
pub mod limiter;
pub mod source;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, RetryState};
pub use config::{Config, ConfigError};
pub use drain::{DispatchHandle, DispatchId, DrainManager, InFlightEntry};
pub use health::{HealthPolicy, HealthState, HealthTracker};
pub use limiter::{AcquireError, ConcurrencyLimiter, LimiterStrategy, Permit, create_limiter};
pub use source::{DispatchOutcome, ItemError, ItemProcessor, SourceError, WorkItem, WorkSource};
pub use status::{HealthReport, LoopState, StatusHandle, StatusSnapshot, WorkerMetrics};
pub use worker::{BatchError, BatchReport, BatchWorker, WorkerConfig, WorkerSummary};
