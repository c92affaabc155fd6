//! Scheduler loop
//!
//! Drives fetch -> dispatch -> observe -> delay -> repeat for one worker
//! instance and owns its lifecycle from first fetch to final drain.

mod config;
mod core;
mod report;

pub use config::WorkerConfig;
pub use self::core::BatchWorker;
pub use report::{BatchError, BatchReport, WorkerSummary};
