//! Concurrency limiter
//!
//! Bounds how many work items execute at once. Two strategies are provided
//! and are interchangeable from the caller's point of view:
//!
//! - [`PermitLimiter`] - a counting semaphore with `N` permits
//! - [`QueueLimiter`] - a bounded queue of capacity `N`; a full queue suspends
//!   the dispatching writer until a running item completes
//!
//! Either way a [`Permit`] is held for the lifetime of one item and released
//! when it is dropped, so every exit path (success, failure, cancellation,
//! panic) gives the slot back exactly once.

mod permits;
mod queue;

pub use permits::PermitLimiter;
pub use queue::QueueLimiter;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Which limiter implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimiterStrategy {
    #[default]
    Permits,
    Queue,
}

impl std::fmt::Display for LimiterStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimiterStrategy::Permits => write!(f, "permits"),
            LimiterStrategy::Queue => write!(f, "queue"),
        }
    }
}

impl std::str::FromStr for LimiterStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permits" | "semaphore" => Ok(Self::Permits),
            "queue" | "bounded-queue" => Ok(Self::Queue),
            _ => Err(format!("Unknown limiter strategy: {}. Use: permits or queue", s)),
        }
    }
}

/// Why an acquire did not produce a permit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// Cancellation fired while waiting; no slot was consumed
    #[error("Acquire cancelled")]
    Cancelled,

    /// The limiter was closed and will never hand out another permit
    #[error("Limiter closed")]
    Closed,
}

/// A unit of concurrency budget, released on drop
#[derive(Debug)]
pub struct Permit {
    _slot: Slot,
}

#[derive(Debug)]
enum Slot {
    Semaphore(OwnedSemaphorePermit),
    Queue(queue::QueueSlot),
}

impl Permit {
    fn semaphore(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _slot: Slot::Semaphore(permit),
        }
    }

    fn queue(slot: queue::QueueSlot) -> Self {
        Self { _slot: Slot::Queue(slot) }
    }

    /// Give the slot back now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

/// Bounds simultaneous item execution
#[async_trait]
pub trait ConcurrencyLimiter: Send + Sync + std::fmt::Debug {
    /// Wait for a free slot or for `cancel` to fire, whichever comes first.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AcquireError>;

    /// Configured ceiling
    fn max_concurrency(&self) -> usize;

    /// Slots currently held
    fn in_use(&self) -> usize;

    /// Refuse all future acquires; waiters are woken with [`AcquireError::Closed`]
    fn close(&self);
}

/// Create a limiter for the given strategy
///
/// A ceiling of zero would deadlock the first acquire, so it is raised to one.
pub fn create_limiter(strategy: LimiterStrategy, max_concurrency: usize) -> Arc<dyn ConcurrencyLimiter> {
    debug!(%strategy, max_concurrency, "create_limiter: called");
    let max_concurrency = max_concurrency.max(1);
    match strategy {
        LimiterStrategy::Permits => Arc::new(PermitLimiter::new(max_concurrency)),
        LimiterStrategy::Queue => Arc::new(QueueLimiter::new(max_concurrency)),
    }
}
