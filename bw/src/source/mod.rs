//! Work source and item processor abstraction
//!
//! The worker never knows where items come from or what processing them
//! means. Both sides are supplied by the embedding application through the
//! [`WorkSource`] and [`ItemProcessor`] traits.

mod error;
mod types;

pub use error::{ItemError, SourceError};
pub use types::{DispatchOutcome, WorkItem};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Supplies batches of work items
///
/// Delivery is assumed to be at-least-once: items dropped by an interrupted
/// batch are expected to be offered again by a later fetch.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Fetch the next batch, holding at most `max_count` items when given.
    ///
    /// An empty batch is a successful fetch. An error fails the whole cycle.
    async fn fetch_batch(&self, max_count: Option<usize>) -> Result<Vec<WorkItem>, SourceError>;
}

/// Executes the business logic for a single work item
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Process one item.
    ///
    /// `cancel` fires when the worker shuts down or the batch is stopped early.
    /// Checking it is the processor's responsibility; returning
    /// [`ItemError::Cancelled`] stops the rest of the batch from dispatching.
    async fn process(&self, item: WorkItem, cancel: CancellationToken) -> Result<(), ItemError>;
}
