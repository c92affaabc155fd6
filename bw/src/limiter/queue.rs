//! Bounded-queue limiter
//!
//! The dispatcher writes one slot token into a queue of capacity `N` per item
//! it starts; each finished item takes one token back out. A full queue
//! suspends the writer, which caps concurrency without explicit permits.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{AcquireError, ConcurrencyLimiter, Permit};

type SlotQueue = Arc<Mutex<mpsc::Receiver<()>>>;

/// Fixed-capacity queue between the dispatch producer and completing items
#[derive(Debug)]
pub struct QueueLimiter {
    sender: mpsc::Sender<()>,
    receiver: SlotQueue,
    max_concurrency: usize,
}

impl QueueLimiter {
    /// Create a limiter whose queue holds `max_concurrency` slots
    pub fn new(max_concurrency: usize) -> Self {
        debug!(max_concurrency, "QueueLimiter::new: called");
        let (sender, receiver) = mpsc::channel(max_concurrency);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            max_concurrency,
        }
    }
}

#[async_trait]
impl ConcurrencyLimiter for QueueLimiter {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AcquireError> {
        // Dropping a pending send on cancellation leaves the queue untouched
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            sent = self.sender.send(()) => match sent {
                Ok(()) => Ok(Permit::queue(QueueSlot {
                    receiver: Arc::clone(&self.receiver),
                })),
                Err(_) => Err(AcquireError::Closed),
            },
        }
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn in_use(&self) -> usize {
        self.sender.max_capacity().saturating_sub(self.sender.capacity())
    }

    fn close(&self) {
        debug!("QueueLimiter::close: called");
        match self.receiver.lock() {
            Ok(mut receiver) => receiver.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }
}

/// One token sitting in the queue; consumed when the item finishes
#[derive(Debug)]
pub(super) struct QueueSlot {
    receiver: SlotQueue,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        let mut receiver = match self.receiver.lock() {
            Ok(receiver) => receiver,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Tokens are interchangeable and this slot's token was fully written
        // before the permit existed, so the queue cannot be empty here.
        if receiver.try_recv().is_err() {
            warn!("QueueSlot::drop: slot queue unexpectedly empty");
        }
    }
}
