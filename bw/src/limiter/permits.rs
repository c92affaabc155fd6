//! Counting-permit limiter backed by a tokio semaphore

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AcquireError, ConcurrencyLimiter, Permit};

/// Fixed pool of `N` permits
#[derive(Debug)]
pub struct PermitLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl PermitLimiter {
    /// Create a limiter with `max_concurrency` permits
    pub fn new(max_concurrency: usize) -> Self {
        debug!(max_concurrency, "PermitLimiter::new: called");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }
}

#[async_trait]
impl ConcurrencyLimiter for PermitLimiter {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, AcquireError> {
        // biased: an already-cancelled token must not take a free permit
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map(Permit::semaphore).map_err(|_| AcquireError::Closed)
            }
        }
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn in_use(&self) -> usize {
        self.max_concurrency.saturating_sub(self.semaphore.available_permits())
    }

    fn close(&self) {
        debug!("PermitLimiter::close: called");
        self.semaphore.close();
    }
}
