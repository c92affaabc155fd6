//! Worker runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::health::HealthPolicy;
use crate::limiter::LimiterStrategy;

/// Runtime settings for one [`super::BatchWorker`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Max items executing at once
    pub max_concurrency: usize,

    /// Max items requested per fetch
    pub batch_size: usize,

    /// Limiter implementation
    pub limiter: LimiterStrategy,

    /// Per-item time limit; exceeding it counts as an item cancellation
    pub item_timeout: Option<Duration>,

    /// Delay between successful cycles
    pub steady_interval: Duration,

    /// How long shutdown waits for in-flight items
    pub drain_timeout: Duration,

    pub backoff: BackoffPolicy,

    pub health: HealthPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            batch_size: 50,
            limiter: LimiterStrategy::Permits,
            item_timeout: None,
            steady_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            health: HealthPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.limiter, LimiterStrategy::Permits);
        assert_eq!(config.item_timeout, None);
        assert_eq!(config.steady_interval, Duration::from_secs(5));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff.base_delay, Duration::from_secs(5));
        assert_eq!(config.health.failure_threshold, 5);
    }
}
