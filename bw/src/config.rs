//! BatchWorker configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffPolicy;
use crate::health::HealthPolicy;
use crate::limiter::LimiterStrategy;
use crate::worker::WorkerConfig;

/// Rejected configuration values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("base-backoff-ms ({base}) must not exceed max-backoff-ms ({max})")]
    BackoffOrder { base: u64, max: u64 },

    #[error("degraded-staleness-secs ({degraded}) must not exceed unhealthy-staleness-secs ({unhealthy})")]
    StalenessOrder { degraded: u64, unhealthy: u64 },
}

/// Main BatchWorker configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parallelism and batch sizing
    pub concurrency: ConcurrencyConfig,

    /// Delay between successful cycles
    pub schedule: ScheduleConfig,

    /// Delay escalation after failed cycles
    pub backoff: BackoffConfig,

    /// Health thresholds
    pub health: HealthConfig,

    /// Shutdown behaviour
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency.max_concurrency == 0 {
            return Err(ConfigError::Zero("max-concurrency"));
        }
        if self.concurrency.batch_size == 0 {
            return Err(ConfigError::Zero("batch-size"));
        }
        if self.concurrency.item_timeout_ms == Some(0) {
            return Err(ConfigError::Zero("item-timeout-ms"));
        }
        if self.backoff.base_backoff_ms == 0 {
            return Err(ConfigError::Zero("base-backoff-ms"));
        }
        if self.backoff.base_backoff_ms > self.backoff.max_backoff_ms {
            return Err(ConfigError::BackoffOrder {
                base: self.backoff.base_backoff_ms,
                max: self.backoff.max_backoff_ms,
            });
        }
        if self.health.unhealthy_failure_threshold == 0 {
            return Err(ConfigError::Zero("unhealthy-failure-threshold"));
        }
        if self.health.degraded_staleness_secs > self.health.unhealthy_staleness_secs {
            return Err(ConfigError::StalenessOrder {
                degraded: self.health.degraded_staleness_secs,
                unhealthy: self.health.unhealthy_staleness_secs,
            });
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .batchworker.yml
        let local_config = PathBuf::from(".batchworker.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/batchworker/batchworker.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("batchworker").join("batchworker.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.backoff.base_backoff_ms),
            max_delay: Duration::from_millis(self.backoff.max_backoff_ms),
            exponent_cap: self.backoff.backoff_exponent_cap,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: self.health.unhealthy_failure_threshold,
            degraded_staleness: Duration::from_secs(self.health.degraded_staleness_secs),
            unhealthy_staleness: Duration::from_secs(self.health.unhealthy_staleness_secs),
        }
    }

    /// Runtime settings for a worker built from this configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrency: self.concurrency.max_concurrency,
            batch_size: self.concurrency.batch_size,
            limiter: self.concurrency.limiter,
            item_timeout: self.concurrency.item_timeout_ms.map(Duration::from_millis),
            steady_interval: Duration::from_millis(self.schedule.steady_interval_ms),
            drain_timeout: Duration::from_millis(self.shutdown.drain_timeout_ms),
            backoff: self.backoff_policy(),
            health: self.health_policy(),
        }
    }
}

/// Parallelism and batch sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum items executing at once
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: usize,

    /// Maximum items requested per fetch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Limiter strategy: permits or queue
    pub limiter: LimiterStrategy,

    /// Optional per-item time limit in milliseconds
    #[serde(rename = "item-timeout-ms")]
    pub item_timeout_ms: Option<u64>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            batch_size: 50,
            limiter: LimiterStrategy::Permits,
            item_timeout_ms: None,
        }
    }
}

/// Steady-state scheduling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Delay after a successful cycle in milliseconds
    #[serde(rename = "steady-interval-ms")]
    pub steady_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            steady_interval_ms: 5_000,
        }
    }
}

/// Backoff after failed cycles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure in milliseconds
    #[serde(rename = "base-backoff-ms")]
    pub base_backoff_ms: u64,

    /// Ceiling on any backoff delay in milliseconds
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Largest doubling exponent
    #[serde(rename = "backoff-exponent-cap")]
    pub backoff_exponent_cap: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_backoff_ms: 5_000,
            max_backoff_ms: 300_000,
            backoff_exponent_cap: 6,
        }
    }
}

/// Health thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failed batches that make the worker unhealthy
    #[serde(rename = "unhealthy-failure-threshold")]
    pub unhealthy_failure_threshold: u32,

    /// Seconds without success that make the worker unhealthy
    #[serde(rename = "unhealthy-staleness-secs")]
    pub unhealthy_staleness_secs: u64,

    /// Seconds without success that make the worker degraded
    #[serde(rename = "degraded-staleness-secs")]
    pub degraded_staleness_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_failure_threshold: 5,
            unhealthy_staleness_secs: 600,
            degraded_staleness_secs: 300,
        }
    }
}

/// Shutdown behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for in-flight items in milliseconds
    #[serde(rename = "drain-timeout-ms")]
    pub drain_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
        }
    }
}
