use std::time::Duration;

use envconfig::Envconfig;
use stackctl_runtime::workqueue::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX, DEFAULT_BUCKET_BURST,
    DEFAULT_BUCKET_QPS, Item, MaxOfRateLimiter, max_of_exponential_and_bucket,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("STACKCTL_BUCKET_QPS must be a positive number, got {0}")]
    BucketQps(f64),
    #[error("STACKCTL_BUCKET_BURST must be at least 1")]
    BucketBurst,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers.
    /// Env: STACKCTL_WORKERS
    #[envconfig(from = "STACKCTL_WORKERS", default = "2")]
    pub workers: usize,

    /// Watch a single namespace; all namespaces when unset.
    /// Env: STACKCTL_NAMESPACE
    #[envconfig(from = "STACKCTL_NAMESPACE")]
    pub namespace: Option<String>,

    /// Informer resync period in seconds; 0 disables resync.
    /// Env: STACKCTL_RESYNC_SECS
    #[envconfig(from = "STACKCTL_RESYNC_SECS", default = "30")]
    pub resync_secs: u64,

    #[envconfig(from = "STACKCTL_CACHE_SYNC_TIMEOUT_SECS", default = "60")]
    pub cache_sync_timeout_secs: u64,

    #[envconfig(nested)]
    pub rate_limit: RateLimitConfig,

    /// JSON file with AppStacks to load into the sandbox at startup.
    /// Env: STACKCTL_SEED_FILE
    #[envconfig(from = "STACKCTL_SEED_FILE")]
    pub seed_file: Option<String>,

    /// Mark sandbox Deployments available as soon as they are written.
    /// Env: STACKCTL_SIMULATE_ROLLOUT
    #[envconfig(from = "STACKCTL_SIMULATE_ROLLOUT", default = "true")]
    pub simulate_rollout: bool,
}

/// Retry policy: max of per-key exponential backoff and a global token
/// bucket.
#[derive(Envconfig, Clone, Debug)]
pub struct RateLimitConfig {
    #[envconfig(from = "STACKCTL_BACKOFF_BASE_MS", default = "5")]
    pub backoff_base_ms: u64,
    #[envconfig(from = "STACKCTL_BACKOFF_MAX_SECS", default = "1000")]
    pub backoff_max_secs: u64,
    #[envconfig(from = "STACKCTL_BUCKET_QPS", default = "50")]
    pub bucket_qps: f64,
    #[envconfig(from = "STACKCTL_BUCKET_BURST", default = "300")]
    pub bucket_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_secs: DEFAULT_BACKOFF_MAX.as_secs(),
            bucket_qps: DEFAULT_BUCKET_QPS,
            bucket_burst: DEFAULT_BUCKET_BURST,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.bucket_qps.is_finite() && self.bucket_qps > 0.0) {
            return Err(ConfigError::BucketQps(self.bucket_qps));
        }
        if self.bucket_burst == 0 {
            return Err(ConfigError::BucketBurst);
        }
        Ok(())
    }

    pub fn build<T: Item>(&self) -> MaxOfRateLimiter<T> {
        max_of_exponential_and_bucket(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_secs(self.backoff_max_secs),
            self.bucket_qps,
            self.bucket_burst,
        )
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            namespace: None,
            resync_secs: 30,
            cache_sync_timeout_secs: 60,
            rate_limit: RateLimitConfig::default(),
            seed_file: None,
            simulate_rollout: true,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate()
    }

    pub fn resync(&self) -> Option<Duration> {
        match self.resync_secs {
            0 => None,
            s => Some(Duration::from_secs(s)),
        }
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    /// Zero workers would never drain the queue.
    pub fn effective_workers(&self) -> usize {
        self.workers.max(1)
    }
}
