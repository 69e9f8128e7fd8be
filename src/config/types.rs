//! Core configuration types for the execution engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Activation and learning thresholds for the error-recovery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryThresholds {
    /// Rolling window of node results kept per execution (`W`)
    pub window_size: usize,
    /// Consecutive failures that activate recovery (`K₁`)
    pub consecutive_threshold: u32,
    /// Error rate over the window that activates recovery (`R₁`)
    pub error_rate_threshold: f64,
    /// Uses before an AI solution is considered for promotion (`N`)
    pub promotion_usage: u64,
    /// Success rate required for promotion (`S`)
    pub promotion_success_rate: f64,
    /// Success rate below which a learned rule is demoted
    pub demotion_floor: f64,
    /// Whether the AI reasoning layer is consulted at all
    pub ai_enabled: bool,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            window_size: 20,
            consecutive_threshold: 3,
            error_rate_threshold: 0.5,
            promotion_usage: 5,
            promotion_success_rate: 0.7,
            demotion_floor: 0.3,
            ai_enabled: false,
        }
    }
}

/// Main configuration for the execution engine.
///
/// Durations serialize as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker tasks spawned per execution
    pub(crate) concurrent_workers: usize,
    /// Browser contexts kept by the pool
    pub(crate) pool_size: usize,
    /// Maximum crawl depth accepted by the queue
    pub(crate) max_depth: u32,
    /// Node-scoped retries per URL before the item fails
    pub(crate) max_retries: u32,
    /// Base delay for retry backoff
    #[serde(with = "duration_ms")]
    pub(crate) retry_base_delay: Duration,
    /// Backoff cap
    #[serde(with = "duration_ms")]
    pub(crate) retry_max_delay: Duration,
    /// How long idle workers sleep between queue polls
    #[serde(with = "duration_ms")]
    pub(crate) queue_check_interval: Duration,
    /// Lease TTL after which in-progress items are reclaimed
    #[serde(with = "duration_ms")]
    pub(crate) lease_ttl: Duration,
    /// Queue length at which enqueue starts backpressure sleeps
    pub(crate) queue_soft_cap: usize,
    /// Queue length at which enqueue rejects outright
    pub(crate) queue_hard_cap: usize,
    /// Base per-node timeout (scaled by the execution's timeout multiplier)
    #[serde(with = "duration_ms")]
    pub(crate) node_timeout: Duration,
    /// Pool acquire timeout
    #[serde(with = "duration_ms")]
    pub(crate) acquire_timeout: Duration,
    /// Event bus buffer capacity per execution
    pub(crate) event_capacity: usize,
    /// Proxies cycled through by the rotate_proxy recovery action
    #[serde(default)]
    pub(crate) proxies: Vec<String>,
    /// Recovery pipeline thresholds
    pub(crate) recovery: RecoveryThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrent_workers: num_cpus::get().clamp(1, 8),
            pool_size: 4,
            max_depth: 3,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            queue_check_interval: Duration::from_millis(250),
            lease_ttl: Duration::from_secs(120),
            queue_soft_cap: 5_000,
            queue_hard_cap: 50_000,
            node_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            event_capacity: 1_000,
            proxies: Vec::new(),
            recovery: RecoveryThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Start building a configuration from defaults.
    #[must_use]
    pub fn builder() -> super::EngineConfigBuilder {
        super::EngineConfigBuilder::default()
    }

    #[must_use]
    pub fn concurrent_workers(&self) -> usize {
        self.concurrent_workers
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    #[must_use]
    pub fn retry_max_delay(&self) -> Duration {
        self.retry_max_delay
    }

    #[must_use]
    pub fn queue_check_interval(&self) -> Duration {
        self.queue_check_interval
    }

    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    #[must_use]
    pub fn queue_soft_cap(&self) -> usize {
        self.queue_soft_cap
    }

    #[must_use]
    pub fn queue_hard_cap(&self) -> usize {
        self.queue_hard_cap
    }

    #[must_use]
    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    #[must_use]
    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }

    #[must_use]
    pub fn recovery(&self) -> &RecoveryThresholds {
        &self.recovery
    }

    /// Apply per-execution overrides, returning the effective config.
    #[must_use]
    pub fn with_overrides(&self, overrides: &ConfigOverrides) -> Self {
        let mut cfg = self.clone();
        if let Some(workers) = overrides.concurrent_workers {
            cfg.concurrent_workers = workers.max(1);
        }
        if let Some(depth) = overrides.max_depth {
            cfg.max_depth = depth;
        }
        if let Some(retries) = overrides.max_retries {
            cfg.max_retries = retries;
        }
        if let Some(ms) = overrides.node_timeout_ms {
            cfg.node_timeout = Duration::from_millis(ms);
        }
        cfg
    }
}

/// Per-execution overrides supplied at start time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub concurrent_workers: Option<usize>,
    pub max_depth: Option<u32>,
    pub max_retries: Option<u32>,
    pub node_timeout_ms: Option<u64>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
