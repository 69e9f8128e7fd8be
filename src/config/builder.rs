//! Fluent builder for [`EngineConfig`] with validation at `build()`.

use std::time::Duration;

use anyhow::{Result, anyhow};

use super::types::{EngineConfig, RecoveryThresholds};

/// Builder over [`EngineConfig`] defaults. Every setter is optional;
/// `build()` validates ranges before handing out the config.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn concurrent_workers(mut self, workers: usize) -> Self {
        self.config.concurrent_workers = workers;
        self
    }

    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.config.pool_size = size;
        self
    }

    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    #[must_use]
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    #[must_use]
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    #[must_use]
    pub fn queue_check_interval(mut self, interval: Duration) -> Self {
        self.config.queue_check_interval = interval;
        self
    }

    #[must_use]
    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.config.lease_ttl = ttl;
        self
    }

    #[must_use]
    pub fn queue_soft_cap(mut self, cap: usize) -> Self {
        self.config.queue_soft_cap = cap;
        self
    }

    #[must_use]
    pub fn queue_hard_cap(mut self, cap: usize) -> Self {
        self.config.queue_hard_cap = cap;
        self
    }

    #[must_use]
    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.config.node_timeout = timeout;
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn proxies(mut self, proxies: Vec<String>) -> Self {
        self.config.proxies = proxies;
        self
    }

    #[must_use]
    pub fn recovery(mut self, thresholds: RecoveryThresholds) -> Self {
        self.config.recovery = thresholds;
        self
    }

    #[must_use]
    pub fn ai_enabled(mut self, enabled: bool) -> Self {
        self.config.recovery.ai_enabled = enabled;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<EngineConfig> {
        let cfg = self.config;

        if cfg.concurrent_workers == 0 {
            return Err(anyhow!("concurrent_workers must be at least 1"));
        }
        if cfg.pool_size == 0 {
            return Err(anyhow!("pool_size must be at least 1"));
        }
        if cfg.queue_hard_cap < cfg.queue_soft_cap {
            return Err(anyhow!(
                "queue_hard_cap ({}) must be >= queue_soft_cap ({})",
                cfg.queue_hard_cap,
                cfg.queue_soft_cap
            ));
        }
        if cfg.retry_max_delay < cfg.retry_base_delay {
            return Err(anyhow!("retry_max_delay must be >= retry_base_delay"));
        }
        if !(0.0..=1.0).contains(&cfg.recovery.error_rate_threshold) {
            return Err(anyhow!("error_rate_threshold must be within 0.0..=1.0"));
        }
        if !(0.0..=1.0).contains(&cfg.recovery.promotion_success_rate) {
            return Err(anyhow!("promotion_success_rate must be within 0.0..=1.0"));
        }
        if cfg.recovery.window_size == 0 {
            return Err(anyhow!("recovery window_size must be at least 1"));
        }

        Ok(cfg)
    }
}
