//! Bounded pool of pre-warmed isolated browser contexts.
//!
//! Workers lease contexts through [`BrowserPool::acquire`]; the returned
//! [`ContextLease`] is an RAII guard that scrubs and returns the context on
//! drop. One-shot proxy contexts bypass the pool entirely.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::driver::{BrowserContext, BrowserDriver, DriverError};
use super::profile::BrowserProfile;

/// Configuration for the context pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum contexts alive at once (leased + idle)
    pub pool_size: usize,
    /// How long `acquire` waits before giving up
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("timed out waiting {0:?} for a free browser context")]
    AcquireTimeout(Duration),

    #[error("browser pool is shut down")]
    ShutDown,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// An idle context with pool metadata.
struct PooledContext {
    id: u64,
    context: Arc<dyn BrowserContext>,
    last_used: Instant,
}

/// Bounded pool of isolated contexts sharing one driver.
pub struct BrowserPool {
    driver: Arc<dyn BrowserDriver>,
    config: PoolConfig,
    /// Profile applied to pooled contexts
    default_profile: BrowserProfile,
    idle: Mutex<VecDeque<PooledContext>>,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    returned: Notify,
    shutdown: AtomicBool,
}

impl BrowserPool {
    #[must_use]
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        config: PoolConfig,
        default_profile: BrowserProfile,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            config,
            default_profile,
            idle: Mutex::new(VecDeque::new()),
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            returned: Notify::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Lease a context with a specific fingerprint profile.
    ///
    /// The pool's pre-warmed contexts carry the default profile; asking
    /// for anything else (stealth, custom fingerprint) yields a one-shot
    /// context that is disposed on release instead of pooled.
    pub async fn acquire_with_profile(
        self: &Arc<Self>,
        profile: BrowserProfile,
    ) -> Result<ContextLease, PoolError> {
        if profile == self.default_profile {
            return self.acquire().await;
        }
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(PoolError::ShutDown);
        }
        let entry = self.create_context(profile).await?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        debug!(context_id = entry.id, "created one-shot profiled context");
        Ok(ContextLease {
            entry: Some(entry),
            pool: Arc::clone(self),
            pooled: false,
        })
    }

    /// Lease a pooled context with the default profile.
    pub async fn acquire(self: &Arc<Self>) -> Result<ContextLease, PoolError> {
        let profile = self.default_profile.clone();
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(PoolError::ShutDown);
            }

            if let Some(entry) = self.idle.lock().await.pop_front() {
                self.in_use.fetch_add(1, Ordering::Relaxed);
                debug!(context_id = entry.id, "acquired pooled browser context");
                return Ok(ContextLease {
                    entry: Some(entry),
                    pool: Arc::clone(self),
                    pooled: true,
                });
            }

            // Nothing idle; create a fresh context if the bound allows.
            // Reserve the slot first so concurrent acquires cannot overshoot.
            let reserved = self.in_use.fetch_add(1, Ordering::Relaxed);
            let idle_len = self.idle.lock().await.len();
            if reserved + idle_len < self.config.pool_size {
                match self.create_context(profile.clone()).await {
                    Ok(entry) => {
                        debug!(context_id = entry.id, "launched fresh browser context");
                        return Ok(ContextLease {
                            entry: Some(entry),
                            pool: Arc::clone(self),
                            pooled: true,
                        });
                    }
                    Err(e) => {
                        self.in_use.fetch_sub(1, Ordering::Relaxed);
                        return Err(e.into());
                    }
                }
            }
            self.in_use.fetch_sub(1, Ordering::Relaxed);

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::AcquireTimeout(self.config.acquire_timeout));
            }
            let _ = tokio::time::timeout(remaining, self.returned.notified()).await;
        }
    }

    /// Create a one-shot context with the supplied proxy. Never pooled:
    /// dropping the lease disposes the context.
    pub async fn acquire_with_proxy(
        self: &Arc<Self>,
        proxy: &str,
    ) -> Result<ContextLease, PoolError> {
        let profile = self.default_profile.clone().with_proxy(proxy);
        let entry = self.create_context(profile).await?;
        self.in_use.fetch_add(1, Ordering::Relaxed);
        debug!(context_id = entry.id, proxy, "created one-shot proxy context");
        Ok(ContextLease {
            entry: Some(entry),
            pool: Arc::clone(self),
            pooled: false,
        })
    }

    async fn create_context(&self, profile: BrowserProfile) -> Result<PooledContext, DriverError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let context = self.driver.new_context(profile).await?;
        Ok(PooledContext {
            id,
            context,
            last_used: Instant::now(),
        })
    }

    /// Scrub a returned context and park it, or dispose it when the pool is
    /// already full. Runs detached from the dropping task; failures are
    /// logged, never propagated to callers.
    fn release(self: &Arc<Self>, mut entry: PooledContext, pooled: bool) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        entry.last_used = Instant::now();

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let scrubbed = async {
                entry.context.close_pages().await?;
                entry.context.clear_state().await
            }
            .await;

            let keep = pooled && !pool.shutdown.load(Ordering::Relaxed);
            match scrubbed {
                Ok(()) if keep => {
                    let mut idle = pool.idle.lock().await;
                    let total = idle.len() + pool.in_use.load(Ordering::Relaxed);
                    if total < pool.config.pool_size {
                        debug!(context_id = entry.id, "returned context to pool");
                        idle.push_back(entry);
                    } else {
                        debug!(context_id = entry.id, "pool full, disposing context");
                    }
                }
                Ok(()) => {
                    debug!(context_id = entry.id, "disposing one-shot context");
                }
                Err(e) => {
                    warn!(context_id = entry.id, error = %e, "context scrub failed, replacing");
                    if keep {
                        pool.spawn_replacement();
                    }
                }
            }
            pool.returned.notify_waiters();
        });
    }

    /// Pre-warm a replacement after a context died during release.
    fn spawn_replacement(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if pool.shutdown.load(Ordering::Relaxed) {
                return;
            }
            match pool.create_context(pool.default_profile.clone()).await {
                Ok(entry) => {
                    let mut idle = pool.idle.lock().await;
                    let total = idle.len() + pool.in_use.load(Ordering::Relaxed);
                    if total < pool.config.pool_size {
                        idle.push_back(entry);
                        pool.returned.notify_waiters();
                    }
                }
                Err(e) => warn!(error = %e, "failed to create replacement context"),
            }
        });
    }

    /// Drain the pool, close every idle context, terminate the driver.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        info!("shutting down browser pool");
        self.shutdown.store(true, Ordering::Relaxed);
        self.returned.notify_waiters();

        let drained: Vec<PooledContext> = self.idle.lock().await.drain(..).collect();
        let closes = drained.iter().map(|entry| entry.context.close_pages());
        for (entry, result) in drained.iter().zip(futures::future::join_all(closes).await) {
            if let Err(e) = result {
                warn!(context_id = entry.id, error = %e, "failed to close context pages");
            }
        }

        self.driver.shutdown().await?;
        info!("browser pool shutdown complete");
        Ok(())
    }

    /// Contexts currently leased out.
    #[must_use]
    pub fn active(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Contexts parked and ready.
    pub async fn available(&self) -> usize {
        self.idle.lock().await.len()
    }
}

/// RAII lease over a pooled context. Dropping returns (or disposes) it.
pub struct ContextLease {
    entry: Option<PooledContext>,
    pool: Arc<BrowserPool>,
    pooled: bool,
}

impl ContextLease {
    /// The leased context.
    ///
    /// # Panics
    /// Never: the entry is only taken in `drop`.
    #[must_use]
    pub fn context(&self) -> &Arc<dyn BrowserContext> {
        &self
            .entry
            .as_ref()
            .expect("lease entry present until drop")
            .context
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.entry.as_ref().expect("lease entry present until drop").id
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.pool.release(entry, self.pooled);
        }
    }
}
