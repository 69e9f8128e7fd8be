//! Durable, execution-scoped URL frontier.
//!
//! Backed by the shared SQLite store. Ordering is relaxed FIFO: oldest
//! `queued` item first as observed by each worker, not globally strict
//! across concurrent leases. Deduplication is strict per
//! (execution, normalized URL) and never resets retry counters of existing
//! items, whatever their state.

mod stats;

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::storage::{Store, from_millis, to_millis};
use crate::utils::{backoff_delay, normalize_url};

pub use stats::QueueStats;
use stats::ThroughputMeter;

/// Entries kept in the in-process dedup fast path in front of the
/// database uniqueness constraint.
const DEDUP_CACHE_SIZE: usize = 16_384;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("queue length {len} exceeds hard cap {cap}")]
    CapacityExceeded { len: usize, cap: usize },

    #[error("queue item {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Per-URL lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Queued,
    InProgress,
    Done,
    Failed,
    Skipped,
}

impl UrlStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// (execution, normalized URL) already present, in any state
    Duplicate,
    /// URL sits beyond the configured maximum depth
    DepthExceeded,
}

impl EnqueueOutcome {
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued)
    }
}

/// A frontier entry.
#[derive(Debug, Clone)]
pub struct UrlQueueItem {
    pub id: i64,
    pub execution_id: Uuid,
    pub url: String,
    pub depth: u32,
    pub status: UrlStatus,
    pub retry_count: u32,
    pub source_node_id: Option<String>,
    pub enqueued_at: chrono::DateTime<Utc>,
    pub leased_by: Option<String>,
    pub lease_deadline: Option<chrono::DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl UrlQueueItem {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, QueueError> {
        let execution_id: String = row.get("execution_id");
        let execution_id = Uuid::parse_str(&execution_id)
            .map_err(|_| QueueError::InvalidUrl(format!("corrupt execution id {execution_id}")))?;
        Ok(Self {
            id: row.get("id"),
            execution_id,
            url: row.get("url"),
            depth: row.get::<i64, _>("depth") as u32,
            status: UrlStatus::parse(row.get::<String, _>("status").as_str())
                .unwrap_or(UrlStatus::Queued),
            retry_count: row.get::<i64, _>("retry_count") as u32,
            source_node_id: row.get("source_node_id"),
            enqueued_at: from_millis(row.get("enqueued_at")),
            leased_by: row.get("leased_by"),
            lease_deadline: row.get::<Option<i64>, _>("lease_deadline").map(from_millis),
            last_error: row.get("last_error"),
        })
    }
}

/// Durable per-execution FIFO with dedup, leases, and backpressure.
pub struct UrlQueue {
    pool: SqlitePool,
    max_depth: u32,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    soft_cap: usize,
    hard_cap: usize,
    lease_ttl: Duration,
    /// Fast-path dedup cache keyed by "execution:url"
    seen: Mutex<LruCache<String, ()>>,
    /// Pause flags mirrored in memory; the durable copy lives in
    /// `queue_state`
    paused: DashMap<Uuid, bool>,
    meters: DashMap<Uuid, Mutex<ThroughputMeter>>,
}

impl UrlQueue {
    #[must_use]
    pub fn new(store: &Store, config: &EngineConfig) -> Self {
        Self {
            pool: store.pool().clone(),
            max_depth: config.max_depth(),
            max_retries: config.max_retries(),
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
            soft_cap: config.queue_soft_cap(),
            hard_cap: config.queue_hard_cap(),
            lease_ttl: config.lease_ttl(),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEDUP_CACHE_SIZE).expect("cache size is non-zero"),
            )),
            paused: DashMap::new(),
            meters: DashMap::new(),
        }
    }

    /// Normalize and append a URL for an execution.
    ///
    /// Duplicates and over-depth URLs are reported, not errors; a frontier
    /// past the hard cap is. Crossing the soft cap applies an exponential
    /// backpressure sleep before the insert.
    pub async fn enqueue(
        &self,
        execution_id: Uuid,
        url: &str,
        depth: u32,
        source_node_id: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let normalized =
            normalize_url(url).map_err(|e| QueueError::InvalidUrl(e.to_string()))?;

        if depth > self.max_depth {
            debug!(url = %normalized, depth, max = self.max_depth, "depth cap reached");
            return Ok(EnqueueOutcome::DepthExceeded);
        }

        let cache_key = format!("{execution_id}:{normalized}");
        if self.seen.lock().contains(&cache_key) {
            return Ok(EnqueueOutcome::Duplicate);
        }

        let len = self.pending_len(execution_id).await?;
        if len >= self.hard_cap {
            return Err(QueueError::CapacityExceeded {
                len,
                cap: self.hard_cap,
            });
        }
        if len >= self.soft_cap {
            let steps = (((len - self.soft_cap) * 4) / self.soft_cap.max(1)).min(4) as u32;
            let delay = backoff_delay(
                steps,
                Duration::from_millis(25),
                Duration::from_millis(500),
            );
            debug!(len, soft_cap = self.soft_cap, ?delay, "queue backpressure");
            tokio::time::sleep(delay).await;
        }

        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "INSERT OR IGNORE INTO url_queue
             (execution_id, url, depth, status, enqueued_at, available_at, source_node_id)
             VALUES (?, ?, ?, 'queued', ?, ?, ?)",
        )
        .bind(execution_id.to_string())
        .bind(&normalized)
        .bind(depth as i64)
        .bind(now)
        .bind(now)
        .bind(source_node_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            self.seen.lock().put(cache_key, ());
            Ok(EnqueueOutcome::Enqueued)
        } else {
            self.seen.lock().put(cache_key, ());
            Ok(EnqueueOutcome::Duplicate)
        }
    }

    /// Atomically lease the oldest queued item, stamping `leased_by` and
    /// the lease deadline. Returns `None` when nothing is available or the
    /// execution is paused.
    pub async fn lease(
        &self,
        execution_id: Uuid,
        worker_id: &str,
    ) -> Result<Option<UrlQueueItem>, QueueError> {
        if self.is_paused(execution_id).await? {
            return Ok(None);
        }

        let now = Utc::now();
        let deadline = now + self.lease_ttl;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT * FROM url_queue
             WHERE execution_id = ? AND status = 'queued' AND available_at <= ?
             ORDER BY enqueued_at, id
             LIMIT 1",
        )
        .bind(execution_id.to_string())
        .bind(to_millis(now))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let item_id: i64 = row.get("id");
        let updated = sqlx::query(
            "UPDATE url_queue
             SET status = 'in_progress', leased_by = ?, lease_deadline = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(worker_id)
        .bind(to_millis(deadline))
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Another worker won the row between SELECT and UPDATE
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;

        let mut item = UrlQueueItem::from_row(&row)?;
        item.status = UrlStatus::InProgress;
        item.leased_by = Some(worker_id.to_string());
        item.lease_deadline = Some(deadline);
        Ok(Some(item))
    }

    /// Mark a leased item done.
    pub async fn complete(&self, item_id: i64) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE url_queue
             SET status = 'done', leased_by = NULL, lease_deadline = NULL
             WHERE id = ? AND status = 'in_progress'",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(QueueError::NotFound(item_id));
        }

        if let Some(execution_id) = self.execution_of(item_id).await? {
            self.meters
                .entry(execution_id)
                .or_insert_with(|| Mutex::new(ThroughputMeter::new()))
                .lock()
                .record();
        }
        Ok(())
    }

    /// Record a failure. Retryable failures under the retry budget are
    /// re-enqueued at the tail with an exponential backoff hold; the rest
    /// go to `failed`. Returns the resulting status.
    pub async fn fail(
        &self,
        item_id: i64,
        error: &str,
        retryable: bool,
    ) -> Result<UrlStatus, QueueError> {
        let row = sqlx::query("SELECT retry_count FROM url_queue WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(item_id))?;
        let retry_count = row.get::<i64, _>("retry_count") as u32;

        if retryable && retry_count < self.max_retries {
            let delay = backoff_delay(retry_count, self.retry_base_delay, self.retry_max_delay);
            let now = Utc::now();
            sqlx::query(
                "UPDATE url_queue
                 SET status = 'queued', retry_count = retry_count + 1,
                     enqueued_at = ?, available_at = ?,
                     leased_by = NULL, lease_deadline = NULL, last_error = ?
                 WHERE id = ?",
            )
            .bind(to_millis(now))
            .bind(to_millis(now + delay))
            .bind(error)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
            debug!(item_id, retry = retry_count + 1, ?delay, "re-enqueued after failure");
            Ok(UrlStatus::Queued)
        } else {
            sqlx::query(
                "UPDATE url_queue
                 SET status = 'failed', leased_by = NULL, lease_deadline = NULL,
                     last_error = ?
                 WHERE id = ?",
            )
            .bind(error)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
            warn!(item_id, retry_count, "item failed permanently: {error}");
            Ok(UrlStatus::Failed)
        }
    }

    /// Mark a leased item skipped (cancellation path).
    pub async fn skip(&self, item_id: i64) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE url_queue
             SET status = 'skipped', leased_by = NULL, lease_deadline = NULL
             WHERE id = ? AND status IN ('queued', 'in_progress')",
        )
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Crash-recovery sweep: revert in-progress items with an elapsed lease
    /// deadline back to `queued`. Retry counters are untouched.
    pub async fn reclaim(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE url_queue
             SET status = 'queued', leased_by = NULL, lease_deadline = NULL
             WHERE status = 'in_progress' AND lease_deadline < ?",
        )
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;

        let reclaimed = result.rows_affected();
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    pub async fn pause(&self, execution_id: Uuid) -> Result<(), QueueError> {
        self.set_paused(execution_id, true).await
    }

    pub async fn resume(&self, execution_id: Uuid) -> Result<(), QueueError> {
        self.set_paused(execution_id, false).await
    }

    async fn set_paused(&self, execution_id: Uuid, paused: bool) -> Result<(), QueueError> {
        sqlx::query(
            "INSERT INTO queue_state (execution_id, paused) VALUES (?, ?)
             ON CONFLICT(execution_id) DO UPDATE SET paused = excluded.paused",
        )
        .bind(execution_id.to_string())
        .bind(i64::from(paused))
        .execute(&self.pool)
        .await?;
        self.paused.insert(execution_id, paused);
        Ok(())
    }

    pub async fn is_paused(&self, execution_id: Uuid) -> Result<bool, QueueError> {
        if let Some(flag) = self.paused.get(&execution_id) {
            return Ok(*flag);
        }
        let row = sqlx::query("SELECT paused FROM queue_state WHERE execution_id = ?")
            .bind(execution_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let paused = row.is_some_and(|r| r.get::<i64, _>("paused") != 0);
        self.paused.insert(execution_id, paused);
        Ok(paused)
    }

    /// Counts by status plus the EMA throughput estimate.
    pub async fn stats(&self, execution_id: Uuid) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM url_queue
             WHERE execution_id = ? GROUP BY status",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let n = row.get::<i64, _>("n") as usize;
            match UrlStatus::parse(row.get::<String, _>("status").as_str()) {
                Some(UrlStatus::Queued) => stats.queued = n,
                Some(UrlStatus::InProgress) => stats.in_progress = n,
                Some(UrlStatus::Done) => stats.done = n,
                Some(UrlStatus::Failed) => stats.failed = n,
                Some(UrlStatus::Skipped) => stats.skipped = n,
                None => {}
            }
        }

        stats.throughput_per_sec = self
            .meters
            .get(&execution_id)
            .map_or(0.0, |m| m.lock().rate());
        Ok(stats)
    }

    /// Every frontier entry for an execution, oldest first.
    pub async fn items(&self, execution_id: Uuid) -> Result<Vec<UrlQueueItem>, QueueError> {
        let rows = sqlx::query(
            "SELECT * FROM url_queue WHERE execution_id = ? ORDER BY enqueued_at, id",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(UrlQueueItem::from_row).collect()
    }

    /// Items still waiting to be processed (queued, including backoff holds).
    pub async fn pending_len(&self, execution_id: Uuid) -> Result<usize, QueueError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM url_queue
             WHERE execution_id = ? AND status = 'queued'",
        )
        .bind(execution_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn execution_of(&self, item_id: i64) -> Result<Option<Uuid>, QueueError> {
        let row = sqlx::query("SELECT execution_id FROM url_queue WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| Uuid::parse_str(&r.get::<String, _>("execution_id")).ok()))
    }
}
