//! Persistent store for executions, node attempts, extracted items, and
//! recovery rules.
//!
//! Uses SQLite with WAL mode for concurrent reads during writes and ACID
//! transactions; the URL queue shares the same database (see
//! `queue`). The schema is applied idempotently on open.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::engine::{ExecutionStatus, ExecutionStatsSnapshot};
use crate::recovery::ContextAwareRule;

/// SQL schema for the engine database.
const SCHEMA_SQL: &str = r#"
-- One row per workflow run
CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER,
    finished_at INTEGER,
    stats TEXT,
    config_overrides TEXT,
    failure_reason TEXT
);

-- Durable per-execution URL frontier
CREATE TABLE IF NOT EXISTS url_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id TEXT NOT NULL,
    url TEXT NOT NULL,
    depth INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    retry_count INTEGER NOT NULL DEFAULT 0,
    source_node_id TEXT,
    enqueued_at INTEGER NOT NULL,
    available_at INTEGER NOT NULL,
    leased_by TEXT,
    lease_deadline INTEGER,
    last_error TEXT,
    UNIQUE(execution_id, url)
);

-- Covers the lease query: oldest queued item per execution
CREATE INDEX IF NOT EXISTS idx_url_queue_lease
    ON url_queue(execution_id, status, enqueued_at);

-- Pause flag checked by every lease
CREATE TABLE IF NOT EXISTS queue_state (
    execution_id TEXT PRIMARY KEY,
    paused INTEGER NOT NULL DEFAULT 0
);

-- Append-only node attempt log
CREATE TABLE IF NOT EXISTS node_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id TEXT NOT NULL,
    url_item_id INTEGER NOT NULL,
    node_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER,
    finished_at INTEGER,
    duration_ms INTEGER,
    error TEXT,
    result TEXT
);

CREATE INDEX IF NOT EXISTS idx_node_executions_item
    ON node_executions(execution_id, url_item_id);

-- Content-addressed extraction output
CREATE TABLE IF NOT EXISTS extracted_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_id TEXT NOT NULL,
    url TEXT NOT NULL,
    schema_key TEXT NOT NULL,
    data TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    extracted_at INTEGER NOT NULL,
    UNIQUE(execution_id, url, schema_key, content_hash)
);

-- Persisted recovery rules, hot-reloaded into the rules engine
CREATE TABLE IF NOT EXISTS recovery_rules (
    id TEXT PRIMARY KEY,
    priority INTEGER NOT NULL,
    definition TEXT NOT NULL,
    confidence REAL NOT NULL,
    success_rate REAL NOT NULL,
    usage_count INTEGER NOT NULL,
    created_by TEXT NOT NULL
);
"#;

/// An extraction result flushed at end-of-URL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedItem {
    pub execution_id: Uuid,
    pub url: String,
    pub schema_key: String,
    pub data: serde_json::Map<String, Value>,
    pub extracted_at: DateTime<Utc>,
}

/// One node attempt, recorded append-only.
#[derive(Debug, Clone)]
pub struct NodeExecutionRecord {
    pub execution_id: Uuid,
    pub url_item_id: i64,
    pub node_id: String,
    pub status: NodeExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeExecutionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Serialize a JSON object with sorted keys so equal data hashes equally.
fn canonical_json(data: &serde_json::Map<String, Value>) -> String {
    let sorted: std::collections::BTreeMap<&String, &Value> = data.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

/// Content hash for an extracted item's data.
#[must_use]
pub fn content_hash(data: &serde_json::Map<String, Value>) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(canonical_json(data).as_bytes()))
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Handle over the engine database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .context("failed to create database directory")?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("failed to open SQLite database")?;

        sqlx::query(SCHEMA_SQL)
            .execute(&pool)
            .await
            .context("failed to initialize database schema")?;

        Ok(Self { pool })
    }

    /// Shared connection pool; the queue issues its own statements over it.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    pub async fn insert_execution(
        &self,
        id: Uuid,
        workflow_id: &str,
        overrides: &Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, config_overrides)
             VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(workflow_id)
        .bind(ExecutionStatus::Pending.as_str())
        .bind(overrides.to_string())
        .execute(&self.pool)
        .await
        .context("failed to insert execution")?;
        Ok(())
    }

    /// Persist a status transition. Terminal states are write-once: updating
    /// a row already in a terminal state is a no-op returning `false`.
    pub async fn update_execution_status(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool> {
        let now = to_millis(Utc::now());
        let started = if status == ExecutionStatus::Running {
            Some(now)
        } else {
            None
        };
        let finished = if status.is_terminal() { Some(now) } else { None };

        let result = sqlx::query(
            "UPDATE executions
             SET status = ?,
                 started_at = COALESCE(started_at, ?),
                 finished_at = COALESCE(finished_at, ?),
                 failure_reason = COALESCE(?, failure_reason)
             WHERE id = ?
               AND status NOT IN ('completed', 'failed', 'cancelled')",
        )
        .bind(status.as_str())
        .bind(started)
        .bind(finished)
        .bind(failure_reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("failed to update execution status")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn update_execution_stats(
        &self,
        id: Uuid,
        stats: &ExecutionStatsSnapshot,
    ) -> Result<()> {
        sqlx::query("UPDATE executions SET stats = ? WHERE id = ?")
            .bind(serde_json::to_string(stats)?)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("failed to update execution stats")?;
        Ok(())
    }

    pub async fn fetch_execution_status(&self, id: Uuid) -> Result<Option<ExecutionStatus>> {
        let row = sqlx::query("SELECT status FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch execution")?;

        Ok(row.and_then(|r| ExecutionStatus::parse(r.get::<String, _>("status").as_str())))
    }

    // ------------------------------------------------------------------
    // Node executions
    // ------------------------------------------------------------------

    pub async fn record_node_execution(&self, record: &NodeExecutionRecord) -> Result<()> {
        let duration_ms =
            (record.finished_at - record.started_at).num_milliseconds().max(0);

        sqlx::query(
            "INSERT INTO node_executions
             (execution_id, url_item_id, node_id, status, started_at, finished_at,
              duration_ms, error, result)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.execution_id.to_string())
        .bind(record.url_item_id)
        .bind(&record.node_id)
        .bind(record.status.as_str())
        .bind(to_millis(record.started_at))
        .bind(to_millis(record.finished_at))
        .bind(duration_ms)
        .bind(record.error.as_deref())
        .bind(record.result.as_ref().map(ToString::to_string))
        .execute(&self.pool)
        .await
        .context("failed to record node execution")?;
        Ok(())
    }

    pub async fn count_node_executions(&self, execution_id: Uuid, status: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM node_executions WHERE execution_id = ? AND status = ?",
        )
        .bind(execution_id.to_string())
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .context("failed to count node executions")?;
        Ok(row.get("n"))
    }

    // ------------------------------------------------------------------
    // Extracted items
    // ------------------------------------------------------------------

    /// Insert an extracted item, content-addressed by
    /// (execution, url, schema_key, hash(data)). Returns `false` when an
    /// identical item already exists.
    pub async fn insert_extracted_item(&self, item: &ExtractedItem) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO extracted_items
             (execution_id, url, schema_key, data, content_hash, extracted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(item.execution_id.to_string())
        .bind(&item.url)
        .bind(&item.schema_key)
        .bind(serde_json::to_string(&item.data)?)
        .bind(content_hash(&item.data))
        .bind(to_millis(item.extracted_at))
        .execute(&self.pool)
        .await
        .context("failed to insert extracted item")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_extracted_items(&self, execution_id: Uuid) -> Result<Vec<ExtractedItem>> {
        let rows = sqlx::query(
            "SELECT url, schema_key, data, extracted_at
             FROM extracted_items WHERE execution_id = ? ORDER BY id",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to list extracted items")?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let data: serde_json::Map<String, Value> =
                serde_json::from_str(&row.get::<String, _>("data"))
                    .context("corrupt extracted item data")?;
            items.push(ExtractedItem {
                execution_id,
                url: row.get("url"),
                schema_key: row.get("schema_key"),
                data,
                extracted_at: from_millis(row.get("extracted_at")),
            });
        }
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Recovery rules
    // ------------------------------------------------------------------

    pub async fn upsert_rule(&self, rule: &ContextAwareRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO recovery_rules
             (id, priority, definition, confidence, success_rate, usage_count, created_by)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 definition = excluded.definition,
                 confidence = excluded.confidence,
                 success_rate = excluded.success_rate,
                 usage_count = excluded.usage_count,
                 created_by = excluded.created_by",
        )
        .bind(&rule.id)
        .bind(rule.priority)
        .bind(serde_json::to_string(rule)?)
        .bind(rule.confidence)
        .bind(rule.success_rate)
        .bind(rule.usage_count as i64)
        .bind(rule.created_by.as_str())
        .execute(&self.pool)
        .await
        .context("failed to upsert recovery rule")?;
        Ok(())
    }

    pub async fn load_rules(&self) -> Result<Vec<ContextAwareRule>> {
        let rows = sqlx::query("SELECT definition FROM recovery_rules ORDER BY priority DESC")
            .fetch_all(&self.pool)
            .await
            .context("failed to load recovery rules")?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let rule: ContextAwareRule =
                serde_json::from_str(&row.get::<String, _>("definition"))
                    .context("corrupt recovery rule definition")?;
            rules.push(rule);
        }
        Ok(rules)
    }

    pub async fn delete_rule(&self, rule_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recovery_rules WHERE id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await
            .context("failed to delete recovery rule")?;
        Ok(result.rows_affected() == 1)
    }
}
