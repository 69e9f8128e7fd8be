//! Event type definitions for the execution lifecycle stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Discriminant of an [`ExecutionEvent`], matching the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionPaused,
    ExecutionResumed,
    ExecutionCancelled,
    PhaseStarted,
    PhaseCompleted,
    PhaseFailed,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    UrlDiscovered,
    ItemExtracted,
    StatsUpdated,
    ErrorRecoveryApplied,
}

/// One event on an execution's stream.
///
/// Serializes to `{"type": …, "execution_id": …, "timestamp": ISO-8601,
/// "data": {…}}`, the shape delivered to SSE subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub execution_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
}

impl ExecutionEvent {
    #[must_use]
    pub fn new(kind: EventKind, execution_id: Uuid, data: Value) -> Self {
        Self {
            kind,
            execution_id,
            timestamp: Utc::now(),
            data,
        }
    }

    #[must_use]
    pub fn execution_started(execution_id: Uuid, workflow_id: &str, workers: usize) -> Self {
        Self::new(
            EventKind::ExecutionStarted,
            execution_id,
            json!({ "workflow_id": workflow_id, "workers": workers }),
        )
    }

    #[must_use]
    pub fn execution_completed(execution_id: Uuid, stats: Value) -> Self {
        Self::new(EventKind::ExecutionCompleted, execution_id, json!({ "stats": stats }))
    }

    #[must_use]
    pub fn execution_failed(execution_id: Uuid, reason: &str) -> Self {
        Self::new(EventKind::ExecutionFailed, execution_id, json!({ "reason": reason }))
    }

    #[must_use]
    pub fn execution_paused(execution_id: Uuid) -> Self {
        Self::new(EventKind::ExecutionPaused, execution_id, Value::Null)
    }

    #[must_use]
    pub fn execution_resumed(execution_id: Uuid) -> Self {
        Self::new(EventKind::ExecutionResumed, execution_id, Value::Null)
    }

    #[must_use]
    pub fn execution_cancelled(execution_id: Uuid) -> Self {
        Self::new(EventKind::ExecutionCancelled, execution_id, Value::Null)
    }

    #[must_use]
    pub fn phase_started(execution_id: Uuid, phase: usize, url: &str) -> Self {
        Self::new(
            EventKind::PhaseStarted,
            execution_id,
            json!({ "phase": phase, "url": url }),
        )
    }

    #[must_use]
    pub fn phase_completed(execution_id: Uuid, phase: usize, url: &str) -> Self {
        Self::new(
            EventKind::PhaseCompleted,
            execution_id,
            json!({ "phase": phase, "url": url }),
        )
    }

    #[must_use]
    pub fn phase_failed(execution_id: Uuid, phase: usize, url: &str, error: &str) -> Self {
        Self::new(
            EventKind::PhaseFailed,
            execution_id,
            json!({ "phase": phase, "url": url, "error": error }),
        )
    }

    #[must_use]
    pub fn node_started(execution_id: Uuid, node_id: &str, url: &str) -> Self {
        Self::new(
            EventKind::NodeStarted,
            execution_id,
            json!({ "node_id": node_id, "url": url }),
        )
    }

    #[must_use]
    pub fn node_completed(execution_id: Uuid, node_id: &str, url: &str, duration_ms: i64) -> Self {
        Self::new(
            EventKind::NodeCompleted,
            execution_id,
            json!({ "node_id": node_id, "url": url, "duration_ms": duration_ms }),
        )
    }

    #[must_use]
    pub fn node_failed(execution_id: Uuid, node_id: &str, url: &str, error: &str) -> Self {
        Self::new(
            EventKind::NodeFailed,
            execution_id,
            json!({ "node_id": node_id, "url": url, "error": error }),
        )
    }

    #[must_use]
    pub fn url_discovered(execution_id: Uuid, url: &str, depth: u32, source_node: &str) -> Self {
        Self::new(
            EventKind::UrlDiscovered,
            execution_id,
            json!({ "url": url, "depth": depth, "source_node": source_node }),
        )
    }

    #[must_use]
    pub fn item_extracted(execution_id: Uuid, url: &str, schema_key: &str, fields: usize) -> Self {
        Self::new(
            EventKind::ItemExtracted,
            execution_id,
            json!({ "url": url, "schema_key": schema_key, "fields": fields }),
        )
    }

    #[must_use]
    pub fn stats_updated(execution_id: Uuid, stats: Value) -> Self {
        Self::new(EventKind::StatsUpdated, execution_id, stats)
    }

    #[must_use]
    pub fn error_recovery_applied(
        execution_id: Uuid,
        rule_id: Option<&str>,
        actions: &[String],
        reason: &str,
    ) -> Self {
        Self::new(
            EventKind::ErrorRecoveryApplied,
            execution_id,
            json!({ "rule_id": rule_id, "actions": actions, "reason": reason }),
        )
    }
}
