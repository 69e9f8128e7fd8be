//! Execution lifecycle state machine and counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle of one workflow run.
///
/// `pending → running → (paused ⇄ running) → {completed, failed,
/// cancelled}`. Terminal states are write-once; the store enforces the
/// same rule on its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Paused) => true,
            (Self::Paused, Self::Running) => true,
            (Self::Running | Self::Paused, Self::Completed | Self::Failed | Self::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

/// Live counters for one execution. Updated lock-free by workers.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    pub urls_processed: AtomicU64,
    pub urls_failed: AtomicU64,
    pub urls_skipped: AtomicU64,
    pub items_extracted: AtomicU64,
    pub nodes_executed: AtomicU64,
    pub recovery_activations: AtomicU64,
}

impl ExecutionStats {
    #[must_use]
    pub fn snapshot(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            urls_processed: self.urls_processed.load(Ordering::Relaxed),
            urls_failed: self.urls_failed.load(Ordering::Relaxed),
            urls_skipped: self.urls_skipped.load(Ordering::Relaxed),
            items_extracted: self.items_extracted.load(Ordering::Relaxed),
            nodes_executed: self.nodes_executed.load(Ordering::Relaxed),
            recovery_activations: self.recovery_activations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters, the shape persisted and streamed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatsSnapshot {
    pub urls_processed: u64,
    pub urls_failed: u64,
    pub urls_skipped: u64,
    pub items_extracted: u64,
    pub nodes_executed: u64,
    pub recovery_activations: u64,
}
