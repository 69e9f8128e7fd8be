//! Execution engine: per-execution supervisor, worker pool, and tuning.

mod execution;
mod orchestrator;
mod tuning;
mod worker;

use uuid::Uuid;

use crate::browser::PoolError;
use crate::queue::QueueError;
use crate::workflow::WorkflowError;

pub use execution::{ExecutionStats, ExecutionStatsSnapshot, ExecutionStatus};
pub use orchestrator::{ExecutionHandle, Orchestrator};
pub use tuning::ExecutionTuning;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("workflow invalid: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("execution task failed: {0}")]
    Join(String),
}
