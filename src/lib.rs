//! Crawlify: a workflow-driven web-crawling and scraping engine.
//!
//! Workflows are DAGs of typed nodes (navigate, extract, discover, …)
//! executed per URL against a pool of isolated browser contexts. An
//! execution runs one workflow over a durable, deduplicated URL frontier,
//! streaming lifecycle events and adapting to failures through a layered
//! recovery pipeline (pattern analysis → rules → optional AI → learning).
//!
//! The browser engine itself is abstracted behind [`browser::BrowserDriver`];
//! bind a real headless driver in deployments, a mock in tests.

pub mod browser;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod health;
pub mod nodes;
pub mod queue;
pub mod recovery;
pub mod storage;
pub mod utils;
pub mod workflow;

pub use browser::{
    BrowserContext, BrowserDriver, BrowserPool, BrowserProfile, ContextLease, DriverError,
    Element, NavigationResult, Page, PoolConfig, PoolError, WaitUntil,
};
pub use config::{ConfigOverrides, EngineConfig, RecoveryThresholds};
pub use context::{EXTRACTED_FIELDS_KEY, ExecutionContext};
pub use engine::{
    EngineError, ExecutionHandle, ExecutionStats, ExecutionStatsSnapshot, ExecutionStatus,
    Orchestrator,
};
pub use error::{ErrorKind, ExecError};
pub use events::{EventBusRegistry, EventKind, ExecutionEvent, ExecutionEventBus};
pub use health::{
    Baseline, HealthCheckScheduler, HealthReport, HealthStatus, NodeBaseline, NodeCheck,
    RegressionNotifier,
};
pub use nodes::{ExecutionInput, ExecutionOutput, NodeExecutor, NodeRegistry};
pub use queue::{EnqueueOutcome, QueueError, QueueStats, UrlQueue, UrlQueueItem, UrlStatus};
pub use recovery::{
    AiResolver, ContextAwareRule, Disposition, ErrorContext, RecoveryAction, RecoveryDecision,
    RecoveryPipeline, RuleOrigin, RulesEngine,
};
pub use storage::{ExtractedItem, Store};
pub use workflow::{Edge, NodeDefinition, NodeType, Workflow, WorkflowStatus};
