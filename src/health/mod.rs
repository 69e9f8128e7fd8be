//! Cron-driven health checks: replay workflows against a baseline.
//!
//! Each registered workflow carries a cron spec and a [`Baseline`]. On
//! tick, the scheduler replays the workflow against the baseline's seed
//! URL only (no frontier expansion), runs every node's monitoring
//! validation, and produces a [`HealthReport`]. Regressions go to the
//! optional notifier.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserPool, PoolError};
use crate::context::ExecutionContext;
use crate::nodes::{ExecutionInput, NodeRegistry};
use crate::queue::{UrlQueueItem, UrlStatus};
use crate::workflow::{self, Workflow, WorkflowError};

/// Default time between scheduler wakeups.
const DEFAULT_TICK: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("invalid cron spec '{spec}': {reason}")]
    InvalidSchedule { spec: String, reason: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("driver failure during health check: {0}")]
    Driver(String),

    #[error("no baseline registered for workflow '{0}'")]
    NoBaseline(String),
}

/// Per-node health outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Broken,
}

/// Known-good expectations for one node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeBaseline {
    /// Expected HTTP status of the node's navigation, if any
    #[serde(default)]
    pub expected_status: Option<u16>,
    /// Minimum elements the node's selector must match
    #[serde(default)]
    pub min_elements: Option<usize>,
    /// Output fields that must be present and non-null
    #[serde(default)]
    pub required_fields: Vec<String>,
}

/// Known-good outcome for one workflow, recorded when it last worked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub seed_url: String,
    /// node id → expectations; nodes without an entry get defaults
    #[serde(default)]
    pub nodes: HashMap<String, NodeBaseline>,
}

/// Result of replaying one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCheck {
    pub node_id: String,
    pub status: HealthStatus,
    pub duration_ms: u64,
    pub metrics: serde_json::Map<String, serde_json::Value>,
    pub issues: Vec<String>,
}

/// Full report of one health-check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub workflow_id: String,
    pub run_at: DateTime<Utc>,
    pub overall: HealthStatus,
    pub nodes: Vec<NodeCheck>,
}

impl HealthReport {
    #[must_use]
    pub fn is_regression(&self) -> bool {
        self.overall != HealthStatus::Healthy
    }
}

/// Notification hook invoked on regressions.
#[async_trait]
pub trait RegressionNotifier: Send + Sync {
    async fn notify(&self, report: &HealthReport);
}

struct ScheduledCheck {
    workflow: Arc<Workflow>,
    schedule: cron::Schedule,
    baseline: Baseline,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

/// Owns the cron entries and the tick loop.
pub struct HealthCheckScheduler {
    pool: Arc<BrowserPool>,
    registry: Arc<NodeRegistry>,
    entries: DashMap<String, Arc<ScheduledCheck>>,
    notifier: Option<Arc<dyn RegressionNotifier>>,
    tick: Duration,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthCheckScheduler {
    #[must_use]
    pub fn new(pool: Arc<BrowserPool>, registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            registry,
            entries: DashMap::new(),
            notifier: None,
            tick: DEFAULT_TICK,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn with_notifier(
        pool: Arc<BrowserPool>,
        registry: Arc<NodeRegistry>,
        notifier: Arc<dyn RegressionNotifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            registry,
            entries: DashMap::new(),
            notifier: Some(notifier),
            tick: DEFAULT_TICK,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        })
    }

    /// Register (or replace) a workflow's schedule and baseline.
    pub fn register(
        &self,
        workflow: Workflow,
        cron_spec: &str,
        baseline: Baseline,
    ) -> Result<(), HealthError> {
        workflow::validate(&workflow)?;
        let schedule =
            cron::Schedule::from_str(cron_spec).map_err(|e| HealthError::InvalidSchedule {
                spec: cron_spec.to_string(),
                reason: e.to_string(),
            })?;

        let next = schedule.upcoming(Utc).next();
        debug!(workflow = %workflow.id, ?next, "health check registered");
        self.entries.insert(
            workflow.id.clone(),
            Arc::new(ScheduledCheck {
                workflow: Arc::new(workflow),
                schedule,
                baseline,
                next_run: Mutex::new(next),
            }),
        );
        Ok(())
    }

    pub fn unregister(&self, workflow_id: &str) {
        self.entries.remove(workflow_id);
    }

    /// Start the tick loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("health-check scheduler started");

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(scheduler.tick) => {}
                    () = scheduler.shutdown.notified() => break,
                }
                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                scheduler.run_due_checks().await;
            }
            debug!("health-check scheduler loop exited");
        });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the loop, letting a check in progress finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("health-check scheduler stopped");
    }

    async fn run_due_checks(&self) {
        let now = Utc::now();
        let due: Vec<Arc<ScheduledCheck>> = self
            .entries
            .iter()
            .filter(|entry| {
                entry
                    .next_run
                    .lock()
                    .is_some_and(|next| next <= now)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for check in due {
            *check.next_run.lock() = check.schedule.upcoming(Utc).next();

            match self.run_check(&check.workflow, &check.baseline).await {
                Ok(report) => {
                    if report.is_regression() {
                        warn!(
                            workflow = %report.workflow_id,
                            status = ?report.overall,
                            "health check regression"
                        );
                        if let Some(notifier) = &self.notifier {
                            notifier.notify(&report).await;
                        }
                    } else {
                        debug!(workflow = %report.workflow_id, "health check passed");
                    }
                }
                Err(e) => {
                    warn!(workflow = %check.workflow.id, error = %e, "health check run failed");
                }
            }
        }
    }

    /// Replay a workflow against its baseline seed, one node at a time in
    /// topological order. No URL expansion happens.
    pub async fn run_check(
        &self,
        workflow: &Workflow,
        baseline: &Baseline,
    ) -> Result<HealthReport, HealthError> {
        let order = workflow::validate(workflow)?;
        let lease = self.pool.acquire().await?;
        let page = lease
            .context()
            .new_page()
            .await
            .map_err(|e| HealthError::Driver(e.to_string()))?;

        let run_id = Uuid::new_v4();
        let item = replay_item(run_id, &baseline.seed_url);
        let mut ctx = ExecutionContext::new(run_id, &item);
        let default_baseline = NodeBaseline::default();

        let mut checks = Vec::with_capacity(order.len());
        for node_id in &order {
            let Some(node) = workflow.node(node_id) else {
                continue;
            };
            let executor = match self.registry.resolve(node) {
                Ok(executor) => executor,
                Err(e) => {
                    checks.push(NodeCheck {
                        node_id: node.id.clone(),
                        status: HealthStatus::Broken,
                        duration_ms: 0,
                        metrics: serde_json::Map::new(),
                        issues: vec![e.to_string()],
                    });
                    continue;
                }
            };

            let node_baseline = baseline.nodes.get(&node.id).unwrap_or(&default_baseline);
            let input = ExecutionInput {
                page: Arc::clone(&page),
                ctx: &mut ctx,
                item: &item,
                node_id: &node.id,
                params: &node.params,
                execution_id: run_id,
                timeout: Duration::from_secs(30),
            };
            checks.push(executor.validate_for_monitoring(input, node_baseline).await);
        }

        let overall = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Ok(HealthReport {
            workflow_id: workflow.id.clone(),
            run_at: Utc::now(),
            overall,
            nodes: checks,
        })
    }
}

/// A synthetic queue item standing in for the seed during replay.
fn replay_item(run_id: Uuid, seed_url: &str) -> UrlQueueItem {
    UrlQueueItem {
        id: -1,
        execution_id: run_id,
        url: seed_url.to_string(),
        depth: 0,
        status: UrlStatus::InProgress,
        retry_count: 0,
        source_node_id: None,
        enqueued_at: Utc::now(),
        leased_by: None,
        lease_deadline: None,
        last_error: None,
    }
}
