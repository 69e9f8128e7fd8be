//! Per-execution supervisor: validation, seeding, worker pool, completion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ConfigOverrides, EngineConfig};
use crate::browser::BrowserPool;
use crate::events::{EventBusRegistry, ExecutionEvent, ExecutionEventBus};
use crate::nodes::NodeRegistry;
use crate::queue::UrlQueue;
use crate::recovery::RecoveryPipeline;
use crate::storage::Store;
use crate::workflow::{self, Workflow};

use super::execution::{ExecutionStats, ExecutionStatsSnapshot, ExecutionStatus};
use super::tuning::ExecutionTuning;
use super::worker::worker_loop;
use super::EngineError;

/// Services shared by every execution of this orchestrator.
pub(crate) struct EngineShared {
    pub queue: Arc<UrlQueue>,
    pub pool: Arc<BrowserPool>,
    pub registry: Arc<NodeRegistry>,
    pub recovery: Arc<RecoveryPipeline>,
    pub store: Store,
    pub events: Arc<EventBusRegistry>,
    pub executions: DashMap<Uuid, Arc<ExecutionState>>,
}

/// Mutable state of one running execution, shared between supervisor and
/// workers.
pub(crate) struct ExecutionState {
    pub id: Uuid,
    pub workflow: Arc<Workflow>,
    /// Topological phases as indices into `workflow.nodes`
    pub phases: Vec<Vec<usize>>,
    /// Effective config (engine config + per-execution overrides)
    pub config: EngineConfig,
    pub stats: ExecutionStats,
    pub tuning: RwLock<ExecutionTuning>,
    pub cancelled: AtomicBool,
    pub paused: AtomicBool,
    /// Set by the supervisor once a terminal state is decided
    pub stopping: AtomicBool,
    pub in_flight: AtomicUsize,
    /// Fatal reason set by a worker on an abort-execution decision
    pub fatal: Mutex<Option<String>>,
    /// Recovery rules already applied per queue item id
    pub attempted: DashMap<i64, Vec<String>>,
    pub bus: Arc<ExecutionEventBus>,
}

/// Supervisor for workflow executions. One per process; executions run
/// concurrently, each with its own worker pool.
pub struct Orchestrator {
    config: EngineConfig,
    shared: Arc<EngineShared>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        store: Store,
        pool: Arc<BrowserPool>,
        registry: Arc<NodeRegistry>,
        recovery: Arc<RecoveryPipeline>,
    ) -> Self {
        let queue = Arc::new(UrlQueue::new(&store, &config));
        let events = Arc::new(EventBusRegistry::new(config.event_capacity()));
        Self {
            config,
            shared: Arc::new(EngineShared {
                queue,
                pool,
                registry,
                recovery,
                store,
                events,
                executions: DashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<UrlQueue> {
        &self.shared.queue
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBusRegistry> {
        &self.shared.events
    }

    #[must_use]
    pub fn recovery(&self) -> &Arc<RecoveryPipeline> {
        &self.shared.recovery
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.shared.store
    }

    /// Validate, seed, and launch an execution of `workflow` over `seeds`.
    ///
    /// Validation failures (bad graph, unknown executor, bad params, no
    /// usable seed) abort before any URL is processed.
    pub async fn start(
        &self,
        workflow: Workflow,
        seeds: Vec<String>,
        overrides: Option<ConfigOverrides>,
    ) -> Result<ExecutionHandle, EngineError> {
        let overrides = overrides.unwrap_or_default();
        let config = self.config.with_overrides(&overrides);

        workflow::validate(&workflow)?;
        let phase_ids = workflow::phases(&workflow)?;
        for node in &workflow.nodes {
            self.shared
                .registry
                .validate_node(node)
                .map_err(|e| EngineError::Validation(e.to_string()))?;
        }

        let index_of: HashMap<&str, usize> = workflow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();
        let phases: Vec<Vec<usize>> = phase_ids
            .iter()
            .map(|phase| phase.iter().map(|id| index_of[id.as_str()]).collect())
            .collect();

        let execution_id = Uuid::new_v4();
        let overrides_json = serde_json::to_value(&overrides)
            .map_err(|e| EngineError::Validation(e.to_string()))?;
        self.shared
            .store
            .insert_execution(execution_id, &workflow.id, &overrides_json)
            .await?;

        let mut seeded = 0usize;
        for seed in &seeds {
            match self.shared.queue.enqueue(execution_id, seed, 0, None).await {
                Ok(outcome) if outcome.is_enqueued() => seeded += 1,
                Ok(_) => {}
                Err(crate::queue::QueueError::InvalidUrl(e)) => {
                    return Err(EngineError::Validation(format!("seed '{seed}': {e}")));
                }
                Err(e) => return Err(e.into()),
            }
        }
        if seeded == 0 {
            return Err(EngineError::Validation("no seed URLs enqueued".into()));
        }

        let bus = self.shared.events.get_or_create(execution_id);
        let state = Arc::new(ExecutionState {
            id: execution_id,
            workflow: Arc::new(workflow),
            phases,
            tuning: RwLock::new(ExecutionTuning::new(config.concurrent_workers())),
            config,
            stats: ExecutionStats::default(),
            cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            fatal: Mutex::new(None),
            attempted: DashMap::new(),
            bus: bus.clone(),
        });
        self.shared.executions.insert(execution_id, state.clone());

        self.shared
            .store
            .update_execution_status(execution_id, ExecutionStatus::Running, None)
            .await?;
        info!(
            execution = %execution_id,
            workflow = %state.workflow.id,
            workers = state.config.concurrent_workers(),
            seeds = seeded,
            "execution started"
        );

        let shared = Arc::clone(&self.shared);
        let supervisor_state = Arc::clone(&state);
        let supervisor = tokio::spawn(async move { supervise(supervisor_state, shared).await });

        Ok(ExecutionHandle {
            id: execution_id,
            state,
            supervisor: tokio::sync::Mutex::new(Some(supervisor)),
        })
    }

    /// Stop leasing new URLs; in-flight URLs complete naturally.
    pub async fn pause(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let state = self.execution(execution_id)?;
        if state.paused.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.queue.pause(execution_id).await?;
        self.shared
            .store
            .update_execution_status(execution_id, ExecutionStatus::Paused, None)
            .await?;
        state.bus.publish(ExecutionEvent::execution_paused(execution_id));
        info!(execution = %execution_id, "execution paused");
        Ok(())
    }

    pub async fn resume(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let state = self.execution(execution_id)?;
        if !state.paused.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.queue.resume(execution_id).await?;
        self.shared
            .store
            .update_execution_status(execution_id, ExecutionStatus::Running, None)
            .await?;
        state.bus.publish(ExecutionEvent::execution_resumed(execution_id));
        info!(execution = %execution_id, "execution resumed");
        Ok(())
    }

    /// Signal cancellation. Workers abort their current URL cleanly; the
    /// supervisor finalizes once in-flight work drains.
    pub fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let state = self.execution(execution_id)?;
        state.cancelled.store(true, Ordering::SeqCst);
        info!(execution = %execution_id, "execution cancellation requested");
        Ok(())
    }

    fn execution(&self, execution_id: Uuid) -> Result<Arc<ExecutionState>, EngineError> {
        self.shared
            .executions
            .get(&execution_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(EngineError::NotFound(execution_id))
    }
}

/// Handle returned by [`Orchestrator::start`].
pub struct ExecutionHandle {
    id: Uuid,
    state: Arc<ExecutionState>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<ExecutionStatus>>>,
}

impl ExecutionHandle {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to this execution's event stream.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.state.bus.subscribe()
    }

    #[must_use]
    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.state.stats.snapshot()
    }

    /// Wait for the execution to reach a terminal state.
    pub async fn await_completion(&self) -> Result<ExecutionStatus, EngineError> {
        let handle = self
            .supervisor
            .lock()
            .await
            .take()
            .ok_or_else(|| EngineError::Join("completion already awaited".into()))?;
        handle.await.map_err(|e| EngineError::Join(e.to_string()))
    }
}

/// Completion detection ticks needed with an empty queue and no in-flight
/// work before the execution is declared complete.
const COMPLETION_GRACE_TICKS: u32 = 2;

async fn supervise(state: Arc<ExecutionState>, shared: Arc<EngineShared>) -> ExecutionStatus {
    let interval = state.config.queue_check_interval();
    let mut workers: Vec<(usize, JoinHandle<()>)> = Vec::new();
    let mut grace = 0u32;

    // First event on the stream; published from the supervisor so
    // subscribers attached right after start() still observe it
    state.bus.publish(ExecutionEvent::execution_started(
        state.id,
        &state.workflow.id,
        state.config.concurrent_workers(),
    ));

    let (status, reason) = loop {
        // Keep the worker pool at the tuned target; indices above the
        // target drain themselves, missing indices below it are respawned
        workers.retain(|(_, handle)| !handle.is_finished());
        if !state.stopping.load(Ordering::SeqCst) && !state.cancelled.load(Ordering::SeqCst) {
            let target = state.tuning.read().target_workers;
            let live: HashSet<usize> = workers.iter().map(|(i, _)| *i).collect();
            for index in 0..target {
                if !live.contains(&index) {
                    let worker_state = Arc::clone(&state);
                    let worker_shared = Arc::clone(&shared);
                    workers.push((
                        index,
                        tokio::spawn(async move {
                            worker_loop(worker_state, worker_shared, index).await;
                        }),
                    ));
                }
            }
        }

        tokio::time::sleep(interval).await;

        if let Err(e) = shared.queue.reclaim().await {
            warn!(execution = %state.id, error = %e, "lease reclaim failed");
        }

        if let Some(reason) = state.fatal.lock().clone() {
            break (ExecutionStatus::Failed, Some(reason));
        }

        if state.cancelled.load(Ordering::SeqCst) {
            // Bounded grace for in-flight URLs to finish cleanly
            let deadline = tokio::time::Instant::now() + interval * 4;
            while state.in_flight.load(Ordering::SeqCst) > 0
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(interval / 4).await;
            }
            break (ExecutionStatus::Cancelled, None);
        }

        if state.paused.load(Ordering::SeqCst) {
            grace = 0;
            continue;
        }

        let queue_stats = match shared.queue.stats(state.id).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(execution = %state.id, error = %e, "queue stats failed");
                continue;
            }
        };

        if queue_stats.is_drained() && state.in_flight.load(Ordering::SeqCst) == 0 {
            grace += 1;
            if grace >= COMPLETION_GRACE_TICKS {
                break (ExecutionStatus::Completed, None);
            }
        } else {
            grace = 0;
        }
    };

    finalize(&state, &shared, workers, status, reason).await;
    status
}

async fn finalize(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    workers: Vec<(usize, JoinHandle<()>)>,
    status: ExecutionStatus,
    reason: Option<String>,
) {
    state.stopping.store(true, Ordering::SeqCst);

    let drain = state.config.queue_check_interval() * 2;
    for (index, handle) in workers {
        if tokio::time::timeout(drain, handle).await.is_err() {
            debug!(execution = %state.id, worker = index, "worker did not drain, continuing");
        }
    }

    if let Err(e) = shared
        .store
        .update_execution_status(state.id, status, reason.as_deref())
        .await
    {
        warn!(execution = %state.id, error = %e, "failed to persist terminal state");
    }
    let snapshot = state.stats.snapshot();
    if let Err(e) = shared.store.update_execution_stats(state.id, &snapshot).await {
        warn!(execution = %state.id, error = %e, "failed to persist final stats");
    }

    let event = match status {
        ExecutionStatus::Failed => ExecutionEvent::execution_failed(
            state.id,
            reason.as_deref().unwrap_or("unknown"),
        ),
        ExecutionStatus::Cancelled => ExecutionEvent::execution_cancelled(state.id),
        _ => ExecutionEvent::execution_completed(
            state.id,
            serde_json::to_value(&snapshot).unwrap_or_default(),
        ),
    };
    state.bus.publish(event);

    info!(
        execution = %state.id,
        status = status.as_str(),
        processed = snapshot.urls_processed,
        failed = snapshot.urls_failed,
        extracted = snapshot.items_extracted,
        "execution finished"
    );

    shared.recovery.reset_execution(state.id);
    shared.executions.remove(&state.id);
    shared.events.remove(state.id);
}
