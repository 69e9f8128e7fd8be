//! Worker loop: lease a URL, walk the workflow phases, record everything.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::browser::{BrowserProfile, ContextLease, Page, PoolError};
use crate::context::ExecutionContext;
use crate::error::ExecError;
use crate::events::ExecutionEvent;
use crate::nodes::ExecutionInput;
use crate::queue::{UrlQueueItem, UrlStatus};
use crate::recovery::{Disposition, ErrorContext, RecoveryAction, RecoveryDecision};
use crate::storage::{ExtractedItem, NodeExecutionRecord, NodeExecutionStatus};
use crate::utils::extract_domain;
use crate::workflow::{NodeDefinition, NodeType};

use super::execution::ExecutionStatus;
use super::orchestrator::{EngineShared, ExecutionState};

/// Response bodies attached to recovery projections are truncated to this.
const MAX_PROJECTED_BODY: usize = 2_000;

/// How one URL ended, when it did not complete.
enum UrlOutcome {
    Cancelled,
    Fail { error: String, retryable: bool },
    Abort { reason: String },
}

/// How one node ended, when it did not succeed.
enum NodeFailure {
    /// Optional node failed; the URL continues
    Tolerated,
    Url { error: String, retryable: bool },
    Abort { reason: String },
}

pub(crate) async fn worker_loop(
    state: Arc<ExecutionState>,
    shared: Arc<EngineShared>,
    index: usize,
) {
    let worker_id = format!("{}-w{index}", state.id.simple());
    let interval = state.config.queue_check_interval();
    debug!(execution = %state.id, worker = %worker_id, "worker started");

    loop {
        if state.stopping.load(Ordering::SeqCst) || state.cancelled.load(Ordering::SeqCst) {
            break;
        }
        // Drain when reduce_workers lowered the target below this index
        if index >= state.tuning.read().target_workers {
            debug!(execution = %state.id, worker = %worker_id, "worker drained");
            break;
        }
        if state.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(interval).await;
            continue;
        }

        let item = match shared.queue.lease(state.id, &worker_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tokio::time::sleep(interval).await;
                continue;
            }
            Err(e) => {
                warn!(execution = %state.id, error = %e, "lease failed");
                tokio::time::sleep(interval).await;
                continue;
            }
        };

        state.in_flight.fetch_add(1, Ordering::SeqCst);
        process_item(&state, &shared, &item).await;
        state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    debug!(execution = %state.id, worker = %worker_id, "worker exited");
}

async fn process_item(state: &Arc<ExecutionState>, shared: &Arc<EngineShared>, item: &UrlQueueItem) {
    let lease = match acquire_lease(state, shared).await {
        Ok(lease) => lease,
        Err(e) => {
            // Pool saturation and driver failures are retryable for the URL
            warn!(execution = %state.id, url = %item.url, error = %e, "context acquire failed");
            let _ = shared.queue.fail(item.id, &e.to_string(), true).await;
            return;
        }
    };

    let page = match lease.context().new_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!(execution = %state.id, url = %item.url, error = %e, "page open failed");
            let _ = shared.queue.fail(item.id, &e.to_string(), true).await;
            return;
        }
    };

    let mut ctx = ExecutionContext::new(state.id, item);
    let outcome = run_phases(state, shared, &page, &mut ctx, item).await;
    drop(lease);

    match outcome {
        Ok(()) => {
            if let Err(e) = shared.queue.complete(item.id).await {
                warn!(execution = %state.id, item = item.id, error = %e, "complete failed");
            }
            state.stats.urls_processed.fetch_add(1, Ordering::Relaxed);
            state.attempted.remove(&item.id);
        }
        Err(UrlOutcome::Cancelled) => {
            let _ = shared.queue.skip(item.id).await;
            state.stats.urls_skipped.fetch_add(1, Ordering::Relaxed);
        }
        Err(UrlOutcome::Fail { error, retryable }) => {
            match shared.queue.fail(item.id, &error, retryable).await {
                Ok(UrlStatus::Failed) => {
                    state.stats.urls_failed.fetch_add(1, Ordering::Relaxed);
                    state.attempted.remove(&item.id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(execution = %state.id, item = item.id, error = %e, "fail update failed");
                }
            }
        }
        Err(UrlOutcome::Abort { reason }) => {
            let _ = shared.queue.fail(item.id, &reason, false).await;
            state.stats.urls_failed.fetch_add(1, Ordering::Relaxed);
            *state.fatal.lock() = Some(reason);
        }
    }

    let snapshot = state.stats.snapshot();
    state.bus.publish(ExecutionEvent::stats_updated(
        state.id,
        serde_json::to_value(&snapshot).unwrap_or_default(),
    ));
    if let Err(e) = shared.store.update_execution_stats(state.id, &snapshot).await {
        warn!(execution = %state.id, error = %e, "stats persist failed");
    }
}

/// Pick a context honoring the execution's current tuning: a proxied
/// one-shot context after rotate_proxy, a stealth profile after
/// enable_stealth, the default pool otherwise.
async fn acquire_lease(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
) -> Result<ContextLease, PoolError> {
    let (rotations, stealth) = {
        let tuning = state.tuning.read();
        (tuning.proxy_rotations, tuning.stealth)
    };

    let proxies = state.config.proxies();
    if rotations > 0 && !proxies.is_empty() {
        let proxy = &proxies[(rotations as usize - 1) % proxies.len()];
        return shared.pool.acquire_with_proxy(proxy).await;
    }
    if stealth {
        return shared
            .pool
            .acquire_with_profile(BrowserProfile::stealth())
            .await;
    }
    shared.pool.acquire().await
}

async fn run_phases(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    page: &Arc<dyn Page>,
    ctx: &mut ExecutionContext,
    item: &UrlQueueItem,
) -> Result<(), UrlOutcome> {
    for (phase_idx, phase) in state.phases.iter().enumerate() {
        state
            .bus
            .publish(ExecutionEvent::phase_started(state.id, phase_idx, &item.url));

        for &node_idx in phase {
            let node = &state.workflow.nodes[node_idx];

            if state.cancelled.load(Ordering::SeqCst) {
                record_attempt(
                    shared,
                    state,
                    item,
                    node,
                    NodeExecutionStatus::Skipped,
                    None,
                    None,
                    None,
                )
                .await;
                return Err(UrlOutcome::Cancelled);
            }

            if gate_closed(state, node, ctx) {
                debug!(execution = %state.id, node = %node.id, "skipping gated node");
                record_attempt(
                    shared,
                    state,
                    item,
                    node,
                    NodeExecutionStatus::Skipped,
                    None,
                    None,
                    None,
                )
                .await;
                continue;
            }

            match run_node(state, shared, page, ctx, item, node).await {
                Ok(()) | Err(NodeFailure::Tolerated) => {}
                Err(NodeFailure::Url { error, retryable }) => {
                    state.bus.publish(ExecutionEvent::phase_failed(
                        state.id, phase_idx, &item.url, &error,
                    ));
                    return Err(UrlOutcome::Fail { error, retryable });
                }
                Err(NodeFailure::Abort { reason }) => {
                    state.bus.publish(ExecutionEvent::phase_failed(
                        state.id, phase_idx, &item.url, &reason,
                    ));
                    return Err(UrlOutcome::Abort { reason });
                }
            }
        }

        state
            .bus
            .publish(ExecutionEvent::phase_completed(state.id, phase_idx, &item.url));
    }
    Ok(())
}

/// A node depending on a conditional is skipped while that gate is closed.
fn gate_closed(state: &ExecutionState, node: &NodeDefinition, ctx: &ExecutionContext) -> bool {
    state.workflow.dependencies_of(&node.id).iter().any(|dep| {
        state
            .workflow
            .node(dep)
            .is_some_and(|d| d.node_type == NodeType::Conditional)
            && !ctx.gate_open(dep)
    })
}

async fn run_node(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    page: &Arc<dyn Page>,
    ctx: &mut ExecutionContext,
    item: &UrlQueueItem,
    node: &NodeDefinition,
) -> Result<(), NodeFailure> {
    let executor = match shared.registry.resolve(node) {
        Ok(executor) => executor,
        Err(e) => {
            // Registry was validated at start; losing a plugin mid-run is fatal
            return Err(NodeFailure::Abort {
                reason: e.to_string(),
            });
        }
    };

    state
        .bus
        .publish(ExecutionEvent::node_started(state.id, &node.id, &item.url));
    let started = Utc::now();
    let timeout = state
        .tuning
        .read()
        .effective_timeout(state.config.node_timeout());

    let input = ExecutionInput {
        page: Arc::clone(page),
        ctx,
        item,
        node_id: &node.id,
        params: &node.params,
        execution_id: state.id,
        timeout,
    };

    // Executors bound their own page operations; the outer timeout is a
    // backstop against drivers that ignore theirs
    let result = match tokio::time::timeout(
        timeout + Duration::from_millis(250),
        executor.execute(input),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExecError::Timeout(timeout)),
    };

    let finished = Utc::now();
    state.stats.nodes_executed.fetch_add(1, Ordering::Relaxed);

    match result {
        Ok(output) => {
            record_attempt(
                shared,
                state,
                item,
                node,
                NodeExecutionStatus::Success,
                Some((started, finished)),
                None,
                Some(output.result.clone()),
            )
            .await;

            // Credit the recovery pipeline; the first success after a rule
            // was applied counts as that rule's success
            let credited = state
                .attempted
                .get(&item.id)
                .and_then(|rules| rules.last().cloned());
            if credited.is_some() {
                state.attempted.remove(&item.id);
            }
            shared
                .recovery
                .record_success(state.id, credited.as_deref())
                .await;

            state.bus.publish(ExecutionEvent::node_completed(
                state.id,
                &node.id,
                &item.url,
                (finished - started).num_milliseconds(),
            ));

            merge_discovered(state, shared, item, node, &output.discovered_urls).await;
            persist_extracted(state, shared, item, &output).await;

            let delay = state.tuning.read().extra_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        }
        Err(error) => {
            record_attempt(
                shared,
                state,
                item,
                node,
                NodeExecutionStatus::Failed,
                Some((started, finished)),
                Some(error.to_string()),
                None,
            )
            .await;
            state.bus.publish(ExecutionEvent::node_failed(
                state.id,
                &node.id,
                &item.url,
                &error.to_string(),
            ));

            if !node.required {
                debug!(
                    execution = %state.id,
                    node = %node.id,
                    error = %error,
                    "optional node failed, continuing"
                );
                return Err(NodeFailure::Tolerated);
            }

            handle_failure(state, shared, page, item, node, error).await
        }
    }
}

async fn handle_failure(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    page: &Arc<dyn Page>,
    item: &UrlQueueItem,
    node: &NodeDefinition,
    error: ExecError,
) -> Result<(), NodeFailure> {
    // 4xx responses carry block/challenge pages worth projecting to rules
    let response_body = match &error {
        ExecError::RateLimited { .. } | ExecError::Blocked { .. } => page
            .content()
            .await
            .ok()
            .map(|body| body.chars().take(MAX_PROJECTED_BODY).collect::<String>()),
        _ => None,
    };

    let attempted_rules = state
        .attempted
        .get(&item.id)
        .map(|rules| rules.clone())
        .unwrap_or_default();

    let projection = ErrorContext {
        url: item.url.clone(),
        domain: extract_domain(&item.url).unwrap_or_default(),
        error_type: error.kind().as_str().to_string(),
        status_code: error.status_code(),
        response_body,
        attempted_rules,
    };

    let decision = shared.recovery.handle(state.id, &error, projection).await;

    if !decision.actions.is_empty() {
        state.stats.recovery_activations.fetch_add(1, Ordering::Relaxed);
        apply_actions(state, shared, &decision).await;

        let names: Vec<String> = decision
            .actions
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        state.bus.publish(ExecutionEvent::error_recovery_applied(
            state.id,
            decision.rule_id.as_deref(),
            &names,
            &decision.reason,
        ));
    }
    if let Some(rule_id) = &decision.rule_id {
        state
            .attempted
            .entry(item.id)
            .or_default()
            .push(rule_id.clone());
    }

    // The node's own retry policy can cap the URL's remaining budget: a
    // zero-retry node turns retryable failures terminal
    let retryable = match &node.retry_policy {
        Some(policy) if policy.max_retries == 0 => false,
        _ => true,
    };

    match decision.disposition {
        Disposition::Retry => Err(NodeFailure::Url {
            error: error.to_string(),
            retryable,
        }),
        Disposition::FailUrl => Err(NodeFailure::Url {
            error: error.to_string(),
            retryable: false,
        }),
        Disposition::AbortExecution => Err(NodeFailure::Abort {
            reason: decision.reason,
        }),
    }
}

async fn apply_actions(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    decision: &RecoveryDecision,
) {
    for action in &decision.actions {
        let applied = state.tuning.write().apply(action);
        if !applied {
            debug!(action = action.name(), "deduplicated repeated recovery action");
            continue;
        }

        match action {
            RecoveryAction::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            }
            RecoveryAction::PauseExecution => {
                if !state.paused.swap(true, Ordering::SeqCst) {
                    let _ = shared.queue.pause(state.id).await;
                    let _ = shared
                        .store
                        .update_execution_status(state.id, ExecutionStatus::Paused, None)
                        .await;
                    state
                        .bus
                        .publish(ExecutionEvent::execution_paused(state.id));
                }
            }
            RecoveryAction::ResumeExecution => {
                if state.paused.swap(false, Ordering::SeqCst) {
                    let _ = shared.queue.resume(state.id).await;
                    let _ = shared
                        .store
                        .update_execution_status(state.id, ExecutionStatus::Running, None)
                        .await;
                    state
                        .bus
                        .publish(ExecutionEvent::execution_resumed(state.id));
                }
            }
            // Config-shaped actions were applied to the tuning above
            _ => {}
        }
    }
}

async fn merge_discovered(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    item: &UrlQueueItem,
    node: &NodeDefinition,
    discovered: &[String],
) {
    for url in discovered {
        match shared
            .queue
            .enqueue(state.id, url, item.depth + 1, Some(&node.id))
            .await
        {
            Ok(outcome) if outcome.is_enqueued() => {
                state.bus.publish(ExecutionEvent::url_discovered(
                    state.id,
                    url,
                    item.depth + 1,
                    &node.id,
                ));
            }
            Ok(_) => {}
            Err(crate::queue::QueueError::CapacityExceeded { len, cap }) => {
                warn!(
                    execution = %state.id,
                    len, cap,
                    "frontier at hard cap, dropping remaining discoveries"
                );
                break;
            }
            Err(e) => {
                debug!(execution = %state.id, url = %url, error = %e, "enqueue rejected");
            }
        }
    }
}

async fn persist_extracted(
    state: &Arc<ExecutionState>,
    shared: &Arc<EngineShared>,
    item: &UrlQueueItem,
    output: &crate::nodes::ExecutionOutput,
) {
    let Some(schema_key) = output.metadata.get("schema_key").and_then(Value::as_str) else {
        return;
    };
    let Value::Object(data) = &output.result else {
        return;
    };

    let extracted = ExtractedItem {
        execution_id: state.id,
        url: item.url.clone(),
        schema_key: schema_key.to_string(),
        data: data.clone(),
        extracted_at: Utc::now(),
    };

    match shared.store.insert_extracted_item(&extracted).await {
        Ok(true) => {
            state.stats.items_extracted.fetch_add(1, Ordering::Relaxed);
            state.bus.publish(ExecutionEvent::item_extracted(
                state.id,
                &item.url,
                schema_key,
                data.len(),
            ));
        }
        Ok(false) => {
            debug!(execution = %state.id, url = %item.url, "duplicate extracted item ignored");
        }
        Err(e) => {
            warn!(execution = %state.id, url = %item.url, error = %e, "extracted item persist failed");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn record_attempt(
    shared: &Arc<EngineShared>,
    state: &Arc<ExecutionState>,
    item: &UrlQueueItem,
    node: &NodeDefinition,
    status: NodeExecutionStatus,
    span: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>,
    error: Option<String>,
    result: Option<Value>,
) {
    let now = Utc::now();
    let (started_at, finished_at) = span.unwrap_or((now, now));
    let record = NodeExecutionRecord {
        execution_id: state.id,
        url_item_id: item.id,
        node_id: node.id.clone(),
        status,
        started_at,
        finished_at,
        error,
        result,
    };
    if let Err(e) = shared.store.record_node_execution(&record).await {
        warn!(execution = %state.id, node = %node.id, error = %e, "attempt record failed");
    }
}
