//! Adaptive error-recovery pipeline.
//!
//! Layered decision flow on every node failure: pattern analyzer →
//! context-aware rules engine → optional AI fallback → learning feedback.
//! The pipeline only decides; the orchestrator applies the returned
//! actions to the execution's tuning before retrying.

pub mod ai;
pub mod learning;
pub mod pattern;
pub mod rules;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RecoveryThresholds;
use crate::error::{ErrorKind, ExecError};
use crate::storage::Store;

pub use ai::{AiResolver, build_prompt, parse_solution};
pub use learning::{LearningEngine, LearningVerdict, SolutionStats};
pub use pattern::{Activation, ErrorPattern, PatternAnalyzer};
pub use rules::{
    ContextAwareRule, ErrorContext, RecoveryAction, RuleCondition, RuleOperator, RuleOrigin,
    RulesEngine, predefined_rules,
};

/// What the orchestrator should do with the failing URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Apply actions (if any) and retry the URL
    Retry,
    /// Give up on this URL; the execution continues
    FailUrl,
    /// The execution itself is unhealthy; stop it
    AbortExecution,
}

/// One decision for one failure.
#[derive(Debug, Clone)]
pub struct RecoveryDecision {
    pub actions: Vec<RecoveryAction>,
    /// Rule that produced the actions, when one matched
    pub rule_id: Option<String>,
    pub disposition: Disposition,
    pub reason: String,
}

impl RecoveryDecision {
    fn plain(disposition: Disposition, reason: impl Into<String>) -> Self {
        Self {
            actions: Vec::new(),
            rule_id: None,
            disposition,
            reason: reason.into(),
        }
    }
}

/// Consecutive driver faults after which the execution is aborted instead
/// of retried with a replaced context.
const DRIVER_FAULT_ABORT_THRESHOLD: u32 = 2;

/// The layered pipeline. One instance serves all executions: the rules
/// table is shared, the analyzer windows are per-execution.
pub struct RecoveryPipeline {
    analyzer: PatternAnalyzer,
    rules: RulesEngine,
    learning: LearningEngine,
    ai: Option<Arc<dyn AiResolver>>,
    ai_enabled: bool,
    store: Option<Store>,
}

impl RecoveryPipeline {
    #[must_use]
    pub fn new(thresholds: &RecoveryThresholds, store: Option<Store>) -> Self {
        Self {
            analyzer: PatternAnalyzer::new(thresholds),
            rules: RulesEngine::with_predefined(),
            learning: LearningEngine::new(thresholds),
            ai: None,
            ai_enabled: thresholds.ai_enabled,
            store,
        }
    }

    /// Attach an AI resolver. Without one, layer C is skipped entirely.
    #[must_use]
    pub fn with_ai(mut self, resolver: Arc<dyn AiResolver>) -> Self {
        self.ai = Some(resolver);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    /// Merge persisted rules from the store into the live set.
    pub async fn load_persisted_rules(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for rule in store.load_rules().await? {
            if let Err(e) = self.rules.add_rule(rule) {
                warn!(error = %e, "skipping unloadable persisted rule");
            }
        }
        Ok(())
    }

    /// Decide how to respond to a node failure.
    pub async fn handle(
        &self,
        execution_id: Uuid,
        error: &ExecError,
        ctx: ErrorContext,
    ) -> RecoveryDecision {
        let kind = error.kind();

        match kind {
            ErrorKind::Cancelled => {
                return RecoveryDecision::plain(Disposition::FailUrl, "cancelled");
            }
            ErrorKind::Validation => {
                return RecoveryDecision::plain(Disposition::FailUrl, "validation error");
            }
            _ => {}
        }

        // A populated attempted_rules list means the previous decision's
        // rule did not fix this node; feed that back before deciding again.
        if let Some(last) = ctx.attempted_rules.last() {
            self.feed_outcome(last, false).await;
        }

        self.analyzer.record_failure(execution_id, kind);
        let activation = self.analyzer.should_activate(execution_id, kind);

        if kind == ErrorKind::DriverFatal
            && activation.pattern.consecutive_count >= DRIVER_FAULT_ABORT_THRESHOLD
        {
            return RecoveryDecision::plain(
                Disposition::AbortExecution,
                format!(
                    "{} consecutive driver faults",
                    activation.pattern.consecutive_count
                ),
            );
        }

        let fallback = if error.retryable() {
            Disposition::Retry
        } else {
            Disposition::FailUrl
        };

        if !activation.activate {
            return RecoveryDecision::plain(fallback, activation.reason);
        }

        // Layer B: context-aware rules
        if let Some(rule) = self.rules.evaluate(&ctx) {
            self.learning.record_use(&rule.id);
            self.rules
                .update_rule(&rule.id, |r| r.usage_count += 1);
            return RecoveryDecision {
                actions: rule.actions.clone(),
                rule_id: Some(rule.id),
                disposition: fallback,
                reason: activation.reason,
            };
        }

        // Layer C: AI reasoning, best-effort
        if self.ai_enabled
            && let Some(resolver) = &self.ai
        {
            let prompt = build_prompt(&ctx, &activation.pattern);
            match resolver.propose(&prompt).await {
                Ok(raw) => {
                    if let Some(rule) = parse_solution(&raw, &ctx) {
                        if let Err(e) = self.rules.add_rule(rule.clone()) {
                            warn!(error = %e, "AI rule failed validation, discarding");
                        } else {
                            self.learning.record_use(&rule.id);
                            debug!(rule = %rule.id, "applying AI-generated solution");
                            return RecoveryDecision {
                                actions: rule.actions.clone(),
                                rule_id: Some(rule.id),
                                disposition: fallback,
                                reason: format!("{} (ai solution)", activation.reason),
                            };
                        }
                    }
                }
                Err(e) => warn!(error = %e, "AI resolver failed, continuing without it"),
            }
        }

        RecoveryDecision::plain(fallback, activation.reason)
    }

    /// Credit the analyzer (and the applied rule, if any) after a node
    /// succeeded on retry.
    pub async fn record_success(&self, execution_id: Uuid, rule_id: Option<&str>) {
        self.analyzer.record_success(execution_id);
        if let Some(rule_id) = rule_id {
            self.feed_outcome(rule_id, true).await;
        }
    }

    /// Drop the execution's analyzer window at completion.
    pub fn reset_execution(&self, execution_id: Uuid) {
        self.analyzer.reset(execution_id);
    }

    async fn feed_outcome(&self, rule_id: &str, success: bool) {
        let Some(rule) = self.rules.rule(rule_id) else {
            return;
        };
        let promotable = rule.created_by == RuleOrigin::Ai;

        let verdict = self.learning.record_outcome(rule_id, success, promotable);
        let stats = self.learning.stats_for(rule_id).unwrap_or_default();
        self.rules.update_rule(rule_id, |r| {
            r.success_rate = stats.success_rate();
            r.usage_count = stats.usage_count;
        });

        match verdict {
            LearningVerdict::Promote => {
                self.rules.update_rule(rule_id, |r| {
                    r.created_by = RuleOrigin::Learned;
                });
                if let Some(store) = &self.store
                    && let Some(promoted) = self.rules.rule(rule_id)
                    && let Err(e) = store.upsert_rule(&promoted).await
                {
                    warn!(rule_id, error = %e, "failed to persist promoted rule");
                }
            }
            LearningVerdict::Demote => {
                self.rules.remove_rule(rule_id);
                if let Some(store) = &self.store
                    && let Err(e) = store.delete_rule(rule_id).await
                {
                    warn!(rule_id, error = %e, "failed to delete demoted rule");
                }
            }
            LearningVerdict::None => {}
        }
    }
}
