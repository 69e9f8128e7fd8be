//! Context-aware recovery rules and the first-match rules engine.
//!
//! Rules are process-wide shared state. Readers take an `Arc` snapshot;
//! writers rebuild the sorted vector and swap it atomically, keeping the
//! hot path lock-free.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ExecError;
use crate::utils::compile_glob_pattern;

/// Condition operators over the error-context projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Equals,
    Contains,
    Regex,
    Gt,
    Lt,
}

/// One predicate of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Projection field: `status_code`, `domain`, `error_type`,
    /// `response_body`, or `url`
    pub field: String,
    pub operator: RuleOperator,
    pub value: Value,
}

/// The closed set of actions a recovery decision can carry.
///
/// Deserializing any other `type` fails, so unknown actions are rejected
/// at rule load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum RecoveryAction {
    EnableStealth,
    RotateProxy,
    AdjustTimeout {
        multiplier: f64,
    },
    ReduceWorkers {
        #[serde(default = "default_one")]
        count: usize,
    },
    RestoreWorkers,
    AddDelay {
        delay_ms: u64,
    },
    Wait {
        duration_ms: u64,
    },
    PauseExecution,
    ResumeExecution,
}

const fn default_one() -> usize {
    1
}

impl RecoveryAction {
    /// Wire name of the action type.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EnableStealth => "enable_stealth",
            Self::RotateProxy => "rotate_proxy",
            Self::AdjustTimeout { .. } => "adjust_timeout",
            Self::ReduceWorkers { .. } => "reduce_workers",
            Self::RestoreWorkers => "restore_workers",
            Self::AddDelay { .. } => "add_delay",
            Self::Wait { .. } => "wait",
            Self::PauseExecution => "pause_execution",
            Self::ResumeExecution => "resume_execution",
        }
    }
}

/// Who authored a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOrigin {
    Predefined,
    Learned,
    Ai,
}

impl RuleOrigin {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Predefined => "predefined",
            Self::Learned => "learned",
            Self::Ai => "ai",
        }
    }
}

/// A conditions→actions mapping in the recovery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAwareRule {
    pub id: String,
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Glob over the failing URL's domain; `*` matches everything
    #[serde(default = "default_domain_pattern")]
    pub domain_pattern: String,
    pub actions: Vec<RecoveryAction>,
    pub confidence: f64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub usage_count: u64,
    pub created_by: RuleOrigin,
}

fn default_domain_pattern() -> String {
    "*".to_string()
}

/// Projection of the failing execution state that rules evaluate against.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub url: String,
    pub domain: String,
    pub error_type: String,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    /// Rule ids already applied for this node attempt
    pub attempted_rules: Vec<String>,
}

impl ErrorContext {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "url" => Some(Value::String(self.url.clone())),
            "domain" => Some(Value::String(self.domain.clone())),
            "error_type" => Some(Value::String(self.error_type.clone())),
            "status_code" => self.status_code.map(Value::from),
            "response_body" => self.response_body.clone().map(Value::String),
            _ => None,
        }
    }
}

/// A rule with its patterns compiled for the hot path.
struct CompiledRule {
    rule: ContextAwareRule,
    domain: Regex,
    condition_regexes: Vec<Option<Regex>>,
}

impl CompiledRule {
    fn compile(rule: ContextAwareRule) -> Result<Self, ExecError> {
        if rule.actions.is_empty() {
            return Err(ExecError::Validation(format!(
                "rule '{}' has no actions",
                rule.id
            )));
        }

        let domain = compile_glob_pattern(&rule.domain_pattern)
            .map_err(|e| ExecError::Validation(e.to_string()))?;

        let mut condition_regexes = Vec::with_capacity(rule.conditions.len());
        for condition in &rule.conditions {
            if condition.operator == RuleOperator::Regex {
                let pattern = condition.value.as_str().ok_or_else(|| {
                    ExecError::Validation(format!(
                        "rule '{}': regex condition value must be a string",
                        rule.id
                    ))
                })?;
                let re = Regex::new(pattern).map_err(|e| {
                    ExecError::Validation(format!("rule '{}': bad regex: {e}", rule.id))
                })?;
                condition_regexes.push(Some(re));
            } else {
                condition_regexes.push(None);
            }
        }

        Ok(Self {
            rule,
            domain,
            condition_regexes,
        })
    }

    fn matches(&self, ctx: &ErrorContext) -> bool {
        if !self.domain.is_match(&ctx.domain) {
            return false;
        }

        self.rule
            .conditions
            .iter()
            .zip(&self.condition_regexes)
            .all(|(condition, regex)| evaluate_condition(condition, regex.as_ref(), ctx))
    }
}

fn evaluate_condition(
    condition: &RuleCondition,
    regex: Option<&Regex>,
    ctx: &ErrorContext,
) -> bool {
    let Some(actual) = ctx.field(&condition.field) else {
        return false;
    };

    match condition.operator {
        RuleOperator::Equals => match (&actual, &condition.value) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Status codes are commonly written as strings in rule files
            (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => {
                a.to_string() == *b
            }
            (a, b) => a == b,
        },
        RuleOperator::Contains => match (&actual, condition.value.as_str()) {
            (Value::String(haystack), Some(needle)) => haystack.contains(needle),
            _ => false,
        },
        RuleOperator::Regex => match (&actual, regex) {
            (Value::String(s), Some(re)) => re.is_match(s),
            _ => false,
        },
        RuleOperator::Gt | RuleOperator::Lt => {
            let (Some(a), Some(b)) = (as_f64(&actual), as_f64(&condition.value)) else {
                return false;
            };
            if condition.operator == RuleOperator::Gt {
                a > b
            } else {
                a < b
            }
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Priority-then-confidence first-match engine over an atomic snapshot.
pub struct RulesEngine {
    snapshot: RwLock<Arc<Vec<Arc<CompiledRule>>>>,
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Engine pre-loaded with the generic predefined rules.
    #[must_use]
    pub fn with_predefined() -> Self {
        let engine = Self::new();
        engine
            .load(predefined_rules())
            .expect("predefined rules compile");
        engine
    }

    /// Validate, compile, sort, and atomically swap in a rule set.
    pub fn load(&self, rules: Vec<ContextAwareRule>) -> Result<(), ExecError> {
        let mut compiled = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        sort_rules(&mut compiled);
        let compiled: Vec<Arc<CompiledRule>> = compiled.into_iter().map(Arc::new).collect();
        *self.snapshot.write() = Arc::new(compiled);
        Ok(())
    }

    /// Add one rule to the live set.
    pub fn add_rule(&self, rule: ContextAwareRule) -> Result<(), ExecError> {
        let compiled = Arc::new(CompiledRule::compile(rule)?);
        let mut guard = self.snapshot.write();
        let mut next: Vec<Arc<CompiledRule>> = guard.iter().cloned().collect();
        next.retain(|r| r.rule.id != compiled.rule.id);
        next.push(compiled);
        next.sort_by(|a, b| {
            b.rule
                .priority
                .cmp(&a.rule.priority)
                .then(b.rule.confidence.total_cmp(&a.rule.confidence))
        });
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) {
        let mut guard = self.snapshot.write();
        let next: Vec<Arc<CompiledRule>> = guard
            .iter()
            .filter(|r| r.rule.id != rule_id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    /// Mutate a rule's bookkeeping fields (usage, success rate, origin).
    pub fn update_rule<F>(&self, rule_id: &str, f: F)
    where
        F: FnOnce(&mut ContextAwareRule),
    {
        let mut guard = self.snapshot.write();
        let mut next: Vec<Arc<CompiledRule>> = guard.iter().cloned().collect();
        if let Some(pos) = next.iter().position(|c| c.rule.id == rule_id) {
            let mut rule = next[pos].rule.clone();
            f(&mut rule);
            if let Ok(recompiled) = CompiledRule::compile(rule) {
                next[pos] = Arc::new(recompiled);
            }
        }
        *guard = Arc::new(next);
    }

    /// First matching rule not already attempted, deterministic under a
    /// fixed rule set.
    #[must_use]
    pub fn evaluate(&self, ctx: &ErrorContext) -> Option<ContextAwareRule> {
        let snapshot = self.snapshot.read().clone();
        for compiled in snapshot.iter() {
            if ctx.attempted_rules.contains(&compiled.rule.id) {
                continue;
            }
            if compiled.matches(ctx) {
                debug!(rule = %compiled.rule.id, "recovery rule matched");
                return Some(compiled.rule.clone());
            }
        }
        None
    }

    /// Current rule set, highest priority first.
    #[must_use]
    pub fn rules(&self) -> Vec<ContextAwareRule> {
        self.snapshot
            .read()
            .iter()
            .map(|c| c.rule.clone())
            .collect()
    }

    #[must_use]
    pub fn rule(&self, rule_id: &str) -> Option<ContextAwareRule> {
        self.snapshot
            .read()
            .iter()
            .find(|c| c.rule.id == rule_id)
            .map(|c| c.rule.clone())
    }
}

fn sort_rules(rules: &mut [CompiledRule]) {
    rules.sort_by(|a, b| {
        b.rule
            .priority
            .cmp(&a.rule.priority)
            .then(b.rule.confidence.total_cmp(&a.rule.confidence))
    });
}

/// The generic rules every deployment starts with.
#[must_use]
pub fn predefined_rules() -> Vec<ContextAwareRule> {
    vec![
        ContextAwareRule {
            id: "generic_rate_limit_429".into(),
            priority: 100,
            conditions: vec![RuleCondition {
                field: "status_code".into(),
                operator: RuleOperator::Equals,
                value: Value::from(429),
            }],
            domain_pattern: "*".into(),
            actions: vec![
                RecoveryAction::Wait { duration_ms: 5_000 },
                RecoveryAction::ReduceWorkers { count: 1 },
                RecoveryAction::AddDelay { delay_ms: 1_000 },
            ],
            confidence: 0.9,
            success_rate: 0.0,
            usage_count: 0,
            created_by: RuleOrigin::Predefined,
        },
        ContextAwareRule {
            id: "generic_forbidden_403".into(),
            priority: 100,
            conditions: vec![RuleCondition {
                field: "status_code".into(),
                operator: RuleOperator::Equals,
                value: Value::from(403),
            }],
            domain_pattern: "*".into(),
            actions: vec![RecoveryAction::EnableStealth, RecoveryAction::RotateProxy],
            confidence: 0.8,
            success_rate: 0.0,
            usage_count: 0,
            created_by: RuleOrigin::Predefined,
        },
        ContextAwareRule {
            id: "generic_timeout".into(),
            priority: 90,
            conditions: vec![RuleCondition {
                field: "error_type".into(),
                operator: RuleOperator::Equals,
                value: Value::String("timeout".into()),
            }],
            domain_pattern: "*".into(),
            actions: vec![RecoveryAction::AdjustTimeout { multiplier: 1.5 }],
            confidence: 0.7,
            success_rate: 0.0,
            usage_count: 0,
            created_by: RuleOrigin::Predefined,
        },
    ]
}
