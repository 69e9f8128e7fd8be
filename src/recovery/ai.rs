//! AI fallback: synthesize a recovery solution when no rule matches.
//!
//! The resolver is a best-effort collaborator. Any failure — transport,
//! refusal, malformed output — abandons the layer; the pipeline falls back
//! to its default disposition. Solutions that do parse are tagged
//! `created_by = ai` and handed to the learning engine.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pattern::ErrorPattern;
use super::rules::{ContextAwareRule, ErrorContext, RecoveryAction, RuleCondition, RuleOrigin};

/// Response bodies are truncated to this length before prompting.
const MAX_BODY_CHARS: usize = 2_000;

/// Priority assigned to unproven AI rules, below every predefined rule.
const AI_RULE_PRIORITY: i32 = 10;

/// Text-generation collaborator. Absent resolver collapses the pipeline to
/// rules only.
#[async_trait]
pub trait AiResolver: Send + Sync {
    /// Return raw model output for the given prompt.
    async fn propose(&self, prompt: &str) -> anyhow::Result<String>;
}

/// The strict JSON shape the model must answer with.
#[derive(Debug, Deserialize)]
struct AiSolution {
    #[serde(default)]
    domain_pattern: Option<String>,
    #[serde(default)]
    conditions: Vec<RuleCondition>,
    actions: Vec<RecoveryAction>,
    confidence: f64,
}

/// Build the reasoning prompt from the failure context.
#[must_use]
pub fn build_prompt(ctx: &ErrorContext, pattern: &ErrorPattern) -> String {
    let body = ctx
        .response_body
        .as_deref()
        .map(|b| truncate(b, MAX_BODY_CHARS))
        .unwrap_or_default();

    let tried = if ctx.attempted_rules.is_empty() {
        "none".to_string()
    } else {
        ctx.attempted_rules.join(", ")
    };

    format!(
        "A web scraping node failed and no recovery rule matched. Propose a recovery solution.\n\
         \n\
         URL: {url}\n\
         Domain: {domain}\n\
         Error type: {error_type}\n\
         HTTP status: {status}\n\
         Recent pattern: {pattern_type} (error rate {rate:.0}%, {consecutive} consecutive)\n\
         Rules already tried: {tried}\n\
         Response body (truncated):\n{body}\n\
         \n\
         Answer with strict JSON only, no prose, matching this schema:\n\
         {{\"domain_pattern\": \"<glob>\", \"conditions\": [{{\"field\": \"...\", \"operator\": \
         \"equals|contains|regex|gt|lt\", \"value\": ...}}], \"actions\": [{{\"type\": \
         \"enable_stealth|rotate_proxy|adjust_timeout|reduce_workers|restore_workers|add_delay|\
         wait|pause_execution|resume_execution\", \"parameters\": {{...}}}}], \"confidence\": 0.0}}",
        url = ctx.url,
        domain = ctx.domain,
        error_type = ctx.error_type,
        status = ctx
            .status_code
            .map_or_else(|| "unknown".to_string(), |s| s.to_string()),
        pattern_type = pattern.pattern_type,
        rate = pattern.error_rate * 100.0,
        consecutive = pattern.consecutive_count,
    )
}

/// Parse a model answer into a rule. Returns `None` on any deviation from
/// the schema; the AI layer is abandoned rather than guessed at.
#[must_use]
pub fn parse_solution(raw: &str, ctx: &ErrorContext) -> Option<ContextAwareRule> {
    let trimmed = strip_code_fences(raw.trim());

    let solution: AiSolution = match serde_json::from_str(trimmed) {
        Ok(solution) => solution,
        Err(e) => {
            warn!(error = %e, "AI solution did not parse as strict JSON, abandoning");
            return None;
        }
    };

    if solution.actions.is_empty() {
        warn!("AI solution carried no actions, abandoning");
        return None;
    }
    if !(0.0..=1.0).contains(&solution.confidence) {
        warn!(confidence = solution.confidence, "AI confidence out of range, abandoning");
        return None;
    }

    let rule = ContextAwareRule {
        id: format!("ai_{}", Uuid::new_v4().simple()),
        priority: AI_RULE_PRIORITY,
        conditions: solution.conditions,
        domain_pattern: solution
            .domain_pattern
            .unwrap_or_else(|| ctx.domain.clone()),
        actions: solution.actions,
        confidence: solution.confidence,
        success_rate: 0.0,
        usage_count: 0,
        created_by: RuleOrigin::Ai,
    };

    debug!(rule = %rule.id, "AI produced a candidate rule");
    Some(rule)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Models often wrap JSON in ``` fences despite instructions.
fn strip_code_fences(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}
