//! Per-execution error-pattern analysis over a rolling result window.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RecoveryThresholds;
use crate::error::ErrorKind;

/// Summary of the recent error pattern for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub pattern_type: String,
    pub error_rate: f64,
    pub consecutive_count: u32,
    pub dominant_error: Option<String>,
}

/// Whether the pipeline should activate, and why.
#[derive(Debug, Clone)]
pub struct Activation {
    pub activate: bool,
    pub reason: String,
    pub pattern: ErrorPattern,
}

#[derive(Debug, Default)]
struct Window {
    /// true = failure, paired with its kind
    results: VecDeque<(bool, Option<ErrorKind>)>,
    consecutive_failures: u32,
}

/// Rolling window of the last `W` node results per execution.
///
/// Windows are strictly per-execution and dropped at completion; patterns
/// from different executions never mix.
pub struct PatternAnalyzer {
    window_size: usize,
    consecutive_threshold: u32,
    error_rate_threshold: f64,
    windows: DashMap<Uuid, Window>,
}

impl PatternAnalyzer {
    #[must_use]
    pub fn new(thresholds: &RecoveryThresholds) -> Self {
        Self {
            window_size: thresholds.window_size,
            consecutive_threshold: thresholds.consecutive_threshold,
            error_rate_threshold: thresholds.error_rate_threshold,
            windows: DashMap::new(),
        }
    }

    pub fn record_success(&self, execution_id: Uuid) {
        let mut window = self.windows.entry(execution_id).or_default();
        push_bounded(&mut window.results, (false, None), self.window_size);
        window.consecutive_failures = 0;
    }

    pub fn record_failure(&self, execution_id: Uuid, kind: ErrorKind) {
        let mut window = self.windows.entry(execution_id).or_default();
        push_bounded(&mut window.results, (true, Some(kind)), self.window_size);
        window.consecutive_failures += 1;
    }

    /// Decide whether the latest failure should activate the pipeline.
    ///
    /// Activates when the consecutive-failure threshold or the window error
    /// rate is reached, or when the error is in the fast-path set
    /// (rate-limit, blocked, timeout).
    #[must_use]
    pub fn should_activate(&self, execution_id: Uuid, kind: ErrorKind) -> Activation {
        let pattern = self.pattern(execution_id);

        if kind.is_fast_path() {
            return Activation {
                activate: true,
                reason: format!("fast-path error: {}", kind.as_str()),
                pattern,
            };
        }

        if pattern.consecutive_count >= self.consecutive_threshold {
            return Activation {
                activate: true,
                reason: format!("{} consecutive failures", pattern.consecutive_count),
                pattern,
            };
        }

        if pattern.error_rate >= self.error_rate_threshold {
            return Activation {
                activate: true,
                reason: format!("error rate {:.0}%", pattern.error_rate * 100.0),
                pattern,
            };
        }

        Activation {
            activate: false,
            reason: "below thresholds".into(),
            pattern,
        }
    }

    /// Current pattern summary for an execution.
    #[must_use]
    pub fn pattern(&self, execution_id: Uuid) -> ErrorPattern {
        let Some(window) = self.windows.get(&execution_id) else {
            return ErrorPattern {
                pattern_type: "empty".into(),
                error_rate: 0.0,
                consecutive_count: 0,
                dominant_error: None,
            };
        };

        let total = window.results.len();
        let failures = window.results.iter().filter(|(failed, _)| *failed).count();
        let error_rate = if total == 0 {
            0.0
        } else {
            failures as f64 / total as f64
        };

        let dominant_error = dominant_kind(&window.results).map(|k| k.as_str().to_string());
        let pattern_type = if window.consecutive_failures >= self.consecutive_threshold {
            "consecutive_failures"
        } else if error_rate >= self.error_rate_threshold {
            "elevated_error_rate"
        } else {
            "sporadic"
        };

        ErrorPattern {
            pattern_type: pattern_type.into(),
            error_rate,
            consecutive_count: window.consecutive_failures,
            dominant_error,
        }
    }

    /// Drop an execution's window. Called at execution completion.
    pub fn reset(&self, execution_id: Uuid) {
        self.windows.remove(&execution_id);
    }
}

fn push_bounded(
    results: &mut VecDeque<(bool, Option<ErrorKind>)>,
    entry: (bool, Option<ErrorKind>),
    cap: usize,
) {
    if results.len() >= cap {
        results.pop_front();
    }
    results.push_back(entry);
}

fn dominant_kind(results: &VecDeque<(bool, Option<ErrorKind>)>) -> Option<ErrorKind> {
    let mut counts: std::collections::HashMap<ErrorKind, usize> = std::collections::HashMap::new();
    for (_, kind) in results {
        if let Some(kind) = kind {
            *counts.entry(*kind).or_insert(0) += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(k, _)| k)
}
