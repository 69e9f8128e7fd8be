//! Learning feedback: promote proven AI solutions, demote decayed rules.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::RecoveryThresholds;

/// Per-solution outcome counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolutionStats {
    pub success_count: u64,
    pub failure_count: u64,
    pub usage_count: u64,
}

impl SolutionStats {
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let outcomes = self.success_count + self.failure_count;
        if outcomes == 0 {
            return 0.0;
        }
        self.success_count as f64 / outcomes as f64
    }
}

/// What the learning engine wants done with a rule after an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningVerdict {
    /// Keep observing
    None,
    /// AI rule earned persistence: mark learned and store it
    Promote,
    /// Rule decayed below the floor: drop it
    Demote,
}

/// Tracks per-solution outcomes and applies the promotion/demotion policy.
pub struct LearningEngine {
    promotion_usage: u64,
    promotion_success_rate: f64,
    demotion_floor: f64,
    stats: DashMap<String, SolutionStats>,
}

impl LearningEngine {
    #[must_use]
    pub fn new(thresholds: &RecoveryThresholds) -> Self {
        Self {
            promotion_usage: thresholds.promotion_usage,
            promotion_success_rate: thresholds.promotion_success_rate,
            demotion_floor: thresholds.demotion_floor,
            stats: DashMap::new(),
        }
    }

    /// Record that a rule was applied to a failure.
    pub fn record_use(&self, rule_id: &str) {
        self.stats
            .entry(rule_id.to_string())
            .or_default()
            .usage_count += 1;
    }

    /// Record whether the retry after applying `rule_id` succeeded, and
    /// return the resulting verdict.
    ///
    /// `promotable` marks rules eligible for promotion (AI-created ones);
    /// predefined and already-learned rules can only be demoted.
    pub fn record_outcome(
        &self,
        rule_id: &str,
        success: bool,
        promotable: bool,
    ) -> LearningVerdict {
        let mut entry = self.stats.entry(rule_id.to_string()).or_default();
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }

        let usage = entry.usage_count;
        let rate = entry.success_rate();
        drop(entry);

        if usage >= self.promotion_usage {
            if promotable && rate >= self.promotion_success_rate {
                info!(rule_id, rate, usage, "promoting AI solution to persisted rule");
                return LearningVerdict::Promote;
            }
            if rate < self.demotion_floor {
                info!(rule_id, rate, usage, "demoting decayed rule");
                return LearningVerdict::Demote;
            }
        }

        LearningVerdict::None
    }

    #[must_use]
    pub fn stats_for(&self, rule_id: &str) -> Option<SolutionStats> {
        self.stats.get(rule_id).map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LearningEngine {
        LearningEngine::new(&RecoveryThresholds {
            promotion_usage: 3,
            promotion_success_rate: 0.7,
            demotion_floor: 0.3,
            ..Default::default()
        })
    }

    #[test]
    fn promotes_after_enough_successful_uses() {
        let engine = engine();
        for _ in 0..2 {
            engine.record_use("ai_x");
            assert_eq!(
                engine.record_outcome("ai_x", true, true),
                LearningVerdict::None
            );
        }
        engine.record_use("ai_x");
        assert_eq!(
            engine.record_outcome("ai_x", true, true),
            LearningVerdict::Promote
        );
    }

    #[test]
    fn demotes_below_floor() {
        let engine = engine();
        for _ in 0..3 {
            engine.record_use("rule_y");
        }
        engine.record_outcome("rule_y", false, false);
        engine.record_outcome("rule_y", false, false);
        assert_eq!(
            engine.record_outcome("rule_y", false, false),
            LearningVerdict::Demote
        );
    }

    #[test]
    fn predefined_rules_never_promote() {
        let engine = engine();
        for _ in 0..5 {
            engine.record_use("generic");
            engine.record_outcome("generic", true, false);
        }
        assert_eq!(
            engine.record_outcome("generic", true, false),
            LearningVerdict::None
        );
    }

    #[test]
    fn success_rate_computation() {
        let stats = SolutionStats {
            success_count: 3,
            failure_count: 1,
            usage_count: 4,
        };
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
