//! Execution-local tuning mutated by recovery actions.

use std::time::Duration;

use crate::recovery::RecoveryAction;

/// Bounds for the timeout multiplier so runaway adjust_timeout rules
/// cannot zero out or explode node timeouts.
const MIN_TIMEOUT_MULTIPLIER: f64 = 0.1;
const MAX_TIMEOUT_MULTIPLIER: f64 = 10.0;

/// Mutable knobs one execution's recovery decisions operate on.
///
/// Consecutive identical actions are deduplicated here, which makes
/// applying the same action twice in sequence a no-op on the second call.
#[derive(Debug, Clone)]
pub struct ExecutionTuning {
    /// Configured worker count, restored by `restore_workers`
    configured_workers: usize,
    pub stealth: bool,
    /// Times `rotate_proxy` fired; indexes into the configured proxy list
    pub proxy_rotations: u32,
    pub timeout_multiplier: f64,
    pub target_workers: usize,
    /// Sleep injected after each node by `add_delay`
    pub extra_delay: Duration,
    last_action: Option<String>,
}

impl ExecutionTuning {
    #[must_use]
    pub fn new(configured_workers: usize) -> Self {
        Self {
            configured_workers,
            stealth: false,
            proxy_rotations: 0,
            timeout_multiplier: 1.0,
            target_workers: configured_workers,
            extra_delay: Duration::ZERO,
            last_action: None,
        }
    }

    /// Apply one action. Returns `false` when the action was deduplicated
    /// (identical to the immediately preceding one) or config-neutral.
    pub fn apply(&mut self, action: &RecoveryAction) -> bool {
        let signature = format!("{action:?}");
        if self.last_action.as_deref() == Some(signature.as_str()) {
            return false;
        }
        self.last_action = Some(signature);

        match action {
            RecoveryAction::EnableStealth => {
                self.stealth = true;
            }
            RecoveryAction::RotateProxy => {
                self.proxy_rotations += 1;
            }
            RecoveryAction::AdjustTimeout { multiplier } => {
                self.timeout_multiplier = (self.timeout_multiplier * multiplier)
                    .clamp(MIN_TIMEOUT_MULTIPLIER, MAX_TIMEOUT_MULTIPLIER);
            }
            RecoveryAction::ReduceWorkers { count } => {
                self.target_workers = self.target_workers.saturating_sub(*count).max(1);
            }
            RecoveryAction::RestoreWorkers => {
                self.target_workers = self.configured_workers;
            }
            RecoveryAction::AddDelay { delay_ms } => {
                self.extra_delay = Duration::from_millis(*delay_ms);
            }
            // Wait and pause/resume are applied by the worker directly,
            // not stored in the tuning; they still participate in dedup
            RecoveryAction::Wait { .. }
            | RecoveryAction::PauseExecution
            | RecoveryAction::ResumeExecution => return true,
        }
        true
    }

    /// The node timeout scaled by the current multiplier.
    #[must_use]
    pub fn effective_timeout(&self, base: Duration) -> Duration {
        base.mul_f64(self.timeout_multiplier)
    }
}
