//! Queue statistics and the throughput estimator.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Smoothing factor for the completion-rate EMA.
const EMA_ALPHA: f64 = 0.2;

/// Counts by status plus a throughput estimate for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Exponential moving average of completions per second
    pub throughput_per_sec: f64,
}

impl QueueStats {
    /// Total items ever enqueued for the execution.
    #[must_use]
    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.done + self.failed + self.skipped
    }

    /// Whether all work has reached a terminal state.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queued == 0 && self.in_progress == 0
    }
}

/// Exponential moving average over completion intervals.
#[derive(Debug)]
pub(crate) struct ThroughputMeter {
    rate: f64,
    last: Option<Instant>,
}

impl ThroughputMeter {
    pub(crate) fn new() -> Self {
        Self {
            rate: 0.0,
            last: None,
        }
    }

    /// Record one completion.
    pub(crate) fn record(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last {
            let dt = now.duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let instantaneous = 1.0 / dt;
                self.rate = if self.rate == 0.0 {
                    instantaneous
                } else {
                    EMA_ALPHA * instantaneous + (1.0 - EMA_ALPHA) * self.rate
                };
            }
        }
        self.last = Some(now);
    }

    pub(crate) fn rate(&self) -> f64 {
        self.rate
    }
}
