//! Lock-free metrics for the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared between a bus and its publishers.
#[derive(Debug, Clone, Default)]
pub struct EventBusMetrics {
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    subscribers: Arc<AtomicUsize>,
    peak_subscribers: Arc<AtomicUsize>,
}

impl EventBusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increment_published(&self) {
        self.published.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn update_subscriber_count(&self, count: usize) {
        self.subscribers.store(count, Ordering::SeqCst);
        let _ = self.peak_subscribers.fetch_max(count, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.published.load(Ordering::SeqCst),
            events_dropped: self.dropped.load(Ordering::SeqCst),
            active_subscribers: self.subscribers.load(Ordering::SeqCst),
            peak_subscribers: self.peak_subscribers.load(Ordering::SeqCst),
        }
    }
}

/// Consistent point-in-time view of the counters.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    /// Events published while no subscriber was listening
    pub events_dropped: u64,
    pub active_subscribers: usize,
    pub peak_subscribers: usize,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn delivery_rate(&self) -> f64 {
        if self.events_published == 0 {
            return 1.0;
        }
        1.0 - (self.events_dropped as f64 / self.events_published as f64)
    }
}
