//! Per-execution lifecycle event streaming.
//!
//! Each execution owns one broadcast bus. Publishing never blocks the
//! worker: slow subscribers lag and drop events, counted in the bus
//! metrics. Subscribers are advisory; the engine makes no decision based
//! on their presence.

mod bus;
mod metrics;
mod registry;
mod types;

pub use bus::{EventBusError, ExecutionEventBus, FilteredReceiver};
pub use metrics::{EventBusMetrics, MetricsSnapshot};
pub use registry::EventBusRegistry;
pub use types::{EventKind, ExecutionEvent};
