//! Broadcast bus carrying one execution's lifecycle events.

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use super::metrics::EventBusMetrics;
use super::types::ExecutionEvent;

/// Receiver-side failures.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Receiver couldn't keep up; this many events were dropped for it
    #[error("receiver lagged behind, missed {0} events")]
    ReceiverLagged(u64),

    #[error("event bus closed")]
    Closed,
}

/// Multicast bus for a single execution.
///
/// Publishing is fire-and-forget: a publish with zero subscribers counts as
/// dropped in the metrics but is not an error, since subscribers are
/// advisory.
#[derive(Debug)]
pub struct ExecutionEventBus {
    execution_id: Uuid,
    sender: broadcast::Sender<ExecutionEvent>,
    metrics: EventBusMetrics,
}

impl ExecutionEventBus {
    #[must_use]
    pub fn new(execution_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            execution_id,
            sender,
            metrics: EventBusMetrics::new(),
        }
    }

    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Publish an event to all current subscribers. Returns how many
    /// received it.
    pub fn publish(&self, event: ExecutionEvent) -> usize {
        match self.sender.send(event) {
            Ok(count) => {
                self.metrics.increment_published();
                self.metrics.update_subscriber_count(count);
                count
            }
            Err(_) => {
                // No receiver exists; the event is dropped by design
                self.metrics.increment_published();
                self.metrics.increment_dropped();
                self.metrics.update_subscriber_count(0);
                0
            }
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`, the shape long-lived SSE handlers consume.
    /// Lagged receivers yield errors in-stream instead of ending it.
    #[must_use]
    pub fn subscribe_stream(
        &self,
    ) -> tokio_stream::wrappers::BroadcastStream<ExecutionEvent> {
        tokio_stream::wrappers::BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe with a predicate; only matching events are yielded.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&ExecutionEvent) -> bool + Send + Sync + 'static,
    {
        FilteredReceiver {
            receiver: self.sender.subscribe(),
            filter: Arc::new(filter),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn metrics(&self) -> &EventBusMetrics {
        &self.metrics
    }
}

/// Receiver wrapper that skips events failing its predicate.
pub struct FilteredReceiver<F>
where
    F: Fn(&ExecutionEvent) -> bool + Send + Sync + 'static,
{
    receiver: broadcast::Receiver<ExecutionEvent>,
    filter: Arc<F>,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&ExecutionEvent) -> bool + Send + Sync + 'static,
{
    /// Wait for the next event passing the filter.
    pub async fn recv(&mut self) -> Result<ExecutionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(EventBusError::Closed),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }

    /// Non-blocking variant; `Ok(None)` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Result<Option<ExecutionEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(EventBusError::Closed),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(EventBusError::ReceiverLagged(skipped));
                }
            }
        }
    }
}
