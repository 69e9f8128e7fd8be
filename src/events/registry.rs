//! Execution id → event bus lookup.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use super::bus::ExecutionEventBus;

/// Process-wide map of live execution buses. Buses are removed when their
/// execution reaches a terminal state.
#[derive(Debug, Default)]
pub struct EventBusRegistry {
    buses: DashMap<Uuid, Arc<ExecutionEventBus>>,
    capacity: usize,
}

impl EventBusRegistry {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buses: DashMap::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn get_or_create(&self, execution_id: Uuid) -> Arc<ExecutionEventBus> {
        self.buses
            .entry(execution_id)
            .or_insert_with(|| Arc::new(ExecutionEventBus::new(execution_id, self.capacity)))
            .clone()
    }

    #[must_use]
    pub fn get(&self, execution_id: Uuid) -> Option<Arc<ExecutionEventBus>> {
        self.buses.get(&execution_id).map(|b| b.clone())
    }

    pub fn remove(&self, execution_id: Uuid) {
        self.buses.remove(&execution_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_execution_same_bus() {
        let registry = EventBusRegistry::new(16);
        let id = Uuid::new_v4();
        let a = registry.get_or_create(id);
        let b = registry.get_or_create(id);
        assert!(Arc::ptr_eq(&a, &b));

        registry.remove(id);
        assert!(registry.get(id).is_none());
    }
}
