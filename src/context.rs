//! Per-URL execution context.
//!
//! A scoped key→value bag seeded from the queue item, owned by exactly one
//! worker for the lifetime of one URL. Extract nodes write variables and
//! record which keys are user-facing via the `__extracted_fields__` marker;
//! discover nodes accumulate URLs; the conditional node gates downstream
//! nodes through boolean flags.

use std::collections::HashMap;

use serde_json::Value;
use uuid::Uuid;

use crate::queue::UrlQueueItem;

/// Context key naming the user-facing output fields of the current URL.
pub const EXTRACTED_FIELDS_KEY: &str = "__extracted_fields__";

/// A URL found by a discover (or plugin) node, tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub url: String,
    pub source_node_id: String,
}

/// Mutable per-URL state bag. Never shared across URLs or workers.
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: Uuid,
    url: String,
    depth: u32,
    item_id: i64,
    vars: HashMap<String, Value>,
    discovered: Vec<DiscoveredUrl>,
    gates: HashMap<String, bool>,
}

impl ExecutionContext {
    /// Seed a fresh context from the queue item being processed.
    #[must_use]
    pub fn new(execution_id: Uuid, item: &UrlQueueItem) -> Self {
        let mut vars = HashMap::new();
        vars.insert("url".to_string(), Value::String(item.url.clone()));
        vars.insert("depth".to_string(), Value::from(item.depth));

        Self {
            execution_id,
            url: item.url.clone(),
            depth: item.depth,
            item_id: item.id,
            vars,
            discovered: Vec::new(),
            gates: HashMap::new(),
        }
    }

    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    #[must_use]
    pub fn item_id(&self) -> i64 {
        self.item_id
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Append keys to the `__extracted_fields__` marker, deduplicated.
    pub fn mark_extracted<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self
            .vars
            .entry(EXTRACTED_FIELDS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        if let Value::Array(list) = entry {
            for key in keys {
                let key = Value::String(key.into());
                if !list.contains(&key) {
                    list.push(key);
                }
            }
        }
    }

    /// Keys currently named by the `__extracted_fields__` marker.
    #[must_use]
    pub fn extracted_fields(&self) -> Vec<String> {
        match self.vars.get(EXTRACTED_FIELDS_KEY) {
            Some(Value::Array(list)) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Snapshot of the user-facing output: the values of every marked key.
    ///
    /// Returns `None` when no extract node has run. Marked keys with no
    /// value (optional fields that matched nothing) appear as nulls.
    #[must_use]
    pub fn extracted_snapshot(&self) -> Option<serde_json::Map<String, Value>> {
        let fields = self.extracted_fields();
        if fields.is_empty() {
            return None;
        }

        let mut map = serde_json::Map::new();
        for field in fields {
            let value = self.vars.get(&field).cloned().unwrap_or(Value::Null);
            map.insert(field, value);
        }
        Some(map)
    }

    pub fn add_discovered(&mut self, url: String, source_node_id: &str) {
        self.discovered.push(DiscoveredUrl {
            url,
            source_node_id: source_node_id.to_string(),
        });
    }

    /// Drain URLs accumulated by discover nodes since the last call.
    pub fn take_discovered(&mut self) -> Vec<DiscoveredUrl> {
        std::mem::take(&mut self.discovered)
    }

    /// Set a gate flag written by a conditional node.
    pub fn set_gate(&mut self, name: impl Into<String>, open: bool) {
        self.gates.insert(name.into(), open);
    }

    /// A gate is open unless a conditional node explicitly closed it.
    #[must_use]
    pub fn gate_open(&self, name: &str) -> bool {
        self.gates.get(name).copied().unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{UrlQueueItem, UrlStatus};

    fn item() -> UrlQueueItem {
        UrlQueueItem {
            id: 7,
            execution_id: Uuid::new_v4(),
            url: "https://example.com/p".into(),
            depth: 1,
            status: UrlStatus::InProgress,
            retry_count: 0,
            source_node_id: None,
            enqueued_at: chrono::Utc::now(),
            leased_by: None,
            lease_deadline: None,
            last_error: None,
        }
    }

    #[test]
    fn marker_collects_unique_keys() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), &item());
        ctx.set("name", Value::String("Widget".into()));
        ctx.mark_extracted(["name"]);
        ctx.mark_extracted(["name", "price"]);

        assert_eq!(ctx.extracted_fields(), vec!["name", "price"]);

        let snapshot = ctx.extracted_snapshot().expect("has marked fields");
        assert_eq!(snapshot["name"], Value::String("Widget".into()));
        assert_eq!(snapshot["price"], Value::Null);
    }

    #[test]
    fn no_marker_means_no_snapshot() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), &item());
        ctx.set("internal", Value::Bool(true));
        assert!(ctx.extracted_snapshot().is_none());
    }

    #[test]
    fn gates_default_open() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), &item());
        assert!(ctx.gate_open("anything"));
        ctx.set_gate("detail", false);
        assert!(!ctx.gate_open("detail"));
    }

    #[test]
    fn discovered_urls_drain() {
        let mut ctx = ExecutionContext::new(Uuid::new_v4(), &item());
        ctx.add_discovered("https://example.com/a".into(), "links");
        assert_eq!(ctx.take_discovered().len(), 1);
        assert!(ctx.take_discovered().is_empty());
    }
}
