//! Node executors and the registry binding node types to implementations.
//!
//! Every executor implements [`NodeExecutor`]: a `validate` pass over raw
//! params (run at workflow save and again at execution start) and an
//! `execute` pass against a live page. Params are deserialized into typed
//! configs up front; no untyped map reaches executor logic.

mod control;
mod discover;
mod extract;
mod interact;
pub mod params;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::browser::Page;
use crate::context::ExecutionContext;
use crate::error::ExecError;
use crate::health::{HealthStatus, NodeBaseline, NodeCheck};
use crate::queue::UrlQueueItem;
use crate::workflow::{NodeDefinition, NodeType};

pub use control::{ConditionalExecutor, LoopExecutor};
pub use discover::DiscoverExecutor;
pub use extract::ExtractExecutor;
pub use interact::{ClickExecutor, NavigateExecutor, ScrollExecutor, WaitExecutor};

/// Everything an executor needs for one node attempt.
pub struct ExecutionInput<'a> {
    /// Page opened on the leased browser context
    pub page: Arc<dyn Page>,
    /// Per-URL variable bag
    pub ctx: &'a mut ExecutionContext,
    /// The frontier item being processed
    pub item: &'a UrlQueueItem,
    /// The executing node's id within the workflow
    pub node_id: &'a str,
    /// Raw node params; executors deserialize their typed config
    pub params: &'a Value,
    pub execution_id: Uuid,
    /// Effective timeout (base × the execution's timeout multiplier)
    pub timeout: Duration,
}

/// What a node attempt produced.
#[derive(Debug, Default)]
pub struct ExecutionOutput {
    /// Opaque node result, persisted with the attempt record
    pub result: Value,
    pub metadata: serde_json::Map<String, Value>,
    /// URLs to merge into the frontier
    pub discovered_urls: Vec<String>,
}

impl ExecutionOutput {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_result(result: Value) -> Self {
        Self {
            result,
            ..Default::default()
        }
    }

    pub fn meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// The contract every node implementation fulfils.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Check raw params deserialize into this executor's typed config.
    fn validate(&self, params: &Value) -> Result<(), ExecError>;

    async fn execute(&self, input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError>;

    /// Replay this node for a health check and compare against a baseline.
    ///
    /// The default implementation executes the node and checks the generic
    /// baseline expectations (status, matched element counts, required
    /// fields) against the output metadata.
    async fn validate_for_monitoring(
        &self,
        input: ExecutionInput<'_>,
        baseline: &NodeBaseline,
    ) -> NodeCheck {
        let node_id = input.node_id.to_string();
        let started = std::time::Instant::now();
        let outcome = self.execute(input).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                let mut issues = Vec::new();

                if let Some(expected) = baseline.expected_status {
                    let observed = output
                        .metadata
                        .get("status")
                        .and_then(Value::as_u64)
                        .map(|s| s as u16);
                    if observed != Some(expected) {
                        issues.push(format!(
                            "expected status {expected}, observed {observed:?}"
                        ));
                    }
                }

                if let Some(min) = baseline.min_elements {
                    let matched = output
                        .metadata
                        .get("elements_matched")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as usize;
                    if matched < min {
                        issues.push(format!("matched {matched} elements, baseline requires {min}"));
                    }
                }

                for field in &baseline.required_fields {
                    let present = output
                        .result
                        .get(field)
                        .is_some_and(|v| !v.is_null());
                    if !present {
                        issues.push(format!("required field '{field}' missing from output"));
                    }
                }

                let status = if issues.is_empty() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                };
                NodeCheck {
                    node_id,
                    status,
                    duration_ms,
                    metrics: output.metadata,
                    issues,
                }
            }
            Err(e) => NodeCheck {
                node_id,
                status: HealthStatus::Broken,
                duration_ms,
                metrics: serde_json::Map::new(),
                issues: vec![e.to_string()],
            },
        }
    }
}

/// Closed registry of built-in executors plus named plugins.
///
/// Plugins are well-known names bound to in-process implementations of the
/// same contract; there is no dynamic loading.
pub struct NodeRegistry {
    builtins: HashMap<NodeType, Arc<dyn NodeExecutor>>,
    plugins: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    /// Registry with every built-in node type bound.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut builtins: HashMap<NodeType, Arc<dyn NodeExecutor>> = HashMap::new();
        builtins.insert(NodeType::Navigate, Arc::new(NavigateExecutor));
        builtins.insert(NodeType::Extract, Arc::new(ExtractExecutor));
        builtins.insert(NodeType::Discover, Arc::new(DiscoverExecutor));
        builtins.insert(NodeType::Click, Arc::new(ClickExecutor));
        builtins.insert(NodeType::Wait, Arc::new(WaitExecutor));
        builtins.insert(NodeType::Scroll, Arc::new(ScrollExecutor));
        builtins.insert(NodeType::Loop, Arc::new(LoopExecutor));
        builtins.insert(NodeType::Conditional, Arc::new(ConditionalExecutor));

        Self {
            builtins,
            plugins: HashMap::new(),
        }
    }

    /// Bind a plugin name to an executor implementing the node contract.
    pub fn register_plugin(&mut self, name: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.plugins.insert(name.into(), executor);
    }

    /// Resolve the executor for a node definition.
    pub fn resolve(&self, node: &NodeDefinition) -> Result<Arc<dyn NodeExecutor>, ExecError> {
        if node.node_type == NodeType::Plugin {
            let name = params::PluginParams::parse(&node.params)?.plugin;
            return self.plugins.get(&name).cloned().ok_or_else(|| {
                ExecError::Validation(format!("unknown plugin '{name}' in node '{}'", node.id))
            });
        }

        self.builtins
            .get(&node.node_type)
            .cloned()
            .ok_or_else(|| {
                ExecError::Validation(format!(
                    "no executor registered for node type '{}'",
                    node.node_type.as_str()
                ))
            })
    }

    /// Resolve and validate one node's params.
    pub fn validate_node(&self, node: &NodeDefinition) -> Result<(), ExecError> {
        let executor = self.resolve(node)?;
        executor.validate(&node.params).map_err(|e| {
            ExecError::Validation(format!("node '{}': {e}", node.id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: NodeType, params: Value) -> NodeDefinition {
        NodeDefinition {
            id: "n1".into(),
            node_type,
            params,
            dependencies: vec![],
            retry_policy: None,
            required: true,
        }
    }

    #[test]
    fn builtins_resolve() {
        let registry = NodeRegistry::with_builtins();
        for ty in [
            NodeType::Navigate,
            NodeType::Extract,
            NodeType::Discover,
            NodeType::Click,
            NodeType::Wait,
            NodeType::Scroll,
            NodeType::Loop,
            NodeType::Conditional,
        ] {
            let resolved = registry.resolve(&node(ty, serde_json::json!({})));
            assert!(resolved.is_ok(), "no executor for {ty:?}");
            assert_eq!(resolved.expect("resolved").node_type(), ty);
        }
    }

    struct NullPlugin;

    #[async_trait::async_trait]
    impl NodeExecutor for NullPlugin {
        fn node_type(&self) -> NodeType {
            NodeType::Plugin
        }

        fn validate(&self, _params: &Value) -> Result<(), ExecError> {
            Ok(())
        }

        async fn execute(&self, _input: ExecutionInput<'_>) -> Result<ExecutionOutput, ExecError> {
            Ok(ExecutionOutput::empty())
        }
    }

    #[test]
    fn registered_plugin_resolves_by_name() {
        let mut registry = NodeRegistry::with_builtins();
        registry.register_plugin("sitemap_feed", Arc::new(NullPlugin));

        let n = node(
            NodeType::Plugin,
            serde_json::json!({ "plugin": "sitemap_feed", "config": {} }),
        );
        let resolved = registry.resolve(&n).expect("plugin resolves");
        assert_eq!(resolved.node_type(), NodeType::Plugin);
        assert!(registry.validate_node(&n).is_ok());
    }

    #[test]
    fn unknown_plugin_fails_validation() {
        let registry = NodeRegistry::with_builtins();
        let n = node(NodeType::Plugin, serde_json::json!({ "plugin": "ghost" }));
        assert!(matches!(
            registry.resolve(&n),
            Err(ExecError::Validation(_))
        ));
    }

    #[test]
    fn bad_params_fail_validation() {
        let registry = NodeRegistry::with_builtins();
        let n = node(
            NodeType::Extract,
            serde_json::json!({ "fields": "not-an-object" }),
        );
        assert!(registry.validate_node(&n).is_err());
    }
}
