//! Workflow definitions: typed nodes, dependency edges, and lifecycle status.
//!
//! A workflow is immutable at execution time. Graph checks live in
//! [`graph`]; the orchestrator validates before seeding any URL.

pub mod graph;

use serde::{Deserialize, Serialize};

pub use graph::{WorkflowError, phases, validate};

/// Lifecycle status of a stored workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Archived,
}

/// The typed step kinds a workflow graph is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Navigate,
    Extract,
    Discover,
    Click,
    Wait,
    Scroll,
    Plugin,
    Loop,
    Conditional,
}

impl NodeType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "navigate",
            Self::Extract => "extract",
            Self::Discover => "discover",
            Self::Click => "click",
            Self::Wait => "wait",
            Self::Scroll => "scroll",
            Self::Plugin => "plugin",
            Self::Loop => "loop",
            Self::Conditional => "conditional",
        }
    }
}

/// Node-scoped retry override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,
}

/// A single step within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique within the workflow
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Raw parameters; each executor deserializes these into its typed
    /// config during validation
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// When false, a failure of this node does not fail the URL
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

/// Dependency pair; an alternative way of expressing `dependencies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// An immutable-at-execution-time scraping procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Effective dependencies of a node: its `dependencies` list merged with
    /// incoming `edges`.
    #[must_use]
    pub fn dependencies_of<'a>(&'a self, node_id: &str) -> Vec<&'a str> {
        let mut deps: Vec<&str> = self
            .nodes
            .iter()
            .find(|n| n.id == node_id)
            .map(|n| n.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default();

        for edge in &self.edges {
            if edge.to == node_id && !deps.contains(&edge.from.as_str()) {
                deps.push(edge.from.as_str());
            }
        }
        deps
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}
