//! Workflow graph validation and phase layering.
//!
//! Rules enforced before any execution starts:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every dependency and edge must reference existing node IDs.
//! 3. The directed graph must be acyclic.
//!
//! [`phases`] additionally layers the DAG into maximal antichains: every
//! node lands in the earliest phase where all of its dependencies are
//! already placed. Phases run sequentially per URL.

use std::collections::{HashMap, HashSet, VecDeque};

use super::Workflow;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow has no nodes")]
    Empty,

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("node '{node_id}' referenced by {side} does not exist")]
    UnknownNodeReference { node_id: String, side: &'static str },

    #[error("workflow graph contains a cycle")]
    CycleDetected,
}

/// Validate the workflow graph. Returns node IDs in topological order.
pub fn validate(workflow: &Workflow) -> Result<Vec<String>, WorkflowError> {
    if workflow.nodes.is_empty() {
        return Err(WorkflowError::Empty);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNodeId(node.id.clone()));
        }
    }

    for node in &workflow.nodes {
        for dep in &node.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(WorkflowError::UnknownNodeReference {
                    node_id: dep.clone(),
                    side: "dependencies",
                });
            }
        }
    }
    for edge in &workflow.edges {
        if !seen.contains(edge.from.as_str()) {
            return Err(WorkflowError::UnknownNodeReference {
                node_id: edge.from.clone(),
                side: "edge.from",
            });
        }
        if !seen.contains(edge.to.as_str()) {
            return Err(WorkflowError::UnknownNodeReference {
                node_id: edge.to.clone(),
                side: "edge.to",
            });
        }
    }

    // Kahn's algorithm over the merged dependency view
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &workflow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }
    for node in &workflow.nodes {
        for dep in workflow.dependencies_of(&node.id) {
            adjacency.entry(dep).or_default().push(node.id.as_str());
            *in_degree.entry(node.id.as_str()).or_insert(0) += 1;
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(workflow.nodes.len());
    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != workflow.nodes.len() {
        return Err(WorkflowError::CycleDetected);
    }

    Ok(sorted)
}

/// Layer the validated graph into phases (maximal antichains).
///
/// Phase 0 holds all source nodes; each later phase holds the nodes whose
/// deepest dependency sits one phase earlier. Node order within a phase
/// follows the workflow's declaration order.
pub fn phases(workflow: &Workflow) -> Result<Vec<Vec<String>>, WorkflowError> {
    validate(workflow)?;

    let mut level: HashMap<&str, usize> = HashMap::new();

    // Declaration order is not topological; iterate until fixpoint. Depth is
    // bounded by node count, so this terminates on any valid DAG.
    let mut changed = true;
    while changed {
        changed = false;
        for node in &workflow.nodes {
            let deps = workflow.dependencies_of(&node.id);
            let target = if deps.is_empty() {
                0
            } else {
                let mut max = 0;
                for dep in deps {
                    max = max.max(level.get(dep).copied().map_or(0, |l| l + 1));
                }
                max
            };
            if level.get(node.id.as_str()) != Some(&target) {
                level.insert(node.id.as_str(), target);
                changed = true;
            }
        }
    }

    let depth = level.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<String>> = vec![Vec::new(); depth + 1];
    for node in &workflow.nodes {
        let l = level.get(node.id.as_str()).copied().unwrap_or(0);
        layers[l].push(node.id.clone());
    }

    Ok(layers)
}
