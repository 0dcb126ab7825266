use crate::{Edge, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduling metadata for one node, derived by the analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub weight: f64,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
    pub level: usize,
}

/// Complete scheduling plan for a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionGraph {
    pub nodes: HashMap<NodeId, GraphNode>,
    pub edges: Vec<Edge>,
    pub total_weight: f64,
    pub critical_path: Vec<NodeId>,
    pub critical_path_weight: f64,
    pub max_parallelism: usize,
    /// Level `i` only holds nodes whose dependencies all sit in levels `< i`
    pub execution_order: Vec<Vec<NodeId>>,
}

impl ExecutionGraph {
    pub fn node(&self, id: &NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn level_count(&self) -> usize {
        self.execution_order.len()
    }

    /// Nodes in schedule order
    pub fn ordered_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.execution_order
            .iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }
}

/// Runtime state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Pending,
    Executing,
    Completed,
    Error,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }

    /// `pending -> executing`, `executing -> {completed, error, skipped}`
    pub fn can_transition_to(&self, next: NodeState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Executing, Self::Completed)
                | (Self::Executing, Self::Error)
                | (Self::Executing, Self::Skipped)
        )
    }
}

/// Runtime record for one node, owned by the execution store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionGraphNode {
    pub state: NodeState,
    pub progress: f64,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionGraphNode {
    pub fn pending(weight: f64) -> Self {
        Self {
            state: NodeState::Pending,
            progress: 0.0,
            weight,
            start_time: None,
            end_time: None,
            error: None,
        }
    }
}
