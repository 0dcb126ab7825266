use crate::{Edge, ExecutionId, NodeId, NodeState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of an execution, published after every store mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub node_id: NodeId,
    pub execution_id: ExecutionId,
    /// Aggregate weighted progress, 0-100
    pub progress: f64,
    pub message: String,
    pub nodes: Vec<ProgressNode>,
    pub graph: ProgressGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub weight: f64,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
    pub level: usize,
    pub state: NodeState,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressGraph {
    pub execution_order: Vec<Vec<NodeId>>,
    pub critical_path: Vec<NodeId>,
    pub total_weight: f64,
    pub max_parallelism: usize,
    pub edges: Vec<Edge>,
}

impl ProgressEvent {
    pub fn node(&self, id: &NodeId) -> Option<&ProgressNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
