use crate::{NodeError, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Opaque key/value parameters handed to an executable
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Node type of a plain container of children
pub const GROUP_NODE_TYPE: &str = "group";

/// A unit of work in a flow. Groups carry their own `children` and `edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Params,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            node_type: node_type.into(),
            parameters: Params::new(),
            children: Vec::new(),
            edges: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add a child node, stamping it with this node as parent
    pub fn with_child(mut self, mut child: NodeDefinition) -> Self {
        child.parent_id = Some(self.id.clone());
        self.children.push(child);
        self
    }

    pub fn with_edge(mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    /// Anything with children, plus the empty `group` node
    pub fn is_group(&self) -> bool {
        !self.children.is_empty() || self.node_type == GROUP_NODE_TYPE
    }

    pub fn find_child(&self, id: &NodeId) -> Option<&NodeDefinition> {
        self.children.iter().find(|c| &c.id == id)
    }
}

/// `target` depends on `source`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Callback used by executables that report their own progress
#[derive(Clone, Default)]
pub struct ProgressSink {
    report: Option<Arc<dyn Fn(f64, &str) + Send + Sync>>,
}

impl ProgressSink {
    pub fn new(report: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        Self {
            report: Some(Arc::new(report)),
        }
    }

    /// Sink that drops every report
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn report(&self, percent: f64, message: &str) {
        if let Some(report) = &self.report {
            report(percent, message);
        }
    }
}

/// Execution context passed to each executable
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Flow context merged with the node's own parameters
    pub params: Params,

    pub progress: ProgressSink,

    /// Cancelled when the surrounding run is cancelled
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: NodeId, params: Params) -> Self {
        Self {
            node_id,
            params,
            progress: ProgressSink::noop(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Get required parameter or return error
    pub fn require_param(&self, name: &str) -> Result<&serde_json::Value, NodeError> {
        self.params
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_param(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })
    }

    /// Get parameter with default
    pub fn param_or(&self, name: &str, default: serde_json::Value) -> serde_json::Value {
        self.params.get(name).cloned().unwrap_or(default)
    }
}

/// Core trait every node type implements
#[async_trait]
pub trait NodeExecutable: Send + Sync {
    /// Unique type identifier (e.g. "http.request", "transform.json_parse")
    fn node_type(&self) -> &str;

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError>;

    /// Whether the executable reports real incremental progress through
    /// [`NodeContext::progress`]. Executables that don't get a synthetic
    /// progress stream instead.
    fn reports_progress(&self) -> bool {
        false
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Resolves executables by node type
pub trait ExecutableRegistry: Send + Sync {
    fn get_node_executable(&self, node_type: &str) -> Option<Arc<dyn NodeExecutable>>;
}

/// Metadata about a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl PortDefinition {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}
