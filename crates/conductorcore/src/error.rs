use crate::{NodeId, NodeState};
use thiserror::Error;

/// Why no executable could be resolved for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorNotFoundCode {
    /// No registry was supplied to the executor at all
    NoExecutorFactory,
    /// The registry has nothing registered for the node type
    NodeTypeNotFound,
}

impl ExecutorNotFoundCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoExecutorFactory => "NO_EXECUTOR_FACTORY",
            Self::NodeTypeNotFound => "NODE_TYPE_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for ExecutorNotFoundCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{code}: no executable for node type '{node_type}'")]
    ExecutorNotFound {
        code: ExecutorNotFoundCode,
        node_type: String,
    },

    #[error("Node {node_id} failed: {message}")]
    NodeRuntime { node_id: NodeId, message: String },

    #[error("Execution timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cyclic dependency detected between nodes: {remaining:?}")]
    CycleDetected { remaining: Vec<NodeId> },

    #[error("IPC transport unavailable")]
    TransportUnavailable,

    /// Failure reported by the process on the other side of the bridge
    #[error("{message}")]
    Remote {
        code: Option<String>,
        message: String,
    },

    #[error("Illegal state transition for node {node_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        node_id: NodeId,
        from: NodeState,
        to: NodeState,
    },

    #[error("Progress for node {node_id} regressed from {current} to {requested}")]
    ProgressRegression {
        node_id: NodeId,
        current: f64,
        requested: f64,
    },

    #[error("Progress for node {node_id} must be a finite number, got {requested}")]
    InvalidProgress { node_id: NodeId, requested: f64 },

    #[error("Node {node_id} is not executing (state {state:?})")]
    NotExecuting { node_id: NodeId, state: NodeState },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConductorError {
    /// Only node runtime failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NodeRuntime { .. } | Self::Timeout { .. })
    }

    /// Machine-readable code carried in error payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ExecutorNotFound { code, .. } => code.as_str(),
            Self::NodeRuntime { .. } => "NODE_RUNTIME_ERROR",
            Self::Timeout { .. } => "EXECUTION_TIMEOUT",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::TransportUnavailable => "TRANSPORT_UNAVAILABLE",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::InvalidTransition { .. }
            | Self::ProgressRegression { .. }
            | Self::InvalidProgress { .. }
            | Self::NotExecuting { .. }
            | Self::UnknownNode(_) => "INVALID_STATE",
            Self::Cancelled => "CANCELLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Error returned by a node executable.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}
