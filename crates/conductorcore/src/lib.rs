//! Core abstractions for the conductor execution engine
//!
//! Identifiers, the node/graph data model, the error taxonomy, typed events
//! and the IPC layer that carries them between processes. Scheduling and
//! execution live in `conductorruntime`.

mod error;
pub mod events;
mod execution;
mod graph;
mod ids;
pub mod ipc;
mod node;

pub use error::{ConductorError, ExecutorNotFoundCode, NodeError};
pub use events::*;
pub use execution::{
    ExecutionErrorInfo, ExecutionOptions, ExecutionRequest, ExecutionResult, GroupMetadata,
    GroupOutcome, DEFAULT_EXECUTION_TIMEOUT_MS,
};
pub use graph::{ExecutionGraph, ExecutionGraphNode, GraphNode, NodeState};
pub use ids::{ExecutionId, NodeId};
pub use node::{
    Edge, ExecutableRegistry, NodeContext, NodeDefinition, NodeExecutable, NodeMetadata, Params,
    PortDefinition, ProgressSink, GROUP_NODE_TYPE,
};

/// Result type for conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;
