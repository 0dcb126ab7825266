//! Execution runtime
//!
//! Graph analysis, the per-execution state store, node and group executors,
//! synthetic progress, and the cross-process bridge. [`ConductorRuntime`]
//! ties them together behind one entry point.

mod analyzer;
mod bridge;
mod config;
mod executor;
mod group;
mod progress;
mod registry;
mod retry;
mod runtime;
mod storage;
mod store;
mod weights;

pub use analyzer::GraphAnalyzer;
pub use bridge::{BridgeWorker, ExecutionBridge, ExecutionHandle, ProgressHandler, ProgressSubscription};
pub use config::{ConductorConfig, ExecutionConfig, ExecutionMode, FailurePolicy, ProgressConfig};
pub use executor::NodeExecutor;
pub use group::GroupExecutor;
pub use progress::{generate_progress_steps, ProgressController, ProgressStep, MIN_SETTLE_DELAY};
pub use registry::{FnExecutable, NodeRegistry};
pub use retry::{backoff_delay, retry_with_backoff, AttemptFailure};
pub use runtime::ConductorRuntime;
pub use storage::{FlowDocument, FlowStorage, InMemoryFlowStorage, ListOptions};
pub use store::{ExecutionStore, StoreHandle};
pub use weights::{NodeWeights, DEFAULT_NODE_WEIGHT};
