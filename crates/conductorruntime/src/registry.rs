use async_trait::async_trait;
use conductorcore::{ExecutableRegistry, NodeContext, NodeError, NodeExecutable, NodeMetadata};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Registry of available node types
#[derive(Default)]
pub struct NodeRegistry {
    executables: HashMap<String, Arc<dyn NodeExecutable>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executables: HashMap::new(),
        }
    }

    /// Register an executable under its own node type
    pub fn register(&mut self, executable: Arc<dyn NodeExecutable>) {
        let node_type = executable.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        if self.executables.insert(node_type.clone(), executable).is_some() {
            tracing::warn!("Node type {} was already registered; replaced", node_type);
        }
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executables.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.executables.get(node_type).map(|e| e.metadata())
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executables.contains_key(node_type)
    }
}

impl ExecutableRegistry for NodeRegistry {
    fn get_node_executable(&self, node_type: &str) -> Option<Arc<dyn NodeExecutable>> {
        self.executables.get(node_type).cloned()
    }
}

type BoxedRun = dyn Fn(NodeContext) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, NodeError>> + Send>>
    + Send
    + Sync;

/// Executable backed by an async closure
pub struct FnExecutable {
    node_type: String,
    run: Box<BoxedRun>,
    reports_progress: bool,
}

impl FnExecutable {
    pub fn new<F, Fut>(node_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, NodeError>> + Send + 'static,
    {
        Self {
            node_type: node_type.into(),
            run: Box::new(move |ctx| Box::pin(f(ctx))),
            reports_progress: false,
        }
    }

    /// Mark the closure as reporting its own progress
    pub fn reporting_progress(mut self) -> Self {
        self.reports_progress = true;
        self
    }
}

#[async_trait]
impl NodeExecutable for FnExecutable {
    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn execute(&self, ctx: NodeContext) -> Result<serde_json::Value, NodeError> {
        (self.run)(ctx).await
    }

    fn reports_progress(&self) -> bool {
        self.reports_progress
    }
}
