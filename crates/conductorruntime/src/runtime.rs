use crate::analyzer::GraphAnalyzer;
use crate::config::{ConductorConfig, ExecutionConfig};
use crate::group::GroupExecutor;
use crate::registry::NodeRegistry;
use crate::storage::{FlowStorage, InMemoryFlowStorage};
use crate::store::StoreHandle;
use conductorcore::{
    ConductorError, ConductorEvent, EventBus, ExecutableRegistry, ExecutionGraph, ExecutionId,
    GroupOutcome, NodeDefinition, Params,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Main entry point for running node graphs in this process
pub struct ConductorRuntime {
    registry: Arc<NodeRegistry>,
    analyzer: GraphAnalyzer,
    event_bus: EventBus,
    flows: Arc<dyn FlowStorage>,
    config: ConductorConfig,
}

impl ConductorRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(ConductorConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: ConductorConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-populated registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: ConductorConfig) -> Self {
        Self {
            registry,
            analyzer: GraphAnalyzer::new(config.weights.clone()),
            event_bus: EventBus::new(config.event_buffer_size),
            flows: Arc::new(InMemoryFlowStorage::new()),
            config,
        }
    }

    /// Swap the flow storage backend
    pub fn with_flow_storage(mut self, flows: Arc<dyn FlowStorage>) -> Self {
        self.flows = flows;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    pub fn flows(&self) -> &Arc<dyn FlowStorage> {
        &self.flows
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to progress, result and error events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConductorEvent> {
        self.event_bus.subscribe()
    }

    /// Scheduling plan for a definition, without running anything
    pub fn analyze(&self, definition: &NodeDefinition) -> Result<ExecutionGraph, ConductorError> {
        self.analyzer.analyze_definition(definition)
    }

    /// Execute with the configured defaults and a fresh execution id
    pub async fn execute(
        &self,
        definition: &NodeDefinition,
        inputs: Params,
    ) -> Result<GroupOutcome, ConductorError> {
        self.execute_with(
            definition,
            inputs,
            &self.config.execution,
            ExecutionId::generate(),
            &CancellationToken::new(),
        )
        .await
    }

    /// Execute with explicit settings. Progress snapshots for `execution_id`
    /// are published on the runtime's event bus.
    pub async fn execute_with(
        &self,
        definition: &NodeDefinition,
        inputs: Params,
        config: &ExecutionConfig,
        execution_id: ExecutionId,
        cancellation: &CancellationToken,
    ) -> Result<GroupOutcome, ConductorError> {
        tracing::info!(
            execution_id = %execution_id,
            node_id = %definition.id,
            node_type = %definition.node_type,
            "Starting execution"
        );
        let store = StoreHandle::publishing(self.event_bus.clone(), execution_id, definition.id.clone());
        self.execute_with_store(definition, inputs, config, store, cancellation)
            .await
    }

    /// Execute against a caller-owned store, e.g. to inspect it afterwards
    pub async fn execute_with_store(
        &self,
        definition: &NodeDefinition,
        inputs: Params,
        config: &ExecutionConfig,
        store: StoreHandle,
        cancellation: &CancellationToken,
    ) -> Result<GroupOutcome, ConductorError> {
        let registry: Arc<dyn ExecutableRegistry> = self.registry.clone();
        let executor = GroupExecutor::new(self.analyzer.clone(), Some(registry), store);
        executor
            .execute_group(definition, inputs, config, cancellation)
            .await
    }

    /// Load a saved flow and execute its definition
    pub async fn execute_flow(&self, flow_id: &str, inputs: Params) -> Result<GroupOutcome, ConductorError> {
        let flow = self
            .flows
            .load_flow(flow_id)
            .await?
            .ok_or_else(|| ConductorError::Storage(format!("flow {} not found", flow_id)))?;
        self.execute(&flow.definition, inputs).await
    }
}

impl Default for ConductorRuntime {
    fn default() -> Self {
        Self::new()
    }
}
