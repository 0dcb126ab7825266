use crate::analyzer::GraphAnalyzer;
use crate::config::{ExecutionConfig, ExecutionMode, FailurePolicy};
use crate::executor::{elapsed_ms, merge_params, NodeExecutor};
use crate::retry::AttemptFailure;
use crate::store::StoreHandle;
use chrono::Utc;
use conductorcore::{
    ConductorError, ExecutableRegistry, ExecutionErrorInfo, ExecutionGraph, ExecutionResult,
    GroupMetadata, GroupOutcome, NodeDefinition, NodeId, NodeState, Params,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Walks the analyzer's levels in order, handing each node to the
/// [`NodeExecutor`]. A level is only left once every node in it settled.
pub struct GroupExecutor {
    analyzer: GraphAnalyzer,
    node_executor: NodeExecutor,
}

/// Mutable bookkeeping for one group run
#[derive(Default)]
struct RunState {
    outputs: serde_json::Map<String, serde_json::Value>,
    executed: Vec<NodeId>,
    /// Failed or skipped; their dependents never run
    blocked: HashSet<NodeId>,
    first_failure: Option<ExecutionErrorInfo>,
    failed_node: Option<NodeId>,
    cancelled: bool,
}

impl RunState {
    fn record(&mut self, node_id: &NodeId, result: ExecutionResult) {
        self.executed.extend(result.executed_nodes);
        if result.success {
            self.outputs.insert(
                node_id.to_string(),
                result.data.unwrap_or(serde_json::Value::Null),
            );
        } else {
            self.blocked.insert(node_id.clone());
            if self.first_failure.is_none() {
                self.failed_node = Some(node_id.clone());
                self.first_failure = result.error;
            }
        }
    }

    fn should_halt(&self, policy: FailurePolicy) -> bool {
        self.cancelled || (policy == FailurePolicy::FailFast && self.first_failure.is_some())
    }
}

impl GroupExecutor {
    pub fn new(
        analyzer: GraphAnalyzer,
        registry: Option<Arc<dyn ExecutableRegistry>>,
        store: StoreHandle,
    ) -> Self {
        Self {
            analyzer,
            node_executor: NodeExecutor::new(registry, store),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        self.node_executor.store()
    }

    /// Run a node or group definition to completion.
    ///
    /// Only graph analysis problems (cycles, dangling edges) surface as
    /// `Err`; node failures and cancellation are reported in the outcome.
    pub async fn execute_group(
        &self,
        definition: &NodeDefinition,
        context: Params,
        config: &ExecutionConfig,
        cancellation: &CancellationToken,
    ) -> Result<GroupOutcome, ConductorError> {
        let start_time = Instant::now();
        let executed_at = Utc::now();

        let graph = self.analyzer.analyze_definition(definition)?;
        self.store().initialize(&graph);

        tracing::info!(
            node_id = %definition.id,
            nodes = graph.node_count(),
            levels = graph.level_count(),
            mode = ?config.mode,
            "Group execution started"
        );

        let nodes: HashMap<&NodeId, &NodeDefinition> = if definition.is_group() {
            definition.children.iter().map(|c| (&c.id, c)).collect()
        } else {
            HashMap::from([(&definition.id, definition)])
        };

        let mut run = RunState::default();

        for (level_index, level) in graph.execution_order.iter().enumerate() {
            if cancellation.is_cancelled() {
                run.cancelled = true;
            }
            if run.should_halt(config.failure_policy) {
                tracing::warn!(level = level_index, "Halting before level");
                break;
            }

            let mut runnable = Vec::with_capacity(level.len());
            for node_id in level {
                let Some(node) = nodes.get(node_id).copied() else {
                    return Err(ConductorError::UnknownNode(node_id.clone()));
                };
                if self.depends_on_blocked(&graph, node_id, &run.blocked) {
                    self.skip(node_id, &mut run);
                } else {
                    let params = node_context(&context, &graph, node_id, &run.outputs);
                    runnable.push((node, params));
                }
            }

            tracing::debug!(level = level_index, nodes = runnable.len(), "Running level");

            match config.mode {
                ExecutionMode::Sequential => {
                    for (node, params) in runnable {
                        if cancellation.is_cancelled() {
                            run.cancelled = true;
                        }
                        if run.should_halt(config.failure_policy) {
                            break;
                        }
                        let result = self.run_node(node, params, config, cancellation).await;
                        run.record(&node.id, result);
                    }
                }
                ExecutionMode::Parallel => {
                    let launched = runnable.into_iter().map(|(node, params)| async move {
                        let result = self.run_node(node, params, config, cancellation).await;
                        (node, result)
                    });
                    for (node, result) in join_all(launched).await {
                        run.record(&node.id, result);
                    }
                }
            }
        }

        if cancellation.is_cancelled() {
            run.cancelled = true;
        }

        Ok(self.finish(definition, run, start_time, executed_at))
    }

    /// Nested groups run through a child executor, everything else through
    /// the node executor
    async fn run_node(
        &self,
        node: &NodeDefinition,
        params: Params,
        config: &ExecutionConfig,
        cancellation: &CancellationToken,
    ) -> ExecutionResult {
        if node.is_group() {
            self.run_nested(node, params, config, cancellation).await
        } else {
            self.node_executor
                .execute_local(node, params, Instant::now(), config, cancellation)
                .await
        }
    }

    /// Runs a child group against its own store, mirrored onto this group's
    /// node. Boxed because the group future contains itself.
    fn run_nested<'a>(
        &'a self,
        node: &'a NodeDefinition,
        context: Params,
        config: &'a ExecutionConfig,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, ExecutionResult> {
        async move {
            let start_time = Instant::now();
            let store = self.store();
            if let Err(e) = store.set_node_state(&node.id, NodeState::Executing, None) {
                return self.node_executor.fail(&node.id, AttemptFailure::new(e), start_time);
            }
            tracing::debug!(node_id = %node.id, children = node.children.len(), "Nested group started");

            let nested = GroupExecutor::new(
                self.analyzer.clone(),
                self.node_executor.registry(),
                StoreHandle::nested(store, node.id.clone()),
            );
            let params = merge_params(context, &node.parameters);

            match nested.execute_group(node, params, config, cancellation).await {
                Ok(outcome) => {
                    let result = outcome.result;
                    let settled = if result.success {
                        store.set_node_state(&node.id, NodeState::Completed, None)
                    } else {
                        store.set_node_state(&node.id, NodeState::Error, result.error_message().map(str::to_string))
                    };
                    if let Err(e) = settled {
                        tracing::error!(node_id = %node.id, "Cannot settle nested group: {}", e);
                    }
                    result
                }
                Err(e) => self.node_executor.fail(&node.id, AttemptFailure::new(e), start_time),
            }
        }
        .boxed()
    }

    fn depends_on_blocked(&self, graph: &ExecutionGraph, node_id: &NodeId, blocked: &HashSet<NodeId>) -> bool {
        graph
            .node(node_id)
            .map(|n| n.dependencies.iter().any(|d| blocked.contains(d)))
            .unwrap_or(false)
    }

    /// `pending -> executing -> skipped` without touching the executable
    fn skip(&self, node_id: &NodeId, run: &mut RunState) {
        let store = self.store();
        let skipped = store
            .set_node_state(node_id, NodeState::Executing, None)
            .and_then(|_| store.set_node_state(node_id, NodeState::Skipped, None));
        if let Err(e) = skipped {
            tracing::error!(node_id = %node_id, "Cannot skip node: {}", e);
        }
        tracing::debug!(node_id = %node_id, "Skipped: upstream failure");
        run.blocked.insert(node_id.clone());
    }

    fn finish(
        &self,
        definition: &NodeDefinition,
        mut run: RunState,
        start_time: Instant,
        executed_at: chrono::DateTime<Utc>,
    ) -> GroupOutcome {
        let duration = elapsed_ms(start_time);

        let error = match run.first_failure.take() {
            Some(error) => Some(error),
            None if run.cancelled => Some(ExecutionErrorInfo::from_error(
                definition.id.clone(),
                &ConductorError::Cancelled,
            )),
            None => None,
        };

        // A lone node returns its own output rather than a map of one
        let data = if definition.is_group() {
            serde_json::Value::Object(run.outputs)
        } else {
            run.outputs
                .remove(definition.id.as_str())
                .unwrap_or(serde_json::Value::Null)
        };

        let result = ExecutionResult {
            success: error.is_none(),
            data: Some(data),
            error,
            duration,
            executed_nodes: run.executed,
        };

        if result.success {
            tracing::info!(node_id = %definition.id, duration_ms = duration, "Group execution succeeded");
        } else {
            tracing::error!(
                node_id = %definition.id,
                failed_node = ?run.failed_node,
                duration_ms = duration,
                "Group execution failed"
            );
        }

        GroupOutcome {
            metadata: GroupMetadata {
                executed_at,
                node_id: definition.id.clone(),
                node_type: definition.node_type.clone(),
                child_nodes_executed: result.executed_nodes.len(),
                total_execution_time: duration,
                failed_node: run.failed_node,
            },
            result,
        }
    }
}

/// Flow context plus an `upstream` map of each dependency's output
fn node_context(
    context: &Params,
    graph: &ExecutionGraph,
    node_id: &NodeId,
    outputs: &serde_json::Map<String, serde_json::Value>,
) -> Params {
    let mut params = context.clone();
    let Some(node) = graph.node(node_id) else {
        return params;
    };
    if node.dependencies.is_empty() {
        return params;
    }

    let upstream: serde_json::Map<String, serde_json::Value> = node
        .dependencies
        .iter()
        .filter_map(|dep| {
            outputs
                .get(dep.as_str())
                .map(|value| (dep.to_string(), value.clone()))
        })
        .collect();
    params.insert("upstream".to_string(), serde_json::Value::Object(upstream));
    params
}
