use crate::config::ExecutionConfig;
use crate::progress::ProgressController;
use crate::retry::{retry_with_backoff, AttemptFailure};
use crate::store::StoreHandle;
use conductorcore::{
    ConductorError, ExecutableRegistry, ExecutionErrorInfo, ExecutionResult, ExecutorNotFoundCode,
    NodeContext, NodeDefinition, NodeError, NodeExecutable, NodeId, NodeState, Params,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Runs a single node through the registry and keeps the store in step:
/// `executing` before the call, a terminal state after it settles.
#[derive(Clone)]
pub struct NodeExecutor {
    registry: Option<Arc<dyn ExecutableRegistry>>,
    store: StoreHandle,
}

impl NodeExecutor {
    pub fn new(registry: Option<Arc<dyn ExecutableRegistry>>, store: StoreHandle) -> Self {
        Self { registry, store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub(crate) fn registry(&self) -> Option<Arc<dyn ExecutableRegistry>> {
        self.registry.clone()
    }

    /// Execute one node. Failures come back as `success: false` results,
    /// never as errors, so callers must check `success`.
    pub async fn execute_local(
        &self,
        node: &NodeDefinition,
        context: Params,
        start_time: Instant,
        config: &ExecutionConfig,
        cancellation: &CancellationToken,
    ) -> ExecutionResult {
        if let Err(e) = self.store.set_node_state(&node.id, NodeState::Executing, None) {
            tracing::error!(node_id = %node.id, "Cannot start node: {}", e);
            return failure_result(&node.id, AttemptFailure::new(e), start_time);
        }
        tracing::debug!(node_id = %node.id, node_type = %node.node_type, "Node started");

        let executable = match self.resolve(&node.node_type) {
            Ok(executable) => executable,
            Err(e) => return self.fail(&node.id, AttemptFailure::new(e), start_time),
        };

        let params = merge_params(context, &node.parameters);

        let controller = (config.progress.enabled && !executable.reports_progress()).then(|| {
            let weight = self
                .store
                .read(|s| s.node(&node.id).map(|n| n.weight))
                .unwrap_or_default();
            ProgressController::new(self.store.clone(), node.id.clone(), weight, config.progress.step_delay())
        });

        let attempts = retry_with_backoff(config.retries, cancellation, move |attempt| {
            let executable = executable.clone();
            let params = params.clone();
            async move {
                if attempt > 0 {
                    tracing::debug!(node_id = %node.id, attempt = attempt + 1, "Retrying node");
                }
                self.invoke(executable, &node.id, params, config, cancellation).await
            }
        });

        let outcome = match &controller {
            Some(controller) => {
                let (outcome, ()) = tokio::join!(
                    async {
                        let outcome = attempts.await;
                        controller.cancel();
                        outcome
                    },
                    controller.start()
                );
                outcome
            }
            None => attempts.await,
        };

        match outcome {
            Ok(data) => {
                let settled = match &controller {
                    Some(controller) => controller.mark_complete().await,
                    None => self.store.set_node_state(&node.id, NodeState::Completed, None),
                };
                if let Err(e) = settled {
                    return failure_result(&node.id, AttemptFailure::new(e), start_time);
                }
                let duration = elapsed_ms(start_time);
                tracing::info!(node_id = %node.id, duration_ms = duration, "Node completed");
                ExecutionResult::succeeded(data, duration, vec![node.id.clone()])
            }
            Err(failure) => self.fail(&node.id, failure, start_time),
        }
    }

    fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeExecutable>, ConductorError> {
        let registry = self.registry.as_ref().ok_or_else(|| ConductorError::ExecutorNotFound {
            code: ExecutorNotFoundCode::NoExecutorFactory,
            node_type: node_type.to_string(),
        })?;
        registry
            .get_node_executable(node_type)
            .ok_or_else(|| ConductorError::ExecutorNotFound {
                code: ExecutorNotFoundCode::NodeTypeNotFound,
                node_type: node_type.to_string(),
            })
    }

    /// One attempt, bounded by `config.timeout_ms`. The call runs as its own
    /// task: a timed-out call is abandoned, not killed, and may keep running.
    async fn invoke(
        &self,
        executable: Arc<dyn NodeExecutable>,
        node_id: &NodeId,
        params: Params,
        config: &ExecutionConfig,
        cancellation: &CancellationToken,
    ) -> Result<serde_json::Value, AttemptFailure> {
        let mut ctx = NodeContext::new(node_id.clone(), params);
        ctx.cancellation = cancellation.child_token();
        if executable.reports_progress() {
            ctx.progress = self.store.progress_sink(node_id.clone());
        }

        let task = tokio::spawn(async move { executable.execute(ctx).await });

        match timeout(config.timeout(), task).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(e))) => Err(AttemptFailure {
                stack: Some(format!("{:?}", e)),
                error: node_error_to_conductor(node_id, e),
            }),
            Ok(Err(join_error)) => Err(AttemptFailure {
                stack: None,
                error: ConductorError::NodeRuntime {
                    node_id: node_id.clone(),
                    message: format!("executable task failed: {}", join_error),
                },
            }),
            Err(_) => {
                tracing::warn!(node_id = %node_id, timeout_ms = config.timeout_ms, "Node attempt timed out");
                Err(AttemptFailure::new(ConductorError::Timeout {
                    millis: config.timeout_ms,
                }))
            }
        }
    }

    pub(crate) fn fail(&self, node_id: &NodeId, failure: AttemptFailure, start_time: Instant) -> ExecutionResult {
        let message = failure.error.to_string();
        tracing::error!(node_id = %node_id, "Node failed: {}", message);
        if let Err(e) = self.store.set_node_state(node_id, NodeState::Error, Some(message)) {
            tracing::error!(node_id = %node_id, "Cannot record node failure: {}", e);
        }
        failure_result(node_id, failure, start_time)
    }
}

/// `node.parameters` win over the surrounding context
pub(crate) fn merge_params(mut context: Params, parameters: &Params) -> Params {
    for (key, value) in parameters {
        context.insert(key.clone(), value.clone());
    }
    context
}

fn node_error_to_conductor(node_id: &NodeId, error: NodeError) -> ConductorError {
    match error {
        NodeError::Timeout { millis } => ConductorError::Timeout { millis },
        NodeError::Cancelled => ConductorError::Cancelled,
        other => ConductorError::NodeRuntime {
            node_id: node_id.clone(),
            message: other.to_string(),
        },
    }
}

fn failure_result(node_id: &NodeId, failure: AttemptFailure, start_time: Instant) -> ExecutionResult {
    let info = ExecutionErrorInfo::from_error(node_id.clone(), &failure.error).with_stack(failure.stack);
    ExecutionResult::failed(info, elapsed_ms(start_time), vec![node_id.clone()])
}

pub(crate) fn elapsed_ms(start_time: Instant) -> u64 {
    start_time.elapsed().as_millis() as u64
}
