//! Execution graph store: the single source of truth for in-flight node
//! state. Every mutation recomputes the aggregate progress before it
//! returns, so reads never lag behind writes.

use chrono::Utc;
use conductorcore::{
    ConductorError, ConductorEvent, EventBus, ExecutionGraph, ExecutionGraphNode, ExecutionId,
    NodeId, NodeState, ProgressEvent, ProgressGraph, ProgressNode, ProgressSink,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ExecutionStore {
    graph: Option<ExecutionGraph>,
    nodes: HashMap<NodeId, ExecutionGraphNode>,
    total_weight: f64,
    cached_progress: f64,
    started_at: Option<Instant>,
    last_message: String,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One pending record per graph node
    pub fn initialize(&mut self, graph: &ExecutionGraph) {
        self.nodes = graph
            .nodes
            .values()
            .map(|n| (n.id.clone(), ExecutionGraphNode::pending(n.weight)))
            .collect();
        self.total_weight = graph.total_weight;
        self.graph = Some(graph.clone());
        self.cached_progress = 0.0;
        self.started_at = None;
        self.last_message.clear();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_node_state(
        &mut self,
        node_id: &NodeId,
        state: NodeState,
        error: Option<String>,
    ) -> Result<(), ConductorError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ConductorError::UnknownNode(node_id.clone()))?;

        if !node.state.can_transition_to(state) {
            return Err(ConductorError::InvalidTransition {
                node_id: node_id.clone(),
                from: node.state,
                to: state,
            });
        }

        node.state = state;
        match state {
            NodeState::Executing => {
                node.start_time = Some(Utc::now());
                self.started_at.get_or_insert_with(Instant::now);
            }
            NodeState::Completed | NodeState::Skipped => {
                node.progress = 100.0;
                node.end_time = Some(Utc::now());
            }
            NodeState::Error => {
                node.end_time = Some(Utc::now());
                node.error = error;
            }
            NodeState::Pending => {}
        }

        self.last_message = format!("{}: {:?}", node_id, state);
        self.recompute();
        Ok(())
    }

    /// Only while executing, and never backwards
    pub fn set_node_progress(
        &mut self,
        node_id: &NodeId,
        percent: f64,
        message: &str,
    ) -> Result<(), ConductorError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ConductorError::UnknownNode(node_id.clone()))?;

        if node.state != NodeState::Executing {
            return Err(ConductorError::NotExecuting {
                node_id: node_id.clone(),
                state: node.state,
            });
        }

        if !percent.is_finite() {
            return Err(ConductorError::InvalidProgress {
                node_id: node_id.clone(),
                requested: percent,
            });
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent < node.progress {
            return Err(ConductorError::ProgressRegression {
                node_id: node_id.clone(),
                current: node.progress,
                requested: percent,
            });
        }

        node.progress = percent;
        self.last_message = message.to_string();
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.cached_progress = if self.total_weight > 0.0 {
            let done: f64 = self.nodes.values().map(|n| n.weight * n.progress / 100.0).sum();
            done / self.total_weight * 100.0
        } else {
            0.0
        };
    }

    /// Weighted completion, 0-100
    pub fn cached_progress(&self) -> f64 {
        self.cached_progress
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Weight of completed and skipped nodes. Skipped work counts as done
    /// for progress, not for success.
    pub fn completed_weight(&self) -> f64 {
        self.nodes
            .values()
            .filter(|n| matches!(n.state, NodeState::Completed | NodeState::Skipped))
            .map(|n| n.weight)
            .sum()
    }

    /// Linear extrapolation from the elapsed time per unit of completed
    /// weight. A heuristic; `None` until something has finished.
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        let started = self.started_at?;
        let completed = self.completed_weight();
        if completed <= 0.0 {
            return None;
        }
        let remaining = (self.total_weight - completed).max(0.0);
        Some(started.elapsed().mul_f64(remaining / completed))
    }

    pub fn node(&self, node_id: &NodeId) -> Option<&ExecutionGraphNode> {
        self.nodes.get(node_id)
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.nodes.get(node_id).map(|n| n.state)
    }

    /// Matching nodes in schedule order
    pub fn nodes_by_state(&self, state: NodeState) -> Vec<NodeId> {
        let Some(graph) = &self.graph else {
            return Vec::new();
        };
        graph
            .execution_order
            .iter()
            .flatten()
            .filter(|id| self.node_state(id) == Some(state))
            .cloned()
            .collect()
    }

    pub fn graph(&self) -> Option<&ExecutionGraph> {
        self.graph.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.values().all(|n| n.state.is_terminal())
    }

    /// Wire snapshot of the whole execution
    pub fn snapshot(&self, execution_id: &ExecutionId, node_id: &NodeId) -> Option<ProgressEvent> {
        let graph = self.graph.as_ref()?;
        let nodes = graph
            .ordered_nodes()
            .filter_map(|g| {
                let runtime = self.nodes.get(&g.id)?;
                Some(ProgressNode {
                    id: g.id.clone(),
                    name: g.name.clone(),
                    node_type: g.node_type.clone(),
                    weight: g.weight,
                    dependencies: g.dependencies.clone(),
                    dependents: g.dependents.clone(),
                    level: g.level,
                    state: runtime.state,
                    progress: runtime.progress,
                    start_time: runtime.start_time,
                    end_time: runtime.end_time,
                    error: runtime.error.clone(),
                })
            })
            .collect();

        Some(ProgressEvent {
            node_id: node_id.clone(),
            execution_id: execution_id.clone(),
            progress: self.cached_progress,
            message: self.last_message.clone(),
            nodes,
            graph: ProgressGraph {
                execution_order: graph.execution_order.clone(),
                critical_path: graph.critical_path.clone(),
                total_weight: graph.total_weight,
                max_parallelism: graph.max_parallelism,
                edges: graph.edges.clone(),
            },
        })
    }
}

#[derive(Clone)]
struct Publisher {
    bus: EventBus,
    execution_id: ExecutionId,
    root: NodeId,
}

/// Shared handle to one execution's store.
///
/// Locks are held only for the synchronous mutation; the optional progress
/// event is emitted after the lock is released.
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Arc<Mutex<ExecutionStore>>,
    publisher: Option<Publisher>,
    /// Receives this store's aggregate progress; set for nested groups
    parent: Option<ProgressSink>,
}

impl StoreHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that publishes a progress snapshot after every mutation
    pub fn publishing(bus: EventBus, execution_id: ExecutionId, root: NodeId) -> Self {
        Self {
            inner: Arc::default(),
            publisher: Some(Publisher {
                bus,
                execution_id,
                root,
            }),
            parent: None,
        }
    }

    /// Store for a nested group. Its aggregate progress is reported as the
    /// progress of `node_id` in `parent`.
    pub fn nested(parent: &StoreHandle, node_id: NodeId) -> Self {
        Self {
            inner: Arc::default(),
            publisher: None,
            parent: Some(parent.progress_sink(node_id)),
        }
    }

    pub fn initialize(&self, graph: &ExecutionGraph) {
        self.inner.lock().initialize(graph);
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    pub fn set_node_state(
        &self,
        node_id: &NodeId,
        state: NodeState,
        error: Option<String>,
    ) -> Result<(), ConductorError> {
        self.mutate(|store| store.set_node_state(node_id, state, error))
    }

    pub fn set_node_progress(&self, node_id: &NodeId, percent: f64, message: &str) -> Result<(), ConductorError> {
        self.mutate(|store| store.set_node_progress(node_id, percent, message))
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut ExecutionStore) -> Result<(), ConductorError>,
    ) -> Result<(), ConductorError> {
        let (snapshot, progress, message) = {
            let mut store = self.inner.lock();
            f(&mut store)?;
            let snapshot = self
                .publisher
                .as_ref()
                .and_then(|p| store.snapshot(&p.execution_id, &p.root));
            (snapshot, store.cached_progress(), store.last_message.clone())
        };
        if let (Some(publisher), Some(event)) = (&self.publisher, snapshot) {
            publisher.bus.emit(ConductorEvent::Progress(event));
        }
        if let Some(parent) = &self.parent {
            parent.report(progress, &message);
        }
        Ok(())
    }

    /// Run a read-only query against the store
    pub fn read<R>(&self, f: impl FnOnce(&ExecutionStore) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn cached_progress(&self) -> f64 {
        self.read(|s| s.cached_progress())
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.read(|s| s.node_state(node_id))
    }

    pub fn node_progress(&self, node_id: &NodeId) -> Option<f64> {
        self.read(|s| s.node(node_id).map(|n| n.progress))
    }

    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        self.read(|s| s.estimated_time_remaining())
    }

    pub fn snapshot(&self) -> Option<ProgressEvent> {
        let publisher = self.publisher.as_ref()?;
        self.read(|s| s.snapshot(&publisher.execution_id, &publisher.root))
    }

    /// Sink for executables that report real progress on `node_id`
    pub fn progress_sink(&self, node_id: NodeId) -> ProgressSink {
        let store = self.clone();
        ProgressSink::new(move |percent, message| {
            if let Err(e) = store.set_node_progress(&node_id, percent, message) {
                tracing::debug!(node_id = %node_id, "Ignoring progress report: {}", e);
            }
        })
    }
}
