use crate::weights::NodeWeights;
use conductorcore::{ConductorError, Edge, ExecutionGraph, GraphNode, NodeDefinition, NodeId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Turns a node/edge list into a scheduling plan. Pure and deterministic:
/// levels list nodes in input order, and critical-path ties keep the first
/// path found.
#[derive(Debug, Clone, Default)]
pub struct GraphAnalyzer {
    weights: NodeWeights,
}

impl GraphAnalyzer {
    pub fn new(weights: NodeWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &NodeWeights {
        &self.weights
    }

    /// Plan for a definition: its children when it is a group, otherwise a
    /// one-node, one-level plan for the node itself.
    pub fn analyze_definition(&self, definition: &NodeDefinition) -> Result<ExecutionGraph, ConductorError> {
        if definition.is_group() {
            self.analyze(&definition.children, &definition.edges)
        } else {
            self.analyze(std::slice::from_ref(definition), &[])
        }
    }

    pub fn analyze(&self, nodes: &[NodeDefinition], edges: &[Edge]) -> Result<ExecutionGraph, ConductorError> {
        let (graph, edges) = self.build_graph(nodes, edges)?;
        let weights: Vec<f64> = nodes
            .iter()
            .map(|n| self.weights.weight_for(&n.node_type))
            .collect();

        let levels = topological_levels(&graph, nodes)?;

        // Adjacency in edge order (petgraph iterates neighbours newest-first)
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        for (source, target) in &edges {
            dependencies[target.index()].push(source.index());
            dependents[source.index()].push(target.index());
        }

        let order: Vec<usize> = levels.iter().flatten().map(|idx| idx.index()).collect();
        let (critical_path, critical_path_weight) = critical_path(&order, &dependents, &weights);

        let mut level_of = vec![0usize; nodes.len()];
        for (level, members) in levels.iter().enumerate() {
            for idx in members {
                level_of[idx.index()] = level;
            }
        }

        let ids = |list: &[usize]| -> Vec<NodeId> { list.iter().map(|i| nodes[*i].id.clone()).collect() };

        let graph_nodes: HashMap<NodeId, GraphNode> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let node = GraphNode {
                    id: n.id.clone(),
                    name: if n.name.is_empty() { n.id.to_string() } else { n.name.clone() },
                    node_type: n.node_type.clone(),
                    weight: weights[i],
                    dependencies: ids(&dependencies[i]),
                    dependents: ids(&dependents[i]),
                    level: level_of[i],
                };
                (n.id.clone(), node)
            })
            .collect();

        let execution_order: Vec<Vec<NodeId>> = levels
            .iter()
            .map(|level| level.iter().map(|idx| nodes[idx.index()].id.clone()).collect())
            .collect();

        let max_parallelism = execution_order.iter().map(Vec::len).max().unwrap_or(0);

        tracing::debug!(
            nodes = nodes.len(),
            levels = execution_order.len(),
            max_parallelism,
            critical_path_weight,
            "Graph analyzed"
        );

        Ok(ExecutionGraph {
            nodes: graph_nodes,
            edges: edges
                .iter()
                .map(|(s, t)| Edge::new(nodes[s.index()].id.clone(), nodes[t.index()].id.clone()))
                .collect(),
            total_weight: weights.iter().sum(),
            critical_path: ids(&critical_path),
            critical_path_weight,
            max_parallelism,
            execution_order,
        })
    }

    /// Build the dependency graph. Node `i` of the input is `NodeIndex(i)`.
    /// Returns the graph and the de-duplicated edge list in input order.
    fn build_graph(
        &self,
        nodes: &[NodeDefinition],
        edges: &[Edge],
    ) -> Result<(DiGraph<NodeId, ()>, Vec<(NodeIndex, NodeIndex)>), ConductorError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_to_index = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let idx = graph.add_node(node.id.clone());
            if node_to_index.insert(node.id.clone(), idx).is_some() {
                return Err(ConductorError::Validation(format!("duplicate node id: {}", node.id)));
            }
        }

        let mut seen = HashSet::new();
        let mut unique_edges = Vec::with_capacity(edges.len());
        for edge in edges {
            let from = *node_to_index.get(&edge.source).ok_or_else(|| {
                ConductorError::Validation(format!("edge source not found: {}", edge.source))
            })?;
            let to = *node_to_index.get(&edge.target).ok_or_else(|| {
                ConductorError::Validation(format!("edge target not found: {}", edge.target))
            })?;
            if seen.insert((from, to)) {
                graph.add_edge(from, to, ());
                unique_edges.push((from, to));
            }
        }

        Ok((graph, unique_edges))
    }
}

/// Kahn's algorithm, one level per round. Anything left unleveled sits on a cycle.
fn topological_levels(
    graph: &DiGraph<NodeId, ()>,
    nodes: &[NodeDefinition],
) -> Result<Vec<Vec<NodeIndex>>, ConductorError> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut levels = Vec::new();
    let mut placed = 0;
    let mut current: Vec<NodeIndex> = graph.node_indices().filter(|idx| in_degree[idx.index()] == 0).collect();

    while !current.is_empty() {
        let mut next = Vec::new();
        for idx in &current {
            for dependent in graph.neighbors_directed(*idx, Direction::Outgoing) {
                in_degree[dependent.index()] -= 1;
                if in_degree[dependent.index()] == 0 {
                    next.push(dependent);
                }
            }
        }
        next.sort_by_key(|idx| idx.index());
        placed += current.len();
        levels.push(std::mem::replace(&mut current, next));
    }

    if placed < graph.node_count() {
        let remaining: Vec<NodeId> = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] > 0)
            .map(|idx| nodes[idx.index()].id.clone())
            .collect();
        tracing::warn!(?remaining, "Cycle detected during analysis");
        return Err(ConductorError::CycleDetected { remaining });
    }

    Ok(levels)
}

/// Longest weighted path, relaxing edges in topological order
fn critical_path(order: &[usize], dependents: &[Vec<usize>], weights: &[f64]) -> (Vec<usize>, f64) {
    let mut distance: Vec<f64> = weights.to_vec();
    let mut path: Vec<Vec<usize>> = (0..weights.len()).map(|i| vec![i]).collect();

    for &u in order {
        for &v in &dependents[u] {
            if distance[u] + weights[v] > distance[v] {
                distance[v] = distance[u] + weights[v];
                let mut extended = path[u].clone();
                extended.push(v);
                path[v] = extended;
            }
        }
    }

    let mut best: Option<usize> = None;
    for &i in order {
        if best.map_or(true, |b| distance[i] > distance[b]) {
            best = Some(i);
        }
    }

    match best {
        Some(end) => (std::mem::take(&mut path[end]), distance[end]),
        None => (Vec::new(), 0.0),
    }
}
