// crates/conductorruntime/tests/store_test.rs

use conductorcore::{ConductorError, ConductorEvent, Edge, EventBus, NodeDefinition, NodeId, NodeState};
use conductorruntime::{ExecutionStore, GraphAnalyzer, NodeWeights, StoreHandle};

fn chain_graph(count: usize) -> conductorcore::ExecutionGraph {
    let nodes: Vec<NodeDefinition> = (0..count)
        .map(|i| NodeDefinition::new(format!("n{}", i), "test.node"))
        .collect();
    GraphAnalyzer::new(NodeWeights::uniform(10.0))
        .analyze(&nodes, &[])
        .unwrap()
}

fn complete(store: &mut ExecutionStore, id: &NodeId) {
    store.set_node_state(id, NodeState::Executing, None).unwrap();
    store.set_node_state(id, NodeState::Completed, None).unwrap();
}

#[test]
fn test_equal_weight_progress_tracks_completed_share() {
    for n in 1..=7usize {
        for k in 0..=n {
            let mut store = ExecutionStore::new();
            store.initialize(&chain_graph(n));
            for i in 0..k {
                complete(&mut store, &NodeId::from(format!("n{}", i)));
            }
            let expected = (100.0 * k as f64 / n as f64).round();
            assert_eq!(store.cached_progress().round(), expected, "{} of {}", k, n);
        }
    }
}

#[test]
fn test_progress_is_weighted_by_node_weight() {
    let graph = GraphAnalyzer::new(NodeWeights::uniform(10.0).with_weight("heavy", 30.0))
        .analyze(
            &[
                NodeDefinition::new("light", "test.node"),
                NodeDefinition::new("heavy", "heavy"),
            ],
            &[],
        )
        .unwrap();
    let mut store = ExecutionStore::new();
    store.initialize(&graph);

    let heavy = NodeId::from("heavy");
    store.set_node_state(&heavy, NodeState::Executing, None).unwrap();
    store.set_node_progress(&heavy, 50.0, "half").unwrap();
    assert_eq!(store.cached_progress(), 37.5);
}

#[test]
fn test_illegal_transitions_are_rejected() {
    let mut store = ExecutionStore::new();
    store.initialize(&chain_graph(1));
    let id = NodeId::from("n0");

    let err = store.set_node_state(&id, NodeState::Completed, None).unwrap_err();
    assert!(matches!(err, ConductorError::InvalidTransition { .. }));

    complete(&mut store, &id);
    let err = store.set_node_state(&id, NodeState::Executing, None).unwrap_err();
    assert!(matches!(err, ConductorError::InvalidTransition { .. }), "terminal states are final");

    let unknown = store.set_node_state(&"ghost".into(), NodeState::Executing, None);
    assert!(matches!(unknown, Err(ConductorError::UnknownNode(_))));
}

#[test]
fn test_progress_only_moves_forward_while_executing() {
    let mut store = ExecutionStore::new();
    store.initialize(&chain_graph(1));
    let id = NodeId::from("n0");

    let err = store.set_node_progress(&id, 10.0, "early").unwrap_err();
    assert!(matches!(err, ConductorError::NotExecuting { .. }));

    store.set_node_state(&id, NodeState::Executing, None).unwrap();
    store.set_node_progress(&id, 40.0, "a").unwrap();
    store.set_node_progress(&id, 40.0, "same").unwrap();
    let err = store.set_node_progress(&id, 20.0, "back").unwrap_err();
    assert!(matches!(err, ConductorError::ProgressRegression { .. }));
    assert_eq!(store.node(&id).unwrap().progress, 40.0);

    store.set_node_progress(&id, 250.0, "over").unwrap();
    assert_eq!(store.node(&id).unwrap().progress, 100.0, "percent is clamped");
}

#[test]
fn test_non_finite_progress_is_rejected() {
    let mut store = ExecutionStore::new();
    store.initialize(&chain_graph(2));
    let id = NodeId::from("n0");
    store.set_node_state(&id, NodeState::Executing, None).unwrap();
    store.set_node_progress(&id, 30.0, "a").unwrap();

    for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let err = store.set_node_progress(&id, bad, "bad").unwrap_err();
        assert!(matches!(err, ConductorError::InvalidProgress { .. }));
        assert_eq!(err.code(), "INVALID_STATE");
    }

    assert_eq!(store.node(&id).unwrap().progress, 30.0);
    assert!((store.cached_progress() - 15.0).abs() < 1e-9);
    let err = store.set_node_progress(&id, 10.0, "back").unwrap_err();
    assert!(matches!(err, ConductorError::ProgressRegression { .. }));
}

#[test]
fn test_error_and_skip_bookkeeping() {
    let mut store = ExecutionStore::new();
    store.initialize(&chain_graph(3));
    let (a, b, c) = (NodeId::from("n0"), NodeId::from("n1"), NodeId::from("n2"));

    store.set_node_state(&a, NodeState::Executing, None).unwrap();
    store.set_node_state(&a, NodeState::Error, Some("boom".into())).unwrap();
    store.set_node_state(&b, NodeState::Executing, None).unwrap();
    store.set_node_state(&b, NodeState::Skipped, None).unwrap();

    assert_eq!(store.node(&a).unwrap().error.as_deref(), Some("boom"));
    assert!(store.node(&a).unwrap().end_time.is_some());
    assert_eq!(store.completed_weight(), 10.0, "skipped counts, errored does not");
    assert_eq!(store.nodes_by_state(NodeState::Pending), vec![c]);
    assert!(!store.is_finished());
}

#[test]
fn test_time_remaining_needs_completed_work() {
    let mut store = ExecutionStore::new();
    assert!(store.estimated_time_remaining().is_none());

    store.initialize(&chain_graph(2));
    let id = NodeId::from("n0");
    store.set_node_state(&id, NodeState::Executing, None).unwrap();
    assert!(store.estimated_time_remaining().is_none());

    std::thread::sleep(std::time::Duration::from_millis(5));
    store.set_node_state(&id, NodeState::Completed, None).unwrap();
    let remaining = store.estimated_time_remaining().unwrap();
    assert!(remaining > std::time::Duration::ZERO);
}

#[test]
fn test_reset_and_reinitialize() {
    let mut store = ExecutionStore::new();
    store.initialize(&chain_graph(2));
    complete(&mut store, &"n0".into());
    store.reset();
    assert!(store.graph().is_none());
    assert_eq!(store.cached_progress(), 0.0);

    store.initialize(&chain_graph(2));
    assert_eq!(store.node_state(&"n0".into()), Some(NodeState::Pending));
}

#[tokio::test]
async fn test_publishing_handle_emits_snapshots() {
    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let graph = GraphAnalyzer::new(NodeWeights::uniform(10.0))
        .analyze(
            &[NodeDefinition::new("a", "t"), NodeDefinition::new("b", "t")],
            &[Edge::new("a", "b")],
        )
        .unwrap();

    let store = StoreHandle::publishing(bus, "exec-7".into(), "root".into());
    store.initialize(&graph);
    store.set_node_state(&"a".into(), NodeState::Executing, None).unwrap();
    store.set_node_state(&"a".into(), NodeState::Completed, None).unwrap();

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        match event {
            ConductorEvent::Progress(progress) => last = Some(progress),
            other => panic!("unexpected event {:?}", other),
        }
    }
    let last = last.expect("mutations should publish");
    assert_eq!(last.execution_id.as_str(), "exec-7");
    assert_eq!(last.node_id.as_str(), "root");
    assert_eq!(last.progress, 50.0);
    assert_eq!(last.nodes.len(), 2);
    assert_eq!(last.nodes[0].state, NodeState::Completed);
    assert_eq!(last.graph.execution_order.len(), 2);
    assert_eq!(last.graph.edges, vec![Edge::new("a", "b")]);

    let rejected = store.set_node_progress(&"a".into(), 10.0, "late");
    assert!(rejected.is_err());
    assert!(events.try_recv().is_err(), "rejected mutations publish nothing");
}

#[test]
fn test_nested_store_reports_into_parent_node() {
    let parent = StoreHandle::new();
    parent.initialize(&chain_graph(1));
    let group = NodeId::from("n0");
    parent.set_node_state(&group, NodeState::Executing, None).unwrap();

    let nested = StoreHandle::nested(&parent, group.clone());
    nested.initialize(&chain_graph(4));
    nested.set_node_state(&"n0".into(), NodeState::Executing, None).unwrap();
    nested.set_node_state(&"n0".into(), NodeState::Completed, None).unwrap();
    assert_eq!(parent.node_progress(&group), Some(25.0));

    nested.set_node_state(&"n1".into(), NodeState::Executing, None).unwrap();
    nested.set_node_progress(&"n1".into(), 50.0, "half").unwrap();
    assert!((parent.node_progress(&group).unwrap() - 37.5).abs() < 1e-9);
    assert!((parent.cached_progress() - 37.5).abs() < 1e-9);

    // Parent still executing until the group settles
    assert_eq!(parent.node_state(&group), Some(NodeState::Executing));
}
