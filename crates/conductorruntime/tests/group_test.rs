// crates/conductorruntime/tests/group_test.rs

use conductorcore::{ConductorError, ExecutableRegistry, NodeDefinition, NodeError, NodeId, NodeState, Params};
use conductorruntime::{
    ExecutionConfig, FailurePolicy, FnExecutable, GraphAnalyzer, GroupExecutor, NodeRegistry, ProgressConfig,
    StoreHandle,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

type Journal = Arc<Mutex<Vec<String>>>;

/// Registry with:
/// - `ok`: logs its id, sleeps `sleep_ms`, returns `{ "id": .. }`
/// - `fail`: logs its id and fails
/// - `echo_upstream`: returns whatever arrived under `upstream`
fn registry(journal: &Journal) -> Arc<dyn ExecutableRegistry> {
    let mut registry = NodeRegistry::new();

    let log = journal.clone();
    registry.register(Arc::new(FnExecutable::new("ok", move |ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(format!("start {}", ctx.node_id));
            let sleep_ms = ctx.params.get("sleep_ms").and_then(|v| v.as_u64()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            log.lock().unwrap().push(format!("end {}", ctx.node_id));
            Ok(json!({ "id": ctx.node_id.as_str() }))
        }
    })));

    let log = journal.clone();
    registry.register(Arc::new(FnExecutable::new("fail", move |ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(format!("start {}", ctx.node_id));
            Err(NodeError::ExecutionFailed(format!("{} exploded", ctx.node_id)))
        }
    })));

    registry.register(Arc::new(FnExecutable::new("echo_upstream", |ctx| async move {
        Ok(ctx.params.get("upstream").cloned().unwrap_or(json!(null)))
    })));

    Arc::new(registry)
}

fn executor(journal: &Journal) -> GroupExecutor {
    GroupExecutor::new(GraphAnalyzer::default(), Some(registry(journal)), StoreHandle::new())
}

fn sequential() -> ExecutionConfig {
    ExecutionConfig::default().with_progress(ProgressConfig::disabled())
}

fn parallel() -> ExecutionConfig {
    ExecutionConfig::parallel().with_progress(ProgressConfig::disabled())
}

fn ids(list: &[&str]) -> Vec<NodeId> {
    list.iter().map(|id| NodeId::from(*id)).collect()
}

/// a, b -> c ; b -> d  (a fails when `fail_a`)
fn diamond(fail_a: bool) -> NodeDefinition {
    NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("a", if fail_a { "fail" } else { "ok" }))
        .with_child(NodeDefinition::new("b", "ok").with_param("sleep_ms", 100))
        .with_child(NodeDefinition::new("c", "ok"))
        .with_child(NodeDefinition::new("d", "ok"))
        .with_edge("a", "c")
        .with_edge("b", "c")
        .with_edge("b", "d")
}

#[tokio::test]
async fn test_sequential_runs_one_node_at_a_time() {
    init_tracing();
    tokio::time::pause();
    let journal = Journal::default();
    let group = executor(&journal);

    let outcome = group
        .execute_group(&diamond(false), Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.result.success);
    assert_eq!(outcome.result.executed_nodes, ids(&["a", "b", "c", "d"]));
    assert_eq!(
        *journal.lock().unwrap(),
        vec!["start a", "end a", "start b", "end b", "start c", "end c", "start d", "end d"]
    );
    assert_eq!(outcome.metadata.child_nodes_executed, 4);
    assert_eq!(outcome.metadata.node_id, NodeId::from("flow"));
    assert_eq!(outcome.metadata.node_type, "group");
    assert!(outcome.metadata.failed_node.is_none());
    assert_eq!(group.store().cached_progress(), 100.0);

    let data = outcome.result.data.unwrap();
    assert_eq!(data["d"], json!({ "id": "d" }));
}

#[tokio::test]
async fn test_parallel_level_is_joined_before_next_level() {
    tokio::time::pause();
    let journal = Journal::default();
    let group = executor(&journal);

    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("slow", "ok").with_param("sleep_ms", 300))
        .with_child(NodeDefinition::new("fast", "ok").with_param("sleep_ms", 100))
        .with_child(NodeDefinition::new("after", "ok"))
        .with_edge("fast", "after");

    let started = tokio::time::Instant::now();
    let outcome = group
        .execute_group(&flow, Params::new(), &parallel(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.result.success);
    assert!(started.elapsed() < Duration::from_millis(400), "siblings run concurrently");

    let journal = journal.lock().unwrap();
    let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
    assert!(position("start fast") < position("end slow"));
    assert!(
        position("end slow") < position("start after"),
        "level 1 waits for every level 0 node"
    );
}

#[tokio::test]
async fn test_fail_fast_lets_siblings_finish_then_halts() {
    tokio::time::pause();
    let journal = Journal::default();
    let group = executor(&journal);

    let outcome = group
        .execute_group(&diamond(true), Params::new(), &parallel(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.metadata.failed_node, Some(NodeId::from("a")));
    assert_eq!(outcome.result.executed_nodes, ids(&["a", "b"]));
    assert!(outcome.result.error.unwrap().message.contains("a exploded"));

    let store = group.store();
    assert_eq!(store.node_state(&"a".into()), Some(NodeState::Error));
    assert_eq!(store.node_state(&"b".into()), Some(NodeState::Completed), "sibling finished");
    assert_eq!(store.node_state(&"c".into()), Some(NodeState::Pending));
    assert_eq!(store.node_state(&"d".into()), Some(NodeState::Pending));
}

#[tokio::test]
async fn test_continue_policy_skips_only_dependents_of_failures() {
    tokio::time::pause();
    let journal = Journal::default();
    let group = executor(&journal);
    let config = parallel().with_failure_policy(FailurePolicy::Continue);

    let outcome = group
        .execute_group(&diamond(true), Params::new(), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.result.success, "a failure still fails the run");
    assert_eq!(outcome.metadata.failed_node, Some(NodeId::from("a")));

    let store = group.store();
    assert_eq!(store.node_state(&"c".into()), Some(NodeState::Skipped));
    assert_eq!(store.node_state(&"d".into()), Some(NodeState::Completed));
    assert!(!journal.lock().unwrap().iter().any(|e| e == "start c"));
    assert_eq!(store.cached_progress().round(), 75.0, "skipped work counts toward progress");
    assert!(store.read(|s| s.is_finished()));
}

#[tokio::test]
async fn test_dependents_receive_upstream_outputs() {
    let journal = Journal::default();
    let group = executor(&journal);

    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("x", "ok"))
        .with_child(NodeDefinition::new("y", "ok"))
        .with_child(NodeDefinition::new("sink", "echo_upstream"))
        .with_edge("x", "sink")
        .with_edge("y", "sink");

    let outcome = group
        .execute_group(&flow, Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();

    let data = outcome.result.data.unwrap();
    assert_eq!(data["sink"], json!({ "x": { "id": "x" }, "y": { "id": "y" } }));
}

#[tokio::test]
async fn test_single_node_returns_its_own_output() {
    let journal = Journal::default();
    let group = executor(&journal);

    let outcome = group
        .execute_group(&NodeDefinition::new("solo", "ok"), Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.data, Some(json!({ "id": "solo" })));
    assert_eq!(outcome.result.executed_nodes, ids(&["solo"]));
}

#[tokio::test]
async fn test_cancelled_before_start_runs_nothing() {
    let journal = Journal::default();
    let group = executor(&journal);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = group
        .execute_group(&diamond(false), Params::new(), &parallel(), &cancel)
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.error.unwrap().code.as_deref(), Some("CANCELLED"));
    assert!(outcome.result.executed_nodes.is_empty());
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_sequential_walk() {
    let cancel = CancellationToken::new();
    let mut registry = NodeRegistry::new();
    let trigger = cancel.clone();
    registry.register(Arc::new(FnExecutable::new("cancel_run", move |_| {
        let trigger = trigger.clone();
        async move {
            trigger.cancel();
            Ok(json!("done"))
        }
    })));
    registry.register(Arc::new(FnExecutable::new("never", |_| async {
        Err(NodeError::ExecutionFailed("should not run".into()))
    })));
    let group = GroupExecutor::new(GraphAnalyzer::default(), Some(Arc::new(registry)), StoreHandle::new());

    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("first", "cancel_run"))
        .with_child(NodeDefinition::new("second", "never"));

    let outcome = group
        .execute_group(&flow, Params::new(), &sequential(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.result.executed_nodes, ids(&["first"]));
    assert_eq!(outcome.result.error.unwrap().code.as_deref(), Some("CANCELLED"));
    assert_eq!(group.store().node_state(&"second".into()), Some(NodeState::Pending));
}

#[tokio::test]
async fn test_cycles_fail_analysis() {
    let journal = Journal::default();
    let group = executor(&journal);
    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("a", "ok"))
        .with_child(NodeDefinition::new("b", "ok"))
        .with_edge("a", "b")
        .with_edge("b", "a");

    let result = group
        .execute_group(&flow, Params::new(), &sequential(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ConductorError::CycleDetected { .. })));
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_nested_group_runs_its_children() {
    init_tracing();
    let journal = Journal::default();
    let group = executor(&journal);

    let inner = NodeDefinition::new("inner", "group")
        .with_child(NodeDefinition::new("x", "ok"))
        .with_child(NodeDefinition::new("y", "ok"))
        .with_edge("x", "y");
    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("pre", "ok"))
        .with_child(inner)
        .with_child(NodeDefinition::new("post", "echo_upstream"))
        .with_edge("pre", "inner")
        .with_edge("inner", "post");

    let outcome = group
        .execute_group(&flow, Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.result.success, "nested run failed: {:?}", outcome.result.error);
    assert_eq!(outcome.result.executed_nodes, ids(&["pre", "x", "y", "post"]));
    assert_eq!(outcome.metadata.child_nodes_executed, 4);

    let data = outcome.result.data.unwrap();
    let inner_data = json!({ "x": { "id": "x" }, "y": { "id": "y" } });
    assert_eq!(data["inner"], inner_data);
    assert_eq!(data["post"], json!({ "inner": inner_data }));

    let store = group.store();
    assert_eq!(store.node_state(&"inner".into()), Some(NodeState::Completed));
    assert_eq!(store.node_progress(&"inner".into()), Some(100.0));
    assert_eq!(store.cached_progress().round(), 100.0);
}

#[tokio::test]
async fn test_nested_group_failure_fails_parent() {
    let journal = Journal::default();
    let group = executor(&journal);

    let flow = NodeDefinition::new("flow", "group")
        .with_child(
            NodeDefinition::new("inner", "group")
                .with_child(NodeDefinition::new("boom", "fail"))
                .with_child(NodeDefinition::new("after_boom", "ok"))
                .with_edge("boom", "after_boom"),
        )
        .with_child(NodeDefinition::new("post", "ok"))
        .with_edge("inner", "post");

    let outcome = group
        .execute_group(&flow, Params::new(), &parallel(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.metadata.failed_node, Some(NodeId::from("inner")));
    let error = outcome.result.error.unwrap();
    assert_eq!(error.node_id, NodeId::from("boom"));
    assert_eq!(error.code.as_deref(), Some("NODE_RUNTIME_ERROR"));
    assert_eq!(outcome.result.executed_nodes, ids(&["boom"]));

    let store = group.store();
    assert_eq!(store.node_state(&"inner".into()), Some(NodeState::Error));
    assert_eq!(store.node_state(&"post".into()), Some(NodeState::Pending));
    assert!(!journal.lock().unwrap().iter().any(|e| e == "start after_boom"));
}

#[tokio::test]
async fn test_empty_groups_succeed_without_a_registry_lookup() {
    let journal = Journal::default();
    let group = executor(&journal);

    let outcome = group
        .execute_group(&NodeDefinition::new("nothing", "group"), Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.result.success);
    assert_eq!(outcome.result.data, Some(json!({})));

    let group = executor(&journal);
    let flow = NodeDefinition::new("flow", "group")
        .with_child(NodeDefinition::new("empty", "group"))
        .with_child(NodeDefinition::new("after", "ok"))
        .with_edge("empty", "after");

    let outcome = group
        .execute_group(&flow, Params::new(), &sequential(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.result.success, "empty child group failed: {:?}", outcome.result.error);
    assert_eq!(outcome.result.data.unwrap()["empty"], json!({}));
    assert_eq!(outcome.result.executed_nodes, ids(&["after"]));
}
