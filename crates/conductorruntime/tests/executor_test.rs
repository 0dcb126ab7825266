// crates/conductorruntime/tests/executor_test.rs

use conductorcore::{ExecutableRegistry, NodeDefinition, NodeError, NodeId, NodeState, Params};
use conductorruntime::{
    ExecutionConfig, FnExecutable, GraphAnalyzer, NodeExecutor, NodeRegistry, ProgressConfig, StoreHandle,
};
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn quiet() -> ExecutionConfig {
    ExecutionConfig::default().with_progress(ProgressConfig::disabled())
}

/// Executor plus a store initialized for `node`
fn setup(registry: Option<NodeRegistry>, node: &NodeDefinition) -> NodeExecutor {
    let store = StoreHandle::new();
    store.initialize(&GraphAnalyzer::default().analyze_definition(node).unwrap());
    let registry = registry.map(|r| Arc::new(r) as Arc<dyn ExecutableRegistry>);
    NodeExecutor::new(registry, store)
}

fn registry_with(executable: FnExecutable) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(executable));
    registry
}

#[tokio::test]
async fn test_missing_registry_is_a_result_not_a_panic() {
    let node = NodeDefinition::new("a", "anything");
    let executor = setup(None, &node);

    let result = executor
        .execute_local(&node, Params::new(), Instant::now(), &quiet(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_ref().unwrap().code.as_deref(), Some("NO_EXECUTOR_FACTORY"));
    assert_eq!(result.executed_nodes, vec![NodeId::from("a")]);
    assert_eq!(executor.store().node_state(&"a".into()), Some(NodeState::Error));
}

#[tokio::test]
async fn test_unknown_type_reports_node_type_not_found() {
    let node = NodeDefinition::new("a", "missing.type");
    let registry = registry_with(FnExecutable::new("other", |_| async { Ok(json!(null)) }));
    let executor = setup(Some(registry), &node);

    let result = executor
        .execute_local(&node, Params::new(), Instant::now(), &quiet(), &CancellationToken::new())
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.code.as_deref(), Some("NODE_TYPE_NOT_FOUND"));
    assert!(error.message.contains("missing.type"));
}

#[tokio::test]
async fn test_params_merge_context_under_parameters() {
    let node = NodeDefinition::new("a", "echo")
        .with_param("shared", "from node")
        .with_param("own", 1);
    let registry = registry_with(FnExecutable::new("echo", |ctx| async move {
        Ok(serde_json::Value::Object(ctx.params))
    }));
    let executor = setup(Some(registry), &node);

    let mut context = Params::new();
    context.insert("shared".into(), json!("from context"));
    context.insert("extra".into(), json!(true));

    let result = executor
        .execute_local(&node, context, Instant::now(), &quiet(), &CancellationToken::new())
        .await;

    assert!(result.success);
    assert_eq!(
        result.data.unwrap(),
        json!({ "shared": "from node", "own": 1, "extra": true })
    );
    assert_eq!(executor.store().node_state(&"a".into()), Some(NodeState::Completed));
}

#[tokio::test]
async fn test_retries_with_exponential_backoff() {
    tokio::time::pause();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();

    let node = NodeDefinition::new("flaky", "flaky");
    let registry = registry_with(FnExecutable::new("flaky", move |_| {
        let seen = seen.clone();
        async move {
            let mut calls = seen.lock().unwrap();
            calls.push(tokio::time::Instant::now());
            if calls.len() < 3 {
                Err(NodeError::ExecutionFailed(format!("attempt {} failed", calls.len())))
            } else {
                Ok(json!("third time lucky"))
            }
        }
    }));
    let executor = setup(Some(registry), &node);

    let result = executor
        .execute_local(
            &node,
            Params::new(),
            Instant::now(),
            &quiet().with_retries(2),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success, "third attempt should succeed: {:?}", result.error);
    assert_eq!(result.data, Some(json!("third time lucky")));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3, "exactly three invocations");
    let first_gap = calls[1] - calls[0];
    let second_gap = calls[2] - calls[1];
    assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
    assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));
}

#[tokio::test]
async fn test_exhausted_retries_keep_last_error() {
    tokio::time::pause();
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let node = NodeDefinition::new("bad", "bad");
    let registry = registry_with(FnExecutable::new("bad", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err(NodeError::ExecutionFailed(format!("failure {}", n))) }
    }));
    let executor = setup(Some(registry), &node);

    let result = executor
        .execute_local(
            &node,
            Params::new(),
            Instant::now(),
            &quiet().with_retries(1),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let error = result.error.unwrap();
    assert_eq!(error.node_id, NodeId::from("bad"));
    assert!(error.message.contains("failure 2"));
    assert!(error.stack.is_some());
    let stored = executor.store().read(|s| s.node(&"bad".into()).unwrap().error.clone());
    assert_eq!(stored.as_deref(), Some(error.message.as_str()));
}

#[tokio::test]
async fn test_attempt_timeout_counts_as_failure() {
    tokio::time::pause();
    let node = NodeDefinition::new("stuck", "stuck");
    let registry = registry_with(FnExecutable::new("stuck", |_| async {
        std::future::pending::<()>().await;
        Ok(json!(null))
    }));
    let executor = setup(Some(registry), &node);

    let started = tokio::time::Instant::now();
    let result = executor
        .execute_local(
            &node,
            Params::new(),
            Instant::now(),
            &quiet().with_timeout_ms(50),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code.as_deref(), Some("EXECUTION_TIMEOUT"));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(executor.store().node_state(&"stuck".into()), Some(NodeState::Error));
}

#[tokio::test]
async fn test_cancellation_interrupts_backoff() {
    tokio::time::pause();
    let node = NodeDefinition::new("bad", "bad");
    let registry = registry_with(FnExecutable::new("bad", |_| async {
        Err(NodeError::ExecutionFailed("nope".into()))
    }));
    let executor = setup(Some(registry), &node);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let result = executor
        .execute_local(&node, Params::new(), Instant::now(), &quiet().with_retries(5), &cancel)
        .await;

    assert_eq!(result.error.unwrap().code.as_deref(), Some("CANCELLED"));
}
