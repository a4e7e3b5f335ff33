// tests/integration/executor_scenarios.rs

use std::time::Duration;

use flowdag::dag::TaskGraph;
use flowdag::errors::FlowdagError;
use flowdag::store::StateStore;
use flowdag::types::WorkflowStatus;
use flowdag_test_utils::builders::{TaskBuilder, WORK, diamond, fast_options, graph};
use flowdag_test_utils::fake_capability::{InvocationLog, ScriptedCapability};
use flowdag_test_utils::{init_tracing, with_timeout};

use crate::support::{WORKFLOW_ID, executor};

fn before(log: &InvocationLog, finished: &str, started: &str) -> bool {
    match (log.finished_at(finished), log.started_at(started)) {
        (Some(f), Some(s)) => f < s,
        _ => false,
    }
}

#[tokio::test]
async fn diamond_runs_in_dependency_order_with_bounded_parallelism() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).latency(Duration::from_millis(20));
    let (executor, store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));

    let state = with_timeout(executor.execute()).await.expect("diamond completes");

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.progress_percentage, 100.0);
    assert_eq!(state.completed_results.len(), 4);
    assert!(state.completed_at.is_some());
    assert!(!state.metadata.contains_key("partial"));

    assert_eq!(log.started()[0], "A");
    assert!(before(&log, "A", "B"));
    assert!(before(&log, "A", "C"));
    assert!(before(&log, "B", "D"));
    assert!(before(&log, "C", "D"));
    assert_eq!(log.max_concurrent(), 2);

    // D sees both upstream outputs.
    let d_input = log.last_input("D").expect("D ran");
    assert_eq!(d_input["dependencies"]["B"]["content"], "B done");
    assert_eq!(d_input["dependencies"]["C"]["content"], "C done");

    let persisted = store.load(WORKFLOW_ID).unwrap().expect("state persisted");
    assert_eq!(persisted.status, WorkflowStatus::Completed);
    assert!(store.get_shared(WORKFLOW_ID, "output_D").unwrap().is_some());
}

#[tokio::test]
async fn single_slot_runs_tasks_one_at_a_time() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone());
    let (executor, _store) = executor(diamond(), vec![cap.into_arc()], fast_options(1));

    let state = with_timeout(executor.execute()).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(log.max_concurrent(), 1);
    assert_eq!(log.started(), vec!["A", "B", "C", "D"]);
}

#[tokio::test]
async fn higher_priority_ready_task_starts_first() {
    init_tracing();

    let g = TaskGraph::new(vec![
        TaskBuilder::new("low").priority(2).build(),
        TaskBuilder::new("high").priority(8).build(),
        TaskBuilder::new("mid").priority(5).build(),
    ])
    .unwrap();
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone());
    let (executor, _store) = executor(g, vec![cap.into_arc()], fast_options(1));

    with_timeout(executor.execute()).await.unwrap();

    assert_eq!(log.started(), vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn non_critical_failure_completes_partially_and_blocks_dependents() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).always_fail("B");
    let (executor, store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));

    let state = with_timeout(executor.execute()).await.expect("non-critical failure still completes");

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.metadata.get("partial"), Some(&serde_json::Value::Bool(true)));
    assert!(state.completed_results.contains_key("A"));
    assert!(state.completed_results.contains_key("C"));
    assert!(state.failed_tasks.contains_key("B"));
    assert!(state.blocked_tasks.contains("D"));
    assert_eq!(state.failed_and_blocked(), vec!["B", "D"]);

    // Three attempts for B, none for D.
    assert_eq!(log.attempts("B"), 3);
    assert_eq!(log.attempts("D"), 0);

    let counts = state.counts();
    assert_eq!(counts.completed, 2);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.blocked, 1);
    assert_eq!(counts.pending, 0);

    let persisted = store.load(WORKFLOW_ID).unwrap().unwrap();
    assert_eq!(persisted, state);
}

#[tokio::test]
async fn critical_failure_fails_the_workflow() {
    init_tracing();

    let g = TaskGraph::new(vec![
        TaskBuilder::new("A").build(),
        TaskBuilder::new("B").after("A").priority(9).max_retries(1).build(),
        TaskBuilder::new("C").after("A").build(),
        TaskBuilder::new("D").after("B").after("C").build(),
    ])
    .unwrap();
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).always_fail("B");
    let (executor, store) = executor(g, vec![cap.into_arc()], fast_options(2));

    let err = with_timeout(executor.execute()).await.unwrap_err();

    match err {
        FlowdagError::WorkflowExecution {
            workflow_id,
            task,
            unreachable,
        } => {
            assert_eq!(workflow_id, WORKFLOW_ID);
            assert_eq!(task, "B");
            assert_eq!(unreachable, vec!["D"]);
        }
        other => panic!("expected WorkflowExecution, got {other:?}"),
    }
    assert_eq!(log.attempts("B"), 1);

    let persisted = store.load(WORKFLOW_ID).unwrap().unwrap();
    assert_eq!(persisted.status, WorkflowStatus::Failed);
    assert!(persisted.error.as_deref().unwrap_or("").contains("'B'"));
    assert!(persisted.completed_at.is_some());
}

#[tokio::test]
async fn blocked_critical_task_fails_the_workflow() {
    init_tracing();

    let g = TaskGraph::new(vec![
        TaskBuilder::new("A").build(),
        TaskBuilder::new("B").after("A").max_retries(1).build(),
        TaskBuilder::new("C").after("B").priority(10).build(),
    ])
    .unwrap();
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).always_fail("B");
    let (executor, _store) = executor(g, vec![cap.into_arc()], fast_options(2));

    let err = with_timeout(executor.execute()).await.unwrap_err();

    assert!(matches!(
        err,
        FlowdagError::WorkflowExecution { ref task, .. } if task == "C"
    ));
    assert_eq!(log.attempts("C"), 0);
}

#[tokio::test]
async fn missing_capability_fails_the_workflow() {
    init_tracing();

    let g = TaskGraph::new(vec![
        TaskBuilder::new("A").build(),
        TaskBuilder::new("B").after("A").capability("translator").build(),
    ])
    .unwrap();
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone());
    let (executor, store) = executor(g, vec![cap.into_arc()], fast_options(2));

    let err = with_timeout(executor.execute()).await.unwrap_err();

    assert!(matches!(err, FlowdagError::CapabilityNotFound(ref name) if name == "translator"));
    let persisted = store.load(WORKFLOW_ID).unwrap().unwrap();
    assert_eq!(persisted.status, WorkflowStatus::Failed);
    assert!(persisted.failed_tasks.contains_key("B"));
    assert!(persisted.completed_results.contains_key("A"));
}

#[tokio::test]
async fn independent_tasks_fill_every_slot() {
    init_tracing();

    let g = graph(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[]), ("e", &[])]);
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).latency(Duration::from_millis(30));
    let (executor, _store) = executor(g, vec![cap.into_arc()], fast_options(3));

    let state = with_timeout(executor.execute()).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(log.max_concurrent(), 3);
    assert_eq!(log.started().len(), 5);
}

#[tokio::test]
async fn unbounded_parallelism_setting_runs_everything_at_once() {
    init_tracing();

    let g = graph(&[("a", &[]), ("b", &[]), ("c", &[]), ("d", &["a"])]);
    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).latency(Duration::from_millis(20));
    let (executor, _store) = executor(g, vec![cap.into_arc()], fast_options(usize::MAX));

    let state = with_timeout(executor.execute()).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(log.max_concurrent(), 3);
}
