// tests/integration/control.rs

use std::time::Duration;

use flowdag::engine::ExecutorHandle;
use flowdag::errors::FlowdagError;
use flowdag::store::StateStore;
use flowdag::types::WorkflowStatus;
use flowdag_test_utils::builders::{WORK, diamond, fast_options, graph};
use flowdag_test_utils::fake_capability::{InvocationLog, ScriptedCapability};
use flowdag_test_utils::{init_tracing, with_timeout};

use crate::support::{WORKFLOW_ID, executor};

async fn wait_for<F>(handle: &ExecutorHandle, mut done: F)
where
    F: FnMut(&ExecutorHandle) -> bool,
{
    while !done(handle) {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn cancel_stops_running_tasks() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).latency(Duration::from_secs(30));
    let (executor, store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();
    let run = tokio::spawn(executor.execute());

    with_timeout(wait_for(&handle, |h| !h.snapshot().active_tasks.is_empty())).await;
    handle.cancel().unwrap();

    let state = with_timeout(run).await.unwrap().expect("cancel is not an error");
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(state.active_tasks.is_empty());
    assert!(state.completed_results.is_empty());
    assert_eq!(log.started(), vec!["A"]);

    let persisted = store.load(WORKFLOW_ID).unwrap().unwrap();
    assert_eq!(persisted.status, WorkflowStatus::Cancelled);

    // Terminal now; every control operation is rejected.
    assert!(matches!(handle.cancel(), Err(FlowdagError::InvalidOperation(_))));
    assert!(matches!(handle.pause(), Err(FlowdagError::InvalidOperation(_))));
    assert!(matches!(handle.resume(), Err(FlowdagError::InvalidOperation(_))));
}

#[tokio::test]
async fn cancel_aborts_tasks_that_ignore_cancellation() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).hang("A");
    let (executor, _store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();
    let run = tokio::spawn(executor.execute());

    with_timeout(wait_for(&handle, |_| log.attempts("A") == 1)).await;
    handle.cancel().unwrap();

    let state = with_timeout(run).await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn pause_interrupts_running_tasks_and_resume_reruns_them() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).latency(Duration::from_millis(300));
    let (executor, _store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();
    let run = tokio::spawn(executor.execute());

    with_timeout(wait_for(&handle, |_| log.attempts("A") == 1)).await;
    handle.pause().unwrap();
    with_timeout(wait_for(&handle, |h| h.status() == WorkflowStatus::Paused)).await;

    let paused = handle.snapshot();
    assert!(paused.active_tasks.is_empty());
    assert!(paused.pending_tasks.contains("A"));
    assert!(matches!(handle.pause(), Err(FlowdagError::InvalidOperation(_))));

    handle.resume().unwrap();
    let state = with_timeout(run).await.unwrap().unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(log.attempts("A"), 2);
    assert_eq!(state.completed_results.len(), 4);
}

#[tokio::test]
async fn pause_aborts_tasks_that_ignore_cancellation_after_grace() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone()).hang("A");
    let (executor, _store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();
    let run = tokio::spawn(executor.execute());

    with_timeout(wait_for(&handle, |_| log.attempts("A") == 1)).await;
    handle.pause().unwrap();
    with_timeout(wait_for(&handle, |h| h.status() == WorkflowStatus::Paused)).await;

    let paused = handle.snapshot();
    assert!(paused.active_tasks.is_empty());
    assert!(paused.pending_tasks.contains("A"));

    handle.cancel().unwrap();
    let state = with_timeout(run).await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn resume_without_pause_is_rejected() {
    init_tracing();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone());
    let (executor, _store) = executor(diamond(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();

    assert!(matches!(handle.resume(), Err(FlowdagError::InvalidOperation(_))));
}

#[tokio::test]
async fn pause_then_resume_before_dispatch_matches_an_uninterrupted_run() {
    init_tracing();

    let five = || graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b"]), ("e", &["c", "d"])]);

    let baseline_log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, baseline_log.clone());
    let (baseline, _store) = executor(five(), vec![cap.into_arc()], fast_options(2));
    let baseline = with_timeout(baseline.execute()).await.unwrap();

    let log = InvocationLog::new();
    let cap = ScriptedCapability::new(WORK, log.clone());
    let (executor, _store) = executor(five(), vec![cap.into_arc()], fast_options(2));
    let handle = executor.handle();
    assert_eq!(handle.snapshot().pending_tasks.len(), 5);
    assert!(handle.snapshot().active_tasks.is_empty());

    handle.pause().unwrap();
    handle.resume().unwrap();
    let state = with_timeout(executor.execute()).await.unwrap();

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.shared_context, baseline.shared_context);
    assert_eq!(log.started().len(), 5);
}
