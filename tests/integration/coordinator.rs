// tests/integration/coordinator.rs

use std::sync::Arc;
use std::time::Duration;

use flowdag::config::TemplateCatalog;
use flowdag::coord::{Coordinator, CoordinatorSettings};
use flowdag::engine::WorkflowState;
use flowdag::errors::{FlowdagError, Result};
use flowdag::exec::CapabilityRegistry;
use flowdag::store::{MemoryStateStore, StateStore, open_store};
use flowdag::types::{StorageMode, WorkflowStatus};
use flowdag_test_utils::builders::{fast_options, request};
use flowdag_test_utils::fake_capability::{InvocationLog, ScriptedCapability};
use flowdag_test_utils::{init_tracing, with_timeout};
use serde_json::{Value, json};

const POLL: Duration = Duration::from_millis(5);

/// One scripted provider per capability the built-in catalog needs.
fn registry<F>(log: &Arc<InvocationLog>, script: F) -> Arc<CapabilityRegistry>
where
    F: Fn(ScriptedCapability) -> ScriptedCapability,
{
    let catalog = TemplateCatalog::builtin();
    let mut registry = CapabilityRegistry::new();
    for name in catalog.capabilities() {
        registry.register(script(ScriptedCapability::new(name, log.clone())).into_arc());
    }
    Arc::new(registry)
}

fn coordinator_with(registry: Arc<CapabilityRegistry>, store: Arc<dyn StateStore>) -> Coordinator {
    Coordinator::new(
        TemplateCatalog::builtin(),
        registry,
        store,
        CoordinatorSettings::default(),
        fast_options(3),
    )
}

fn coordinator(log: &Arc<InvocationLog>) -> Coordinator {
    coordinator_with(registry(log, |c| c), Arc::new(MemoryStateStore::new()))
}

async fn wait_until_idle(coord: &Coordinator) {
    while !coord.active_workflows().is_empty() {
        tokio::time::sleep(POLL).await;
    }
}

#[tokio::test]
async fn submitted_workflow_runs_to_an_assembled_document() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    let id = coord.submit(request("Rust ownership")).unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.progress_percentage, 100.0);
    assert_eq!(report.counts.completed, 8);
    assert!(report.failures.is_empty());

    let document = report.document.expect("completed report carries the document");
    assert_eq!(document.topic.as_deref(), Some("Rust ownership"));
    assert_eq!(document.sections.len(), 8);
    assert_eq!(document.sections[0].task_id, "research");
    assert_eq!(document.sections[7].task_id, "formatting");
    // "<task> done" is two words per section.
    assert_eq!(document.word_count, 16);
    assert!(!document.partial);

    // Assembly is pure; asking twice gives the same answer.
    let first = coord.assemble_result(&id).unwrap();
    let second = coord.assemble_result(&id).unwrap();
    assert_eq!(first, second);

    // Every task saw the request.
    let input = log.last_input("research").unwrap();
    assert_eq!(input["topic"], "Rust ownership");
    assert_eq!(input["key_points"], json!(["first point", "second point"]));
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_anything_runs() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    let short = coord.submit(request("ab"));
    assert!(matches!(short, Err(FlowdagError::Validation(_))));

    let no_points = coord.submit(flowdag::coord::WorkflowRequest::new("Valid topic", vec![]));
    assert!(matches!(no_points, Err(FlowdagError::Validation(_))));

    let bad_parallel =
        coord.submit(request("Valid topic").with_preference("maxParallelTasks", json!(0)));
    assert!(matches!(bad_parallel, Err(FlowdagError::Validation(_))));

    assert!(coord.active_workflows().is_empty());
    assert!(coord.store().list().unwrap().is_empty());
    assert!(log.started().is_empty());
}

#[tokio::test]
async fn oversized_parallelism_is_rejected_without_panicking() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    for n in [1025u64, 3_000_000_000_000_000_000, u64::MAX] {
        let result = coord.submit(request("Valid topic").with_preference("maxParallelTasks", json!(n)));
        match result {
            Err(FlowdagError::Validation(msg)) => assert!(msg.contains("maxParallelTasks")),
            other => panic!("expected Validation error for {n}, got {other:?}"),
        }
    }
    assert!(coord.active_workflows().is_empty());

    let id = coord
        .submit(request("Wide topic").with_preference("maxParallelTasks", json!(1024)))
        .unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn missing_providers_are_rejected_at_submit() {
    init_tracing();

    let log = InvocationLog::new();
    let mut registry = CapabilityRegistry::new();
    registry.register(ScriptedCapability::new("researcher", log.clone()).into_arc());
    let coord = coordinator_with(Arc::new(registry), Arc::new(MemoryStateStore::new()));

    match coord.submit(request("Valid topic")) {
        Err(FlowdagError::Validation(msg)) => {
            assert!(msg.contains("formatter"));
            assert!(msg.contains("writer"));
        }
        other => panic!("expected Validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_workflows_are_not_found() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    assert!(matches!(coord.status("nope"), Err(FlowdagError::NotFound(_))));
    assert!(matches!(coord.pause("nope"), Err(FlowdagError::NotFound(_))));
    assert!(matches!(coord.resume("nope"), Err(FlowdagError::NotFound(_))));
    assert!(matches!(coord.cancel("nope"), Err(FlowdagError::NotFound(_))));
    assert!(matches!(coord.assemble_result("nope"), Err(FlowdagError::NotFound(_))));
}

#[tokio::test]
async fn results_are_unavailable_until_completion() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator_with(
        registry(&log, |c| c.latency(Duration::from_millis(200))),
        Arc::new(MemoryStateStore::new()),
    );

    let id = coord.submit(request("Slow topic")).unwrap();
    assert!(matches!(
        coord.assemble_result(&id),
        Err(FlowdagError::InvalidOperation(_))
    ));
    let report = coord.status(&id).unwrap();
    assert!(!report.is_terminal());
    assert!(report.document.is_none());

    coord.cancel(&id).unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();
    assert_eq!(report.status, WorkflowStatus::Cancelled);
    assert!(matches!(
        coord.assemble_result(&id),
        Err(FlowdagError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn preferences_override_parallelism() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    let id = coord
        .submit(request("Serial topic").with_preference("maxParallelTasks", json!(1)))
        .unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(log.max_concurrent(), 1);
}

#[tokio::test]
async fn non_critical_failure_yields_a_partial_document() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator_with(
        registry(&log, |c| c.always_fail("quality_review")),
        Arc::new(MemoryStateStore::new()),
    );

    let id = coord.submit(request("Partial topic")).unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].task_id, "quality_review");
    assert_eq!(report.failures[0].retry_count, 3);
    assert_eq!(report.blocked, vec!["formatting"]);

    let document = coord.assemble_result(&id).unwrap();
    assert!(document.partial);
    assert_eq!(document.sections.len(), 6);
    assert_eq!(document.quality_score, None);
}

#[tokio::test]
async fn critical_failure_fails_the_workflow() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator_with(
        registry(&log, |c| c.always_fail("research")),
        Arc::new(MemoryStateStore::new()),
    );

    let id = coord.submit(request("Doomed topic")).unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert!(report.error.is_some());
    assert_eq!(report.counts.blocked, 7);
    assert!(matches!(
        coord.assemble_result(&id),
        Err(FlowdagError::InvalidOperation(_))
    ));
}

#[tokio::test]
async fn finished_workflows_are_served_from_the_file_store() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let log = InvocationLog::new();

    let id = {
        let store = open_store(StorageMode::File, dir.path().to_path_buf()).unwrap();
        let coord = coordinator_with(registry(&log, |c| c), store);
        let id = coord.submit(request("Durable topic")).unwrap();
        with_timeout(coord.wait(&id, POLL)).await.unwrap();
        with_timeout(wait_until_idle(&coord)).await;
        id
    };

    // A fresh coordinator over the same directory knows nothing in memory.
    let store = open_store(StorageMode::File, dir.path().to_path_buf()).unwrap();
    let coord = coordinator_with(registry(&log, |c| c), store);
    assert!(coord.active_workflows().is_empty());

    let report = coord.status(&id).unwrap();
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(coord.assemble_result(&id).unwrap().sections.len(), 8);
    assert!(matches!(coord.cancel(&id), Err(FlowdagError::NotFound(_))));
}

#[tokio::test]
async fn cleanup_removes_old_terminal_workflows() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator(&log);

    let id = coord.submit(request("Short lived")).unwrap();
    with_timeout(coord.wait(&id, POLL)).await.unwrap();
    with_timeout(wait_until_idle(&coord)).await;

    assert_eq!(coord.cleanup_older_than(Duration::from_secs(3600)).unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(coord.cleanup_older_than(Duration::ZERO).unwrap(), 1);
    assert!(matches!(coord.status(&id), Err(FlowdagError::NotFound(_))));
}

/// Memory store whose shared area is unwritable.
struct SharedWriteFails(MemoryStateStore);

impl StateStore for SharedWriteFails {
    fn save(&self, state: &WorkflowState) -> Result<()> {
        self.0.save(state)
    }

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        self.0.load(workflow_id)
    }

    fn delete(&self, workflow_id: &str) -> Result<bool> {
        self.0.delete(workflow_id)
    }

    fn set_shared(&self, _: &str, _: &str, _: &Value, _: Option<Duration>) -> Result<()> {
        Err(FlowdagError::Store("disk full".into()))
    }

    fn get_shared(&self, workflow_id: &str, key: &str) -> Result<Option<Value>> {
        self.0.get_shared(workflow_id, key)
    }

    fn list(&self) -> Result<Vec<String>> {
        self.0.list()
    }
}

#[tokio::test]
async fn store_failure_marks_the_workflow_failed() {
    init_tracing();

    let log = InvocationLog::new();
    let coord = coordinator_with(
        registry(&log, |c| c),
        Arc::new(SharedWriteFails(MemoryStateStore::new())),
    );

    let id = coord.submit(request("Unlucky topic")).unwrap();
    let report = with_timeout(coord.wait(&id, POLL)).await.unwrap();

    assert_eq!(report.status, WorkflowStatus::Failed);
    let error = report.error.expect("failed report names the cause");
    assert!(error.contains("disk full"), "unexpected error: {error}");

    // Once the executor is gone the persisted record tells the same story.
    with_timeout(wait_until_idle(&coord)).await;
    let report = coord.status(&id).unwrap();
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.counts.active, 0);
    assert!(report.error.unwrap().contains("disk full"));
    // Only the first task got to run.
    assert_eq!(log.started(), vec!["research"]);
}
