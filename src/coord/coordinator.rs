// src/coord/coordinator.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::TemplateCatalog;
use crate::coord::request::{CoordinatorSettings, WorkflowRequest};
use crate::coord::result::{AssembledDocument, assemble};
use crate::coord::status::WorkflowStatusReport;
use crate::dag::{EstimateSettings, TaskGraphBuilder};
use crate::engine::{DagExecutor, ExecutorHandle, ExecutorOptions, WorkflowState};
use crate::errors::{FlowdagError, Result};
use crate::exec::CapabilityRegistry;
use crate::store::StateStore;
use crate::types::WorkflowStatus;

type ActiveMap = Arc<Mutex<HashMap<String, ExecutorHandle>>>;

/// Owns workflow lifecycles: validates requests, builds graphs, spawns
/// executors and answers status queries.
///
/// In-flight workflows are tracked in memory; finished ones are served from
/// the [`StateStore`].
pub struct Coordinator {
    builder: TaskGraphBuilder,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn StateStore>,
    settings: CoordinatorSettings,
    options: ExecutorOptions,
    active: ActiveMap,
}

impl Coordinator {
    pub fn new(
        catalog: TemplateCatalog,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn StateStore>,
        settings: CoordinatorSettings,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            builder: TaskGraphBuilder::new(catalog, EstimateSettings::default()),
            registry,
            store,
            settings,
            options,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_estimate(mut self, estimate: EstimateSettings) -> Self {
        let catalog = self.builder.catalog().clone();
        self.builder = TaskGraphBuilder::new(catalog, estimate);
        self
    }

    pub fn builder(&self) -> &TaskGraphBuilder {
        &self.builder
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Validate, decompose and start a workflow. Returns as soon as the
    /// executor is spawned. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: WorkflowRequest) -> Result<String> {
        request.validate(&self.settings)?;

        let missing = self.registry.missing(self.builder.catalog().capabilities());
        if !missing.is_empty() {
            return Err(FlowdagError::Validation(format!(
                "no provider registered for capabilities: {}",
                missing.join(", ")
            )));
        }

        let overrides = request.overrides()?;
        let mut options = self.options.clone();
        if let Some(n) = overrides.max_parallel {
            options.max_parallel = n;
        }
        if let Some(n) = overrides.max_retries {
            options.max_retries = n;
        }

        let graph = self.builder.decompose(&request, options.max_retries)?;
        let workflow_id = Uuid::new_v4().to_string();

        let mut metadata = Map::new();
        metadata.insert("topic".into(), Value::String(request.topic.clone()));
        metadata.insert("key_points".into(), json!(request.key_points));
        metadata.insert("max_parallel".into(), json!(options.max_parallel));

        let executor = DagExecutor::new(
            workflow_id.clone(),
            graph,
            self.registry.clone(),
            self.store.clone(),
            options,
        )
        .with_metadata(metadata);

        executor
            .persist_initial()
            .map_err(|e| FlowdagError::Orchestrator {
                workflow_id: workflow_id.clone(),
                details: format!("persisting initial state: {e}"),
            })?;

        self.lock_active()
            .insert(workflow_id.clone(), executor.handle());

        let active = self.active.clone();
        let id = workflow_id.clone();
        let span = info_span!("workflow", workflow_id = %workflow_id);
        tokio::spawn(
            async move {
                match executor.execute().await {
                    Ok(state) => info!(status = %state.status, "executor finished"),
                    Err(e) => warn!(error = %e, "executor finished with error"),
                }
                lock(&active).remove(&id);
            }
            .instrument(span),
        );

        info!(workflow_id = %workflow_id, topic = %request.topic, "workflow submitted");
        Ok(workflow_id)
    }

    pub fn status(&self, workflow_id: &str) -> Result<WorkflowStatusReport> {
        let state = self.load_state(workflow_id)?;
        let document = (state.status == WorkflowStatus::Completed)
            .then(|| assemble(&state, self.builder.catalog()));
        Ok(WorkflowStatusReport::from_state(&state, document))
    }

    pub fn pause(&self, workflow_id: &str) -> Result<()> {
        self.active_handle(workflow_id)?.pause()
    }

    pub fn resume(&self, workflow_id: &str) -> Result<()> {
        self.active_handle(workflow_id)?.resume()
    }

    pub fn cancel(&self, workflow_id: &str) -> Result<()> {
        self.active_handle(workflow_id)?.cancel()
    }

    /// The final document. Only available once the workflow completed.
    pub fn assemble_result(&self, workflow_id: &str) -> Result<AssembledDocument> {
        let state = self.load_state(workflow_id)?;
        if state.status != WorkflowStatus::Completed {
            return Err(FlowdagError::InvalidOperation(format!(
                "workflow {workflow_id} is {}; results are available once it has completed",
                state.status
            )));
        }
        Ok(assemble(&state, self.builder.catalog()))
    }

    /// Poll until the workflow reaches a terminal status.
    pub async fn wait(&self, workflow_id: &str, poll: Duration) -> Result<WorkflowStatusReport> {
        loop {
            let report = self.status(workflow_id)?;
            if report.is_terminal() {
                return Ok(report);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Delete persisted terminal workflows last updated before
    /// `now - max_age`. Returns how many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| FlowdagError::Validation(format!("max_age out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;
        let active: Vec<String> = self.active_workflows();

        let mut removed = 0;
        for id in self.store.list()? {
            if active.contains(&id) {
                continue;
            }
            let Some(state) = self.store.load(&id)? else {
                continue;
            };
            if state.is_terminal() && state.updated_at < cutoff && self.store.delete(&id)? {
                debug!(workflow_id = %id, "removed stale workflow");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleaned up old workflows");
        }
        Ok(removed)
    }

    /// Ids of workflows with a live executor, sorted.
    pub fn active_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn load_state(&self, workflow_id: &str) -> Result<WorkflowState> {
        if let Some(handle) = self.lock_active().get(workflow_id) {
            return Ok(handle.snapshot());
        }
        self.store
            .load(workflow_id)?
            .ok_or_else(|| FlowdagError::NotFound(format!("workflow {workflow_id}")))
    }

    fn active_handle(&self, workflow_id: &str) -> Result<ExecutorHandle> {
        self.lock_active()
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| FlowdagError::NotFound(format!("no active executor for workflow {workflow_id}")))
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, ExecutorHandle>> {
        lock(&self.active)
    }
}

/// The map holds plain handles, so a poisoned lock is still usable.
fn lock(active: &ActiveMap) -> MutexGuard<'_, HashMap<String, ExecutorHandle>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
