// src/engine/executor.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{RunOutcome, ScheduledTask, Scheduler, TaskGraph, TaskId};
use crate::engine::RuntimeEvent;
use crate::engine::handle::{Control, ExecutorHandle};
use crate::engine::state::{TaskResult, WorkflowState, output_key};
use crate::errors::{FlowdagError, Result};
use crate::exec::{CapabilityRegistry, RetryPolicy, RunReport, run_task};
use crate::store::StateStore;
use crate::types::WorkflowStatus;

/// Runners beyond this many share event-channel capacity; senders wait.
const MAX_EVENT_SLOTS: usize = 1024;

/// Knobs for one executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    pub max_parallel: usize,
    /// Applied to every task of graphs built by the coordinator.
    pub max_retries: u32,
    pub retry: RetryPolicy,
    /// Failed or blocked tasks at or above this priority fail the run.
    pub critical_priority: u8,
    pub pause_grace: Duration,
    /// Lifetime of outputs written to the store's shared area.
    pub shared_ttl: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_retries: 3,
            retry: RetryPolicy::default(),
            critical_priority: 9,
            pause_grace: Duration::from_secs(2),
            shared_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

/// A spawned task runner.
struct ActiveTask {
    seq: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs one task graph to completion with bounded parallelism.
///
/// All state mutation happens on the task awaiting [`DagExecutor::execute`];
/// task runners only report back through the event channel.
pub struct DagExecutor {
    scheduler: Scheduler,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn StateStore>,
    options: ExecutorOptions,

    control_tx: Arc<watch::Sender<Control>>,
    control_rx: watch::Receiver<Control>,
    snapshot_tx: watch::Sender<WorkflowState>,
    snapshot_rx: watch::Receiver<WorkflowState>,

    event_tx: mpsc::Sender<RuntimeEvent>,
    event_rx: mpsc::Receiver<RuntimeEvent>,

    active: HashMap<TaskId, ActiveTask>,
    /// Missing capability seen by a runner: (task, capability).
    fatal: Option<(TaskId, String)>,
}

impl fmt::Debug for DagExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagExecutor")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .field("active", &self.active.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DagExecutor {
    pub fn new(
        workflow_id: impl Into<String>,
        graph: TaskGraph,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn StateStore>,
        options: ExecutorOptions,
    ) -> Self {
        let scheduler = Scheduler::new(workflow_id, graph, options.critical_priority);
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (snapshot_tx, snapshot_rx) = watch::channel(scheduler.state().clone());
        // Each runner sends exactly one event; leave room for stale events
        // from attempts discarded by a pause.
        let capacity = options
            .max_parallel
            .clamp(1, MAX_EVENT_SLOTS)
            .saturating_mul(2)
            + 8;
        let (event_tx, event_rx) = mpsc::channel(capacity);

        Self {
            scheduler,
            registry,
            store,
            options,
            control_tx: Arc::new(control_tx),
            control_rx,
            snapshot_tx,
            snapshot_rx,
            event_tx,
            event_rx,
            active: HashMap::new(),
            fatal: None,
        }
    }

    /// Attach free-form metadata to the workflow state.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.scheduler.state_mut().metadata.extend(metadata);
        self.publish();
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.scheduler.state().workflow_id
    }

    pub fn state(&self) -> &WorkflowState {
        self.scheduler.state()
    }

    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle::new(
            self.workflow_id().to_string(),
            self.control_tx.clone(),
            self.snapshot_rx.clone(),
        )
    }

    /// Persist the initial state without running anything.
    pub fn persist_initial(&self) -> Result<()> {
        self.store.save(self.scheduler.state())
    }

    /// Drive the graph until it completes, fails, or is cancelled.
    ///
    /// Returns the final state for Completed (including partial) and
    /// Cancelled runs. A failed run yields
    /// [`FlowdagError::WorkflowExecution`], or
    /// [`FlowdagError::CapabilityNotFound`] when a provider was missing.
    /// Any other error (a store failure) marks the run Failed and yields
    /// [`FlowdagError::Orchestrator`].
    pub async fn execute(mut self) -> Result<WorkflowState> {
        info!(
            workflow_id = %self.workflow_id(),
            tasks = self.scheduler.graph().len(),
            max_parallel = self.options.max_parallel,
            "workflow execution started"
        );
        match self.drive().await {
            Err(
                e @ (FlowdagError::WorkflowExecution { .. }
                | FlowdagError::CapabilityNotFound(_)
                | FlowdagError::Orchestrator { .. }),
            ) => Err(e),
            Err(e) => Err(self.fail_run(e)),
            ok => ok,
        }
    }

    async fn drive(&mut self) -> Result<WorkflowState> {
        let workflow_id = self.workflow_id().to_string();
        self.set_status(WorkflowStatus::Running)?;

        loop {
            let control = *self.control_rx.borrow_and_update();
            match control {
                Control::Cancel => return self.finish_cancelled(),
                Control::Pause => {
                    if self.scheduler.state().status != WorkflowStatus::Paused {
                        self.interrupt_active().await;
                        self.set_status(WorkflowStatus::Paused)?;
                        info!(workflow_id = %workflow_id, "workflow paused");
                    }
                    // We own a sender, so this cannot fail.
                    let _ = self.control_rx.changed().await;
                    continue;
                }
                Control::Run => {
                    if self.scheduler.state().status == WorkflowStatus::Paused {
                        self.set_status(WorkflowStatus::Running)?;
                        info!(workflow_id = %workflow_id, "workflow resumed");
                    }
                }
            }

            if let Some((task, capability)) = self.fatal.take() {
                return self.finish_missing_capability(task, capability);
            }

            let slots = self.options.max_parallel.saturating_sub(self.active.len());
            let dispatched = self.scheduler.dispatch(slots);
            if !dispatched.is_empty() {
                for task in dispatched {
                    self.spawn(task);
                }
                self.persist()?;
            }

            if self.active.is_empty() {
                return match self.scheduler.outcome() {
                    Some(outcome) => self.finish(outcome),
                    None => {
                        error!(workflow_id = %workflow_id, "no task active or ready but work remains");
                        self.finish_stalled()
                    }
                };
            }

            tokio::select! {
                Some(event) = self.event_rx.recv() => self.on_event(event)?,
                _ = self.control_rx.changed() => {
                    debug!(workflow_id = %workflow_id, "control changed");
                }
            }
        }
    }

    fn spawn(&mut self, task: ScheduledTask) {
        let id = task.id.clone();
        let seq = task.seq;
        let cancel = CancellationToken::new();
        let tx = self.event_tx.clone();
        let registry = self.registry.clone();
        let policy = self.options.retry;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let task_id = task.id.clone();
            let report = run_task(task, registry, policy, token).await;
            if tx
                .send(RuntimeEvent::TaskCompleted {
                    task: task_id.clone(),
                    seq,
                    report,
                })
                .await
                .is_err()
            {
                debug!(task = %task_id, seq, "executor gone; dropping completion");
            }
        });

        self.active.insert(id, ActiveTask { seq, cancel, handle });
    }

    fn on_event(&mut self, event: RuntimeEvent) -> Result<()> {
        let RuntimeEvent::TaskCompleted { task, seq, report } = event;

        match self.active.get(&task) {
            Some(active) if active.seq == seq => {}
            _ => {
                debug!(task = %task, seq, "ignoring event from discarded attempt");
                return Ok(());
            }
        }
        self.active.remove(&task);

        match report {
            RunReport::Finished(result) => {
                let output = result.output.clone();
                let step = self.scheduler.handle_completion(seq, result);
                if step.applied && step.succeeded.is_some() {
                    if let Some(output) = output {
                        self.store.set_shared(
                            &self.scheduler.state().workflow_id,
                            &output_key(&task),
                            &output,
                            self.options.shared_ttl,
                        )?;
                    }
                }
                if !step.newly_ready.is_empty() {
                    debug!(task = %task, ready = ?step.newly_ready, "dependents became ready");
                }
                self.persist()
            }
            RunReport::Interrupted => {
                self.scheduler.requeue(&task);
                self.persist()
            }
            RunReport::MissingCapability(capability) => {
                let error = FlowdagError::CapabilityNotFound(capability.clone()).to_string();
                self.scheduler
                    .handle_completion(seq, TaskResult::failed(task.clone(), error));
                self.fatal = Some((task, capability));
                self.persist()
            }
        }
    }

    /// Cancel every running attempt, wait up to the grace period, abort the
    /// rest, and return their tasks to Pending.
    async fn interrupt_active(&mut self) {
        // Completions already queued are real results; keep them.
        while let Ok(event) = self.event_rx.try_recv() {
            if let Err(e) = self.on_event(event) {
                warn!(error = %e, "failed to apply completion while pausing");
            }
        }

        for active in self.active.values() {
            active.cancel.cancel();
        }

        let deadline = Instant::now() + self.options.pause_grace;
        let drained: Vec<(TaskId, ActiveTask)> = self.active.drain().collect();
        for (id, mut active) in drained {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if timeout(remaining, &mut active.handle).await.is_err() {
                warn!(task = %id, "task ignored cancellation; aborting");
                active.handle.abort();
            }
            self.scheduler.requeue(&id);
        }
    }

    fn abort_active(&mut self) {
        for (id, active) in self.active.drain() {
            active.cancel.cancel();
            active.handle.abort();
            self.scheduler.requeue(&id);
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> Result<WorkflowState> {
        let workflow_id = self.workflow_id().to_string();
        match outcome {
            RunOutcome::Completed { partial } => {
                if partial {
                    let stuck = self.scheduler.state().failed_and_blocked();
                    warn!(workflow_id = %workflow_id, failed = ?stuck, "workflow completed with non-critical failures");
                    self.scheduler
                        .state_mut()
                        .metadata
                        .insert("partial".into(), Value::Bool(true));
                }
                self.set_status(WorkflowStatus::Completed)?;
                info!(workflow_id = %workflow_id, "workflow completed");
                Ok(self.scheduler.state().clone())
            }
            RunOutcome::Failed { task, unreachable } => {
                let state = self.scheduler.state_mut();
                state.error = Some(format!(
                    "critical task '{task}' failed or cannot run; unreachable: {unreachable:?}"
                ));
                self.set_status(WorkflowStatus::Failed)?;
                error!(workflow_id = %workflow_id, task = %task, ?unreachable, "workflow failed");
                Err(FlowdagError::WorkflowExecution {
                    workflow_id,
                    task,
                    unreachable,
                })
            }
        }
    }

    fn finish_cancelled(&mut self) -> Result<WorkflowState> {
        self.abort_active();
        self.set_status(WorkflowStatus::Cancelled)?;
        info!(workflow_id = %self.workflow_id(), "workflow cancelled");
        Ok(self.scheduler.state().clone())
    }

    fn finish_missing_capability(
        &mut self,
        task: TaskId,
        capability: String,
    ) -> Result<WorkflowState> {
        self.abort_active();
        let state = self.scheduler.state_mut();
        state.error = Some(format!(
            "task '{task}' requires capability '{capability}', which is not registered"
        ));
        self.set_status(WorkflowStatus::Failed)?;
        error!(workflow_id = %self.workflow_id(), task = %task, capability = %capability, "workflow failed: missing capability");
        Err(FlowdagError::CapabilityNotFound(capability))
    }

    /// Terminal path for errors raised while driving the run. The store
    /// may be what failed, so the save here is best effort.
    fn fail_run(&mut self, cause: FlowdagError) -> FlowdagError {
        self.abort_active();
        let workflow_id = self.workflow_id().to_string();
        let details = format!("workflow aborted: {cause}");

        let state = self.scheduler.state_mut();
        state.error = Some(details.clone());
        state.set_status(WorkflowStatus::Failed);
        self.publish();
        if let Err(e) = self.store.save(self.scheduler.state()) {
            warn!(workflow_id = %workflow_id, error = %e, "could not persist failed state");
        }

        error!(workflow_id = %workflow_id, error = %cause, "workflow failed");
        FlowdagError::Orchestrator {
            workflow_id,
            details,
        }
    }

    fn finish_stalled(&mut self) -> Result<WorkflowState> {
        let workflow_id = self.workflow_id().to_string();
        let details = "scheduler stalled with pending tasks".to_string();
        self.scheduler.state_mut().error = Some(details.clone());
        self.set_status(WorkflowStatus::Failed)?;
        Err(FlowdagError::Orchestrator {
            workflow_id,
            details,
        })
    }

    fn set_status(&mut self, status: WorkflowStatus) -> Result<()> {
        self.scheduler.state_mut().set_status(status);
        self.persist()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.scheduler.state().clone());
    }

    fn persist(&self) -> Result<()> {
        self.publish();
        self.store.save(self.scheduler.state())
    }
}

impl Drop for DagExecutor {
    fn drop(&mut self) {
        for active in self.active.values() {
            active.cancel.cancel();
            active.handle.abort();
        }
    }
}
