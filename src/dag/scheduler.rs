// src/dag/scheduler.rs

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::dag::TaskId;
use crate::dag::graph::TaskGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task_info::{ScheduledTask, TaskDescriptor};
use crate::engine::state::{TaskResult, WorkflowState, output_key};

/// How a run ended once no further progress is possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every reachable task finished. `partial` is set when some
    /// non-critical tasks failed or were blocked.
    Completed { partial: bool },
    /// A critical task failed or can never run.
    Failed {
        task: TaskId,
        unreachable: Vec<TaskId>,
    },
}

/// Synchronous scheduling core for one workflow run.
///
/// It owns the task graph and the [`WorkflowState`], decides which tasks are
/// ready, and applies completions. It knows nothing about Tokio; the async
/// executor drives it and does all waiting.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    state: WorkflowState,
    critical_priority: u8,
    next_seq: u64,
    /// task -> dispatch number of its live attempt.
    in_flight: HashMap<TaskId, u64>,
}

impl Scheduler {
    pub fn new(workflow_id: impl Into<String>, graph: TaskGraph, critical_priority: u8) -> Self {
        let state = WorkflowState::new(workflow_id, graph.task_ids().map(str::to_string));
        let mut scheduler = Self {
            graph,
            state,
            critical_priority,
            next_seq: 0,
            in_flight: HashMap::new(),
        };
        let roots = scheduler.ready_frontier();
        StateManager::new(&mut scheduler.graph, &mut scheduler.state).mark_ready(&roots);
        scheduler
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut WorkflowState {
        &mut self.state
    }

    pub fn critical_priority(&self) -> u8 {
        self.critical_priority
    }

    /// Ids currently running, with their dispatch numbers.
    pub fn in_flight(&self) -> impl Iterator<Item = (&str, u64)> {
        self.in_flight.iter().map(|(id, seq)| (id.as_str(), *seq))
    }

    /// Pending, unblocked tasks whose dependencies all succeeded, by priority
    /// (descending) then declaration order.
    pub fn ready_frontier(&self) -> Vec<TaskId> {
        let ro = ReadOnlyStateManager::new(&self.graph, &self.state);
        let mut ready: Vec<&TaskDescriptor> = self
            .graph
            .tasks()
            .iter()
            .filter(|t| ro.is_ready(&t.id))
            .collect();
        // Stable sort keeps declaration order within a priority.
        ready.sort_by(|a, b| b.priority.cmp(&a.priority));
        ready.into_iter().map(|t| t.id.clone()).collect()
    }

    /// Move up to `slots` frontier tasks to Running and hand them out.
    pub fn dispatch(&mut self, slots: usize) -> Vec<ScheduledTask> {
        if slots == 0 {
            return Vec::new();
        }

        let mut scheduled = Vec::new();
        for id in self.ready_frontier().into_iter().take(slots) {
            let input = self.assemble_input(&id);
            let mut manager = StateManager::new(&mut self.graph, &mut self.state);
            if !manager.start(&id) {
                continue;
            }

            self.next_seq += 1;
            let seq = self.next_seq;
            self.in_flight.insert(id.clone(), seq);

            let Some(task) = self.graph.get(&id) else {
                continue;
            };
            info!(
                workflow_id = %self.state.workflow_id,
                task = %id,
                seq,
                priority = task.priority,
                "dispatching task"
            );
            scheduled.push(ScheduledTask {
                id: task.id.clone(),
                capability: task.capability.clone(),
                priority: task.priority,
                stage: task.stage.clone(),
                max_retries: task.max_retries,
                input,
                seq,
            });
        }

        if !scheduled.is_empty() {
            StateManager::new(&mut self.graph, &mut self.state).refresh_progress();
        }
        scheduled
    }

    /// Apply the final result of a dispatched attempt.
    ///
    /// Results whose dispatch number does not match the live attempt are
    /// ignored; they come from attempts discarded by a pause.
    pub fn handle_completion(&mut self, seq: u64, result: TaskResult) -> SchedulerStep {
        let id = result.task_id.clone();
        match self.in_flight.get(&id) {
            Some(live) if *live == seq => {}
            other => {
                debug!(task = %id, seq, live = ?other, "ignoring stale completion");
                return SchedulerStep::ignored();
            }
        }
        self.in_flight.remove(&id);

        let before: Vec<TaskId> = self.ready_frontier();
        let mut step = SchedulerStep {
            applied: true,
            ..SchedulerStep::default()
        };

        {
            let mut manager = StateManager::new(&mut self.graph, &mut self.state);
            if result.is_success() {
                debug!(task = %id, retries = result.retry_count, "task succeeded");
                manager.succeed(result);
                step.succeeded = Some(id.clone());
            } else {
                warn!(
                    task = %id,
                    retries = result.retry_count,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "task failed; blocking dependents"
                );
                step.newly_blocked = manager.fail(result);
                step.failed = Some(id.clone());
            }
            manager.refresh_progress();
        }

        step.newly_ready = self
            .ready_frontier()
            .into_iter()
            .filter(|t| !before.contains(t))
            .collect();
        StateManager::new(&mut self.graph, &mut self.state).mark_ready(&step.newly_ready);
        step
    }

    /// Return a running task to Pending; its live attempt is discarded.
    pub fn requeue(&mut self, id: &str) -> bool {
        self.in_flight.remove(id);
        let mut manager = StateManager::new(&mut self.graph, &mut self.state);
        let moved = manager.requeue(id);
        if moved {
            manager.refresh_progress();
            debug!(task = %id, "requeued interrupted task");
        }
        moved
    }

    /// Requeue every running task. Returns the ids moved.
    pub fn requeue_all_active(&mut self) -> Vec<TaskId> {
        let active: Vec<TaskId> = self.state.active_tasks.iter().cloned().collect();
        active.into_iter().filter(|id| self.requeue(id)).collect()
    }

    /// `None` while work remains (something running or ready).
    pub fn outcome(&self) -> Option<RunOutcome> {
        if !self.state.active_tasks.is_empty() || !self.ready_frontier().is_empty() {
            return None;
        }

        let stuck = self.state.failed_and_blocked();
        let critical = self
            .graph
            .tasks()
            .iter()
            .find(|t| stuck.contains(&t.id) && t.priority >= self.critical_priority);

        match critical {
            Some(task) => {
                let unreachable = self
                    .graph
                    .tasks()
                    .iter()
                    .filter(|t| self.state.blocked_tasks.contains(&t.id))
                    .map(|t| t.id.clone())
                    .collect();
                Some(RunOutcome::Failed {
                    task: task.id.clone(),
                    unreachable,
                })
            }
            None => Some(RunOutcome::Completed {
                partial: !stuck.is_empty(),
            }),
        }
    }

    /// Static parameters plus each dependency's output under
    /// `dependencies.<id>`.
    fn assemble_input(&self, id: &str) -> Value {
        let Some(task) = self.graph.get(id) else {
            return Value::Object(Map::new());
        };
        let mut input = task.input_parameters.clone();
        let mut deps = Map::new();
        for dep in task.dependencies.iter() {
            if let Some(output) = self.state.shared_context.get(&output_key(dep)) {
                deps.insert(dep.clone(), output.clone());
            }
        }
        input.insert("dependencies".into(), Value::Object(deps));
        Value::Object(input)
    }
}
