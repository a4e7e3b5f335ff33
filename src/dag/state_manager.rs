// src/dag/state_manager.rs

//! Partition bookkeeping for one workflow run.

use chrono::Utc;
use tracing::{debug, warn};

use crate::dag::TaskId;
use crate::dag::graph::TaskGraph;
use crate::engine::state::{TaskResult, WorkflowState, output_key};
use crate::types::TaskStatus;

/// Moves task ids between the partitions of a [`WorkflowState`] and keeps the
/// matching descriptor statuses in step.
pub struct StateManager<'a> {
    graph: &'a mut TaskGraph,
    state: &'a mut WorkflowState,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a mut TaskGraph, state: &'a mut WorkflowState) -> Self {
        Self { graph, state }
    }

    /// Pending -> Ready, for tasks that entered the frontier.
    pub fn mark_ready(&mut self, ids: &[TaskId]) {
        for id in ids {
            if let Some(task) = self.graph.get_mut(id) {
                if task.status == TaskStatus::Pending {
                    task.status = TaskStatus::Ready;
                }
            }
        }
    }

    /// Ready -> Running.
    pub fn start(&mut self, id: &str) -> bool {
        if !self.state.pending_tasks.remove(id) {
            warn!(task = %id, "start requested for task that is not pending");
            return false;
        }
        self.state.active_tasks.insert(id.to_string());
        if let Some(task) = self.graph.get_mut(id) {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
        true
    }

    /// Running -> Succeeded. Publishes the output under `output_<id>` unless
    /// that key was already written.
    pub fn succeed(&mut self, result: TaskResult) {
        let id = result.task_id.clone();
        self.state.active_tasks.remove(&id);

        if let Some(output) = result.output.clone() {
            let key = output_key(&id);
            if self.state.shared_context.contains_key(&key) {
                warn!(task = %id, key = %key, "shared context key already written; keeping first value");
            } else {
                self.state.shared_context.insert(key, output);
            }
        }

        if let Some(task) = self.graph.get_mut(&id) {
            task.status = TaskStatus::Succeeded;
            task.completed_at = Some(Utc::now());
            task.retry_count = result.retry_count;
        }
        self.state.completed_results.insert(id, result);
    }

    /// Running -> Failed, then block every pending task downstream.
    ///
    /// Returns the ids newly marked blocked.
    pub fn fail(&mut self, result: TaskResult) -> Vec<TaskId> {
        let id = result.task_id.clone();
        self.state.active_tasks.remove(&id);

        if let Some(task) = self.graph.get_mut(&id) {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            task.retry_count = result.retry_count;
        }
        self.state.failed_tasks.insert(id.clone(), result);

        let mut newly_blocked: Vec<TaskId> = self
            .graph
            .transitive_dependents(&id)
            .into_iter()
            .filter(|dep| self.state.pending_tasks.contains(dep))
            .filter(|dep| !self.state.blocked_tasks.contains(dep))
            .collect();
        newly_blocked.sort();

        for dep in newly_blocked.iter() {
            debug!(task = %dep, failed = %id, "blocking dependent of failed task");
            self.state.blocked_tasks.insert(dep.clone());
        }
        newly_blocked
    }

    /// Running -> Ready without recording an attempt. The task stays in the
    /// pending partition; its dependencies already succeeded.
    pub fn requeue(&mut self, id: &str) -> bool {
        if !self.state.active_tasks.remove(id) {
            return false;
        }
        self.state.pending_tasks.insert(id.to_string());
        if let Some(task) = self.graph.get_mut(id) {
            task.status = TaskStatus::Ready;
        }
        true
    }

    /// Recompute progress and current stage from the partitions.
    pub fn refresh_progress(&mut self) {
        let state = &mut *self.state;
        state.progress_percentage = if state.total_tasks == 0 {
            0.0
        } else {
            state.completed_results.len() as f64 / state.total_tasks as f64 * 100.0
        };
        if let Some(first) = state.active_tasks.iter().next() {
            state.current_stage = self.graph.get(first).map(|t| t.stage.clone());
        }
        state.touch();
    }
}

/// Read-only dependency checks.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a TaskGraph,
    state: &'a WorkflowState,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a TaskGraph, state: &'a WorkflowState) -> Self {
        Self { graph, state }
    }

    /// Every direct dependency has succeeded.
    pub fn deps_satisfied(&self, id: &str) -> bool {
        self.graph
            .dependencies_of(id)
            .iter()
            .all(|dep| self.state.completed_results.contains_key(dep))
    }

    /// Pending, not blocked, dependencies satisfied.
    pub fn is_ready(&self, id: &str) -> bool {
        self.state.pending_tasks.contains(id)
            && !self.state.blocked_tasks.contains(id)
            && self.deps_satisfied(id)
    }
}
