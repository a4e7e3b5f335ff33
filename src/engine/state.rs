// src/engine/state.rs

//! Serializable execution record of one workflow.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dag::TaskId;
use crate::types::{TaskStatus, WorkflowStatus};

/// Key under which a task's output is published in the shared context.
pub fn output_key(task_id: &str) -> String {
    format!("output_{task_id}")
}

/// Terminal record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Failed attempts before the final one.
    pub retry_count: u32,
    /// Backoff sleeps taken, in order.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
}

impl TaskResult {
    pub fn succeeded(task_id: impl Into<TaskId>, output: Value) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Succeeded,
            output: Some(output),
            error: None,
            duration_ms: 0,
            retry_count: 0,
            backoff_ms: Vec::new(),
        }
    }

    pub fn failed(task_id: impl Into<TaskId>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            retry_count: 0,
            backoff_ms: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }
}

/// Per-partition task counts. `pending` excludes blocked tasks, so the
/// five buckets sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub status: WorkflowStatus,

    pub pending_tasks: BTreeSet<TaskId>,
    pub active_tasks: BTreeSet<TaskId>,
    pub completed_results: BTreeMap<TaskId, TaskResult>,
    pub failed_tasks: BTreeMap<TaskId, TaskResult>,
    /// Pending tasks that can never run because a dependency failed.
    pub blocked_tasks: BTreeSet<TaskId>,

    pub progress_percentage: f64,
    pub current_stage: Option<String>,
    /// `output_<task id>` -> task output. Write-once per key.
    pub shared_context: BTreeMap<String, Value>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,

    pub total_tasks: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new<I>(workflow_id: impl Into<String>, task_ids: I) -> Self
    where
        I: IntoIterator<Item = TaskId>,
    {
        let pending_tasks: BTreeSet<TaskId> = task_ids.into_iter().collect();
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Initialized,
            total_tasks: pending_tasks.len(),
            pending_tasks,
            active_tasks: BTreeSet::new(),
            completed_results: BTreeMap::new(),
            failed_tasks: BTreeMap::new(),
            blocked_tasks: BTreeSet::new(),
            progress_percentage: 0.0,
            current_stage: None,
            shared_context: BTreeMap::new(),
            metadata: Map::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Set the status, stamping `completed_at` on terminal states.
    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.touch();
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts {
            total: self.total_tasks,
            pending: self.pending_tasks.len() - self.blocked_tasks.len(),
            active: self.active_tasks.len(),
            completed: self.completed_results.len(),
            failed: self.failed_tasks.len(),
            blocked: self.blocked_tasks.len(),
        }
    }

    /// Failed and blocked ids together, sorted.
    pub fn failed_and_blocked(&self) -> Vec<TaskId> {
        let mut all: BTreeSet<&TaskId> = self.failed_tasks.keys().collect();
        all.extend(self.blocked_tasks.iter());
        all.into_iter().cloned().collect()
    }

    /// True when every id sits in exactly one partition and nothing else is
    /// tracked.
    pub fn partitions_consistent<'a, I>(&self, task_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = 0usize;
        for id in task_ids {
            seen += 1;
            let hits = [
                self.pending_tasks.contains(id),
                self.active_tasks.contains(id),
                self.completed_results.contains_key(id),
                self.failed_tasks.contains_key(id),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            if hits != 1 {
                return false;
            }
        }
        let tracked = self.pending_tasks.len()
            + self.active_tasks.len()
            + self.completed_results.len()
            + self.failed_tasks.len();
        tracked == seen && self.blocked_tasks.is_subset(&self.pending_tasks)
    }
}
