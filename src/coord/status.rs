// src/coord/status.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::coord::result::AssembledDocument;
use crate::dag::TaskId;
use crate::engine::state::{TaskCounts, WorkflowState};
use crate::types::WorkflowStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub error: Option<String>,
    pub retry_count: u32,
}

/// What a poller sees for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub progress_percentage: f64,
    pub current_stage: Option<String>,
    pub counts: TaskCounts,
    pub failures: Vec<TaskFailure>,
    pub blocked: Vec<TaskId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Present once the workflow has completed.
    pub document: Option<AssembledDocument>,
}

impl WorkflowStatusReport {
    pub fn from_state(state: &WorkflowState, document: Option<AssembledDocument>) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            progress_percentage: state.progress_percentage,
            current_stage: state.current_stage.clone(),
            counts: state.counts(),
            failures: state
                .failed_tasks
                .values()
                .map(|r| TaskFailure {
                    task_id: r.task_id.clone(),
                    error: r.error.clone(),
                    retry_count: r.retry_count,
                })
                .collect(),
            blocked: state.blocked_tasks.iter().cloned().collect(),
            error: state.error.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
            completed_at: state.completed_at,
            document,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
