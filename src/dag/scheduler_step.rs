// src/dag/scheduler_step.rs

//! Step-by-step result type for the scheduler.

use crate::dag::TaskId;

/// What changed in one call to [`crate::dag::Scheduler::handle_completion`].
///
/// Tests use it to step a graph by hand and assert on each transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// False when the completion was stale (wrong dispatch number or task not
    /// running) and nothing changed.
    pub applied: bool,
    /// Task that reached Succeeded in this step.
    pub succeeded: Option<TaskId>,
    /// Task that reached Failed in this step.
    pub failed: Option<TaskId>,
    /// Pending tasks newly blocked by the failure.
    pub newly_blocked: Vec<TaskId>,
    /// Tasks that became ready as a result of this step.
    pub newly_ready: Vec<TaskId>,
}

impl SchedulerStep {
    pub fn ignored() -> Self {
        Self::default()
    }
}
