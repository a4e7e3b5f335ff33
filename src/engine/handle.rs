// src/engine/handle.rs

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::engine::state::WorkflowState;
use crate::errors::{FlowdagError, Result};
use crate::types::WorkflowStatus;

/// Requested run mode, published to the executor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Cancel,
}

/// Control surface for a running [`crate::engine::DagExecutor`].
///
/// Cloneable and cheap; every clone talks to the same executor.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    workflow_id: String,
    control: Arc<watch::Sender<Control>>,
    snapshot: watch::Receiver<WorkflowState>,
}

impl ExecutorHandle {
    pub(crate) fn new(
        workflow_id: String,
        control: Arc<watch::Sender<Control>>,
        snapshot: watch::Receiver<WorkflowState>,
    ) -> Self {
        Self {
            workflow_id,
            control,
            snapshot,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Latest state published by the executor.
    pub fn snapshot(&self) -> WorkflowState {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.snapshot.borrow().status
    }

    /// Stop dispatching and interrupt running tasks. Valid while
    /// initialized or running.
    pub fn pause(&self) -> Result<()> {
        self.transition("pause", |current| match current {
            Control::Run => Ok(Control::Pause),
            Control::Pause => Err("workflow is already paused"),
            Control::Cancel => Err("workflow is cancelled"),
        })
    }

    /// Continue a paused workflow.
    pub fn resume(&self) -> Result<()> {
        self.transition("resume", |current| match current {
            Control::Pause => Ok(Control::Run),
            Control::Run => Err("workflow is not paused"),
            Control::Cancel => Err("workflow is cancelled"),
        })
    }

    /// Stop the workflow for good.
    pub fn cancel(&self) -> Result<()> {
        self.transition("cancel", |current| match current {
            Control::Run | Control::Pause => Ok(Control::Cancel),
            Control::Cancel => Err("workflow is already cancelled"),
        })
    }

    fn transition<F>(&self, op: &str, decide: F) -> Result<()>
    where
        F: FnOnce(Control) -> std::result::Result<Control, &'static str>,
    {
        let status = self.status();
        if status.is_terminal() {
            return Err(FlowdagError::InvalidOperation(format!(
                "cannot {op} workflow {}: it is already {status}",
                self.workflow_id
            )));
        }

        let mut outcome = Ok(());
        self.control.send_if_modified(|current| match decide(*current) {
            Ok(next) => {
                *current = next;
                true
            }
            Err(reason) => {
                outcome = Err(FlowdagError::InvalidOperation(format!(
                    "cannot {op} workflow {}: {reason}",
                    self.workflow_id
                )));
                false
            }
        });

        if outcome.is_ok() {
            info!(workflow_id = %self.workflow_id, op, "control requested");
        }
        outcome
    }
}
