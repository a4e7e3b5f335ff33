// src/engine/mod.rs

//! Async execution of one workflow.
//!
//! The synchronous [`crate::dag::Scheduler`] decides what may run; this
//! module is the IO shell around it:
//! - [`executor`] spawns dispatched tasks, waits for completion events and
//!   control changes, and persists state after every transition.
//! - [`handle`] is the cloneable control surface (pause, resume, cancel,
//!   live snapshot).
//! - [`state`] holds the serializable execution record.

use crate::dag::TaskId;
use crate::exec::RunReport;

pub mod executor;
pub mod handle;
pub mod state;

pub use executor::{DagExecutor, ExecutorOptions};
pub use handle::{Control, ExecutorHandle};
pub use state::{TaskCounts, TaskResult, WorkflowState, output_key};

/// Events flowing from spawned task runners back into the executor loop.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A dispatched attempt finished, failed for good, or was interrupted.
    TaskCompleted {
        task: TaskId,
        /// Dispatch number the attempt was started with.
        seq: u64,
        report: RunReport,
    },
}
