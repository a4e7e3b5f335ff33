// src/dag/mod.rs

//! Task graphs and scheduling.
//!
//! - [`task_info`] holds the per-task descriptor and the dispatch record.
//! - [`graph`] is the validated DAG of descriptors.
//! - [`builder`] expands a template catalog into a graph for one request.
//! - [`scheduler`] is the synchronous state machine that decides what runs
//!   next; it never touches Tokio.
//! - [`scheduler_step`] describes what changed in one scheduler step.
//! - [`state_manager`] does the per-task partition bookkeeping.

pub mod builder;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

/// Identifier of a task, unique within one graph.
pub type TaskId = String;

pub use builder::{CompletionEstimate, EstimateSettings, TaskGraphBuilder};
pub use graph::TaskGraph;
pub use scheduler::{RunOutcome, Scheduler};
pub use scheduler_step::SchedulerStep;
pub use task_info::{ScheduledTask, TaskDescriptor};
