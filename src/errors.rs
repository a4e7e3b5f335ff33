// src/errors.rs

//! Crate-wide error types and aliases.

use thiserror::Error;

use crate::dag::TaskId;

/// Structural problems with a task graph.
///
/// These are raised while a graph is being built or extended and are never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cycle detected in task graph involving task '{0}'")]
    Cycle(TaskId),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskId),

    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),

    #[error("graph can no longer be modified: task '{0}' has already started")]
    ExecutionStarted(TaskId),
}

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Capability not registered: {0}")]
    CapabilityNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Workflow {workflow_id} failed at task '{task}' (unreachable: {unreachable:?})")]
    WorkflowExecution {
        workflow_id: String,
        task: TaskId,
        unreachable: Vec<TaskId>,
    },

    #[error("Orchestrator error in workflow {workflow_id}: {details}")]
    Orchestrator { workflow_id: String, details: String },

    #[error("State store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowdagError {
    /// Whether this error was caused by the caller's input rather than by
    /// the orchestrator itself.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FlowdagError::Validation(_) | FlowdagError::Graph(_) | FlowdagError::ConfigError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;
