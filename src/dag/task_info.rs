// src/dag/task_info.rs

//! Task descriptors and dispatch records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dag::TaskId;
use crate::types::TaskStatus;

pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One node of a task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub name: String,
    /// Name of the capability provider that performs this task.
    pub capability: String,
    /// Direct dependencies, in declaration order.
    pub dependencies: Vec<TaskId>,
    /// 1..=10, higher is more urgent. Only a tie-break among ready tasks.
    pub priority: u8,
    pub input_parameters: Map<String, Value>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Label reported as the workflow's current stage while this task runs.
    pub stage: String,
    pub cost_units: u32,
}

impl TaskDescriptor {
    pub fn new(
        id: impl Into<TaskId>,
        name: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            stage: id.clone(),
            id,
            name: name.into(),
            capability: capability.into(),
            dependencies: Vec::new(),
            priority: DEFAULT_PRIORITY,
            input_parameters: Map::new(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            cost_units: 1,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input_parameters.insert(key.into(), value);
        self
    }

    /// True once the task has been picked up at least once.
    pub fn has_started(&self) -> bool {
        !matches!(self.status, TaskStatus::Pending | TaskStatus::Ready) || self.started_at.is_some()
    }
}

/// A task the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub capability: String,
    pub priority: u8,
    pub stage: String,
    pub max_retries: u32,
    /// Static parameters plus `dependencies.<id>` holding each dependency's
    /// output.
    pub input: Value,
    /// Monotonic dispatch number; completions carrying a stale number are
    /// ignored.
    pub seq: u64,
}
