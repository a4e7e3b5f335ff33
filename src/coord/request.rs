// src/coord/request.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{FlowdagError, Result};

/// Upper bound for a per-request `maxParallelTasks` override.
pub const MAX_PARALLEL_OVERRIDE: u64 = 1024;

/// Minimum request shape accepted by [`crate::coord::Coordinator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Minimum trimmed length of the topic, in characters.
    pub min_topic_length: usize,
    pub min_key_points: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            min_topic_length: 3,
            min_key_points: 1,
        }
    }
}

/// A unit of work to decompose and run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub topic: String,
    pub key_points: Vec<String>,
    /// Free-form preferences passed to every task. `maxParallelTasks` and
    /// `maxRetries` also override executor limits for this workflow.
    #[serde(default)]
    pub preferences: Map<String, Value>,
}

/// Executor overrides carried in a request's preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOverrides {
    pub max_parallel: Option<usize>,
    pub max_retries: Option<u32>,
}

impl WorkflowRequest {
    pub fn new(topic: impl Into<String>, key_points: Vec<String>) -> Self {
        Self {
            topic: topic.into(),
            key_points,
            preferences: Map::new(),
        }
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preferences.insert(key.into(), value);
        self
    }

    /// Check the request against `settings`. Does not look at capabilities.
    pub fn validate(&self, settings: &CoordinatorSettings) -> Result<()> {
        let topic_len = self.topic.trim().chars().count();
        if topic_len < settings.min_topic_length {
            return Err(FlowdagError::Validation(format!(
                "topic must be at least {} characters (got {topic_len})",
                settings.min_topic_length
            )));
        }
        if self.key_points.len() < settings.min_key_points {
            return Err(FlowdagError::Validation(format!(
                "at least {} key point(s) required (got {})",
                settings.min_key_points,
                self.key_points.len()
            )));
        }
        if let Some(pos) = self.key_points.iter().position(|p| p.trim().is_empty()) {
            return Err(FlowdagError::Validation(format!(
                "key point {} is blank",
                pos + 1
            )));
        }
        self.overrides()?;
        Ok(())
    }

    /// Parse `maxParallelTasks` / `maxRetries` from preferences.
    pub fn overrides(&self) -> Result<RequestOverrides> {
        let max_parallel = match self.preferences.get("maxParallelTasks") {
            None => None,
            Some(v) => match v.as_u64().and_then(|n| usize::try_from(n).ok()) {
                Some(n) if (1..=MAX_PARALLEL_OVERRIDE as usize).contains(&n) => Some(n),
                _ => {
                    return Err(FlowdagError::Validation(format!(
                        "maxParallelTasks must be an integer between 1 and {MAX_PARALLEL_OVERRIDE} (got {v})"
                    )));
                }
            },
        };
        let max_retries = match self.preferences.get("maxRetries") {
            None => None,
            Some(v) => match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => Some(n),
                None => {
                    return Err(FlowdagError::Validation(format!(
                        "maxRetries must be a non-negative integer (got {v})"
                    )));
                }
            },
        };
        Ok(RequestOverrides {
            max_parallel,
            max_retries,
        })
    }
}
