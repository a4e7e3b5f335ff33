#![allow(dead_code)]

use std::time::Duration;

use flowdag::config::{CapabilityConfig, ConfigFile, RawConfigFile, TemplateConfig};
use flowdag::coord::WorkflowRequest;
use flowdag::dag::{TaskDescriptor, TaskGraph};
use flowdag::engine::ExecutorOptions;
use flowdag::exec::RetryPolicy;
use serde_json::json;

/// Capability used by graphs built here unless overridden.
pub const WORK: &str = "work";

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_template(mut self, template: TemplateConfig) -> Self {
        self.config.template.push(template);
        self
    }

    pub fn with_cmd_capability(mut self, name: &str, cmd: &str) -> Self {
        self.config.capability.insert(
            name.to_string(),
            CapabilityConfig {
                cmd: Some(cmd.to_string()),
                builtin: None,
            },
        );
        self
    }

    pub fn with_echo_capability(mut self, name: &str) -> Self {
        self.config.capability.insert(
            name.to_string(),
            CapabilityConfig {
                cmd: None,
                builtin: Some("echo".to_string()),
            },
        );
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.executor.max_parallel_tasks = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.executor.max_retries = n;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TemplateConfig`.
pub struct TemplateBuilder {
    template: TemplateConfig,
}

impl TemplateBuilder {
    pub fn new(key: &str, capability: &str) -> Self {
        Self {
            template: TemplateConfig {
                key: key.to_string(),
                name: None,
                capability: capability.to_string(),
                stage: None,
                priority: 5,
                cost_units: 1,
                after: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.template.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.template.priority = priority;
        self
    }

    pub fn cost_units(mut self, units: u32) -> Self {
        self.template.cost_units = units;
        self
    }

    pub fn build(self) -> TemplateConfig {
        self.template
    }
}

/// Builder for `TaskDescriptor` with test-friendly defaults.
pub struct TaskBuilder {
    task: TaskDescriptor,
}

impl TaskBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: TaskDescriptor::new(id, id, WORK).with_input("task", json!(id)),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.dependencies.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn capability(mut self, capability: &str) -> Self {
        self.task.capability = capability.to_string();
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.task.max_retries = n;
        self
    }

    pub fn build(self) -> TaskDescriptor {
        self.task
    }
}

/// Graph from `(id, deps)` pairs, every task using the [`WORK`] capability.
/// Each task's input carries its own id under `"task"`.
pub fn graph(spec: &[(&str, &[&str])]) -> TaskGraph {
    let tasks = spec
        .iter()
        .map(|(id, deps)| {
            TaskDescriptor::new(*id, *id, WORK)
                .with_dependencies(deps.iter().copied())
                .with_input("task", json!(id))
        })
        .collect();
    TaskGraph::new(tasks).expect("test graph must be valid")
}

/// A -> {B, C} -> D
pub fn diamond() -> TaskGraph {
    graph(&[("A", &[]), ("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])])
}

/// Executor options with millisecond backoff so retry scenarios stay short.
pub fn fast_options(max_parallel: usize) -> ExecutorOptions {
    ExecutorOptions {
        max_parallel,
        max_retries: 3,
        retry: RetryPolicy {
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            task_timeout: Duration::from_secs(2),
            retry_on_timeout: true,
        },
        critical_priority: 9,
        pause_grace: Duration::from_millis(200),
        shared_ttl: None,
    }
}

pub fn request(topic: &str) -> WorkflowRequest {
    WorkflowRequest::new(topic, vec!["first point".to_string(), "second point".to_string()])
}
