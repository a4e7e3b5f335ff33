// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::catalog::{TemplateCatalog, TemplateSpec};
use crate::coord::CoordinatorSettings;
use crate::dag::EstimateSettings;
use crate::engine::ExecutorOptions;
use crate::exec::RetryPolicy;
use crate::types::StorageMode;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [executor]
/// max_parallel_tasks = 3
///
/// [coordinator]
/// storage = "file"
///
/// [[template]]
/// key = "research"
/// capability = "researcher"
/// priority = 10
///
/// [capability.researcher]
/// cmd = "./research.sh"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub executor: ExecutorSection,

    #[serde(default)]
    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub estimate: EstimateSection,

    /// Ordered task templates from `[[template]]`. Empty means "use the
    /// built-in catalog".
    #[serde(default)]
    pub template: Vec<TemplateConfig>,

    /// Capability providers from `[capability.<name>]`.
    #[serde(default)]
    pub capability: BTreeMap<String, CapabilityConfig>,
}

/// A validated configuration. Only obtainable through
/// `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub executor: ExecutorSection,
    pub coordinator: CoordinatorSection,
    pub estimate: EstimateSection,
    pub capability: BTreeMap<String, CapabilityConfig>,
    catalog: TemplateCatalog,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, catalog: TemplateCatalog) -> Self {
        Self {
            executor: raw.executor,
            coordinator: raw.coordinator,
            estimate: raw.estimate,
            capability: raw.capability,
            catalog,
        }
    }

    /// The template catalog in effect (custom or built-in).
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        let e = &self.executor;
        ExecutorOptions {
            max_parallel: e.max_parallel_tasks,
            max_retries: e.max_retries,
            retry: RetryPolicy {
                base_backoff: Duration::from_millis(e.base_backoff_ms),
                max_backoff: Duration::from_millis(e.max_backoff_ms),
                task_timeout: Duration::from_secs(e.task_timeout_secs),
                retry_on_timeout: e.retry_on_timeout,
            },
            critical_priority: e.critical_priority,
            pause_grace: Duration::from_millis(e.pause_grace_ms),
            shared_ttl: Some(Duration::from_secs(self.coordinator.shared_ttl_secs)),
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            min_topic_length: self.coordinator.min_topic_length,
            min_key_points: self.coordinator.min_key_points,
        }
    }

    pub fn estimate_settings(&self) -> EstimateSettings {
        EstimateSettings {
            secs_per_cost_unit: self.estimate.secs_per_cost_unit,
            parallel_factor: self.estimate.parallel_factor,
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    /// Total attempts per task before it is recorded as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles for every further retry.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Whether a provider timeout consumes a retry (true) or fails the task
    /// straight away (false).
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,

    /// Tasks at or above this priority fail the whole workflow when they
    /// fail or become unreachable.
    #[serde(default = "default_critical_priority")]
    pub critical_priority: u8,

    /// How long `pause` waits for running tasks to honour cancellation.
    #[serde(default = "default_pause_grace_ms")]
    pub pause_grace_ms: u64,
}

fn default_max_parallel_tasks() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_critical_priority() -> u8 {
    9
}

fn default_pause_grace_ms() -> u64 {
    2000
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            task_timeout_secs: default_task_timeout_secs(),
            retry_on_timeout: true,
            critical_priority: default_critical_priority(),
            pause_grace_ms: default_pause_grace_ms(),
        }
    }
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_min_topic_length")]
    pub min_topic_length: usize,

    #[serde(default = "default_min_key_points")]
    pub min_key_points: usize,

    #[serde(default)]
    pub storage: StorageMode,

    /// Root directory for the file store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Advisory TTL for shared task outputs.
    #[serde(default = "default_shared_ttl_secs")]
    pub shared_ttl_secs: u64,
}

fn default_min_topic_length() -> usize {
    3
}

fn default_min_key_points() -> usize {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".flowdag")
}

fn default_shared_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            min_topic_length: default_min_topic_length(),
            min_key_points: default_min_key_points(),
            storage: StorageMode::default(),
            state_dir: default_state_dir(),
            shared_ttl_secs: default_shared_ttl_secs(),
        }
    }
}

/// `[estimate]` section. Feeds the ETA heuristics only.
#[derive(Debug, Clone, Deserialize)]
pub struct EstimateSection {
    #[serde(default = "default_secs_per_cost_unit")]
    pub secs_per_cost_unit: u64,

    /// Fraction of the sequential time assumed when tasks overlap.
    #[serde(default = "default_parallel_factor")]
    pub parallel_factor: f64,
}

fn default_secs_per_cost_unit() -> u64 {
    60
}

fn default_parallel_factor() -> f64 {
    0.5
}

impl Default for EstimateSection {
    fn default() -> Self {
        Self {
            secs_per_cost_unit: default_secs_per_cost_unit(),
            parallel_factor: default_parallel_factor(),
        }
    }
}

/// One `[[template]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// Template key; becomes the task id inside each graph.
    pub key: String,

    /// Human-readable name (defaults to the key).
    #[serde(default)]
    pub name: Option<String>,

    pub capability: String,

    /// Stage label reported as `current_stage` (defaults to the key).
    #[serde(default)]
    pub stage: Option<String>,

    #[serde(default = "default_template_priority")]
    pub priority: u8,

    #[serde(default = "default_cost_units")]
    pub cost_units: u32,

    /// Keys of templates that must succeed first.
    #[serde(default)]
    pub after: Vec<String>,
}

fn default_template_priority() -> u8 {
    5
}

fn default_cost_units() -> u32 {
    1
}

impl From<&TemplateConfig> for TemplateSpec {
    fn from(cfg: &TemplateConfig) -> Self {
        TemplateSpec {
            key: cfg.key.clone(),
            name: cfg.name.clone().unwrap_or_else(|| cfg.key.clone()),
            capability: cfg.capability.clone(),
            stage: cfg.stage.clone().unwrap_or_else(|| cfg.key.clone()),
            priority: cfg.priority,
            cost_units: cfg.cost_units,
            after: cfg.after.clone(),
        }
    }
}

/// `[capability.<name>]` section: how the CLI provides a capability.
///
/// Exactly one of `cmd` / `builtin` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityConfig {
    /// Shell command; receives the task input as JSON on stdin.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Name of a provider compiled into flowdag (currently `"echo"`).
    #[serde(default)]
    pub builtin: Option<String>,
}
