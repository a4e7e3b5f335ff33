// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::catalog::{TemplateCatalog, TemplateSpec};
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FlowdagError, GraphError, Result};
use crate::exec::BUILTIN_CAPABILITIES;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let catalog = if raw.template.is_empty() {
            TemplateCatalog::builtin()
        } else {
            TemplateCatalog::new(raw.template.iter().map(TemplateSpec::from).collect())?
        };
        Ok(ConfigFile::new_unchecked(raw, catalog))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_executor(cfg)?;
    validate_coordinator(cfg)?;
    validate_estimate(cfg)?;
    validate_capabilities(cfg)?;
    Ok(())
}

fn validate_executor(cfg: &RawConfigFile) -> Result<()> {
    let e = &cfg.executor;

    if e.max_parallel_tasks == 0 {
        return Err(FlowdagError::ConfigError(
            "[executor].max_parallel_tasks must be >= 1 (got 0)".to_string(),
        ));
    }
    if e.max_backoff_ms < e.base_backoff_ms {
        return Err(FlowdagError::ConfigError(format!(
            "[executor].max_backoff_ms ({}) must be >= base_backoff_ms ({})",
            e.max_backoff_ms, e.base_backoff_ms
        )));
    }
    if e.task_timeout_secs == 0 {
        return Err(FlowdagError::ConfigError(
            "[executor].task_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if !(1..=10).contains(&e.critical_priority) {
        return Err(FlowdagError::ConfigError(format!(
            "[executor].critical_priority must be within 1..=10 (got {})",
            e.critical_priority
        )));
    }
    Ok(())
}

fn validate_coordinator(cfg: &RawConfigFile) -> Result<()> {
    if cfg.coordinator.shared_ttl_secs == 0 {
        return Err(FlowdagError::ConfigError(
            "[coordinator].shared_ttl_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_estimate(cfg: &RawConfigFile) -> Result<()> {
    let factor = cfg.estimate.parallel_factor;
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(FlowdagError::ConfigError(format!(
            "[estimate].parallel_factor must be within (0, 1] (got {factor})"
        )));
    }
    Ok(())
}

fn validate_capabilities(cfg: &RawConfigFile) -> Result<()> {
    for (name, cap) in cfg.capability.iter() {
        match (&cap.cmd, &cap.builtin) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(FlowdagError::ConfigError(format!(
                    "capability '{name}' must set exactly one of `cmd` or `builtin`"
                )));
            }
            (Some(cmd), None) if cmd.trim().is_empty() => {
                return Err(FlowdagError::ConfigError(format!(
                    "capability '{name}' has an empty `cmd`"
                )));
            }
            (None, Some(builtin)) if !BUILTIN_CAPABILITIES.contains(&builtin.as_str()) => {
                return Err(FlowdagError::ConfigError(format!(
                    "capability '{name}' uses unknown builtin '{builtin}' (known: {BUILTIN_CAPABILITIES:?})"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate a template table: non-empty, unique keys, priorities within
/// 1..=10, every `after` known, no self-dependency and no cycles.
pub fn validate_catalog(templates: &[TemplateSpec]) -> Result<()> {
    if templates.is_empty() {
        return Err(FlowdagError::ConfigError(
            "template catalog must contain at least one template".to_string(),
        ));
    }

    let mut keys = HashSet::new();
    for t in templates {
        if !keys.insert(t.key.as_str()) {
            return Err(GraphError::DuplicateTask(t.key.clone()).into());
        }
        if !(1..=10).contains(&t.priority) {
            return Err(FlowdagError::ConfigError(format!(
                "template '{}' has priority {} (expected 1..=10)",
                t.key, t.priority
            )));
        }
        if t.capability.trim().is_empty() {
            return Err(FlowdagError::ConfigError(format!(
                "template '{}' has an empty capability",
                t.key
            )));
        }
    }

    for t in templates {
        for dep in t.after.iter() {
            if dep == &t.key {
                return Err(GraphError::SelfDependency(t.key.clone()).into());
            }
            if !keys.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    task: t.key.clone(),
                    dependency: dep.clone(),
                }
                .into());
            }
        }
    }

    // Edge direction: dep -> template.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for t in templates {
        graph.add_node(t.key.as_str());
    }
    for t in templates {
        for dep in t.after.iter() {
            graph.add_edge(dep.as_str(), t.key.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string()).into()),
    }
}
