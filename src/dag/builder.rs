// src/dag/builder.rs

//! Expansion of the template catalog into a per-request task graph, plus the
//! estimation heuristics shown to users before a run.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::TemplateCatalog;
use crate::coord::WorkflowRequest;
use crate::dag::TaskId;
use crate::dag::graph::TaskGraph;
use crate::dag::task_info::TaskDescriptor;
use crate::errors::Result;

/// Tunables for [`TaskGraphBuilder::estimate_completion_time`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateSettings {
    pub secs_per_cost_unit: u64,
    /// Fraction of the sequential time assumed when tasks overlap.
    pub parallel_factor: f64,
}

impl Default for EstimateSettings {
    fn default() -> Self {
        Self {
            secs_per_cost_unit: 60,
            parallel_factor: 0.5,
        }
    }
}

/// Rough ETA for a graph. Not a scheduling guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompletionEstimate {
    pub total_cost_units: u64,
    pub sequential_secs: u64,
    pub parallel_secs: u64,
}

pub struct TaskGraphBuilder {
    catalog: TemplateCatalog,
    estimate: EstimateSettings,
}

impl TaskGraphBuilder {
    pub fn new(catalog: TemplateCatalog, estimate: EstimateSettings) -> Self {
        Self { catalog, estimate }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Build one descriptor per template, in catalog order, bound to the
    /// request. The request is assumed to be validated already.
    pub fn decompose(&self, request: &WorkflowRequest, max_retries: u32) -> Result<TaskGraph> {
        let mut tasks = Vec::with_capacity(self.catalog.len());
        for template in self.catalog.templates() {
            let mut input = Map::new();
            input.insert("topic".into(), Value::String(request.topic.clone()));
            input.insert("key_points".into(), json!(request.key_points));
            input.insert(
                "preferences".into(),
                Value::Object(request.preferences.clone()),
            );
            input.insert("stage".into(), Value::String(template.stage.clone()));
            input.insert("estimated_cost".into(), json!(template.cost_units));
            input.insert("template".into(), Value::String(template.key.clone()));

            // Task ids are the template keys, so `after` resolves as-is.
            let mut task = TaskDescriptor::new(
                template.key.clone(),
                template.name.clone(),
                template.capability.clone(),
            )
            .with_dependencies(template.after.iter().cloned())
            .with_priority(template.priority)
            .with_stage(template.stage.clone())
            .with_max_retries(max_retries);
            task.cost_units = template.cost_units;
            task.input_parameters = input;
            tasks.push(task);
        }

        let graph = TaskGraph::new(tasks)?;
        debug!(tasks = graph.len(), topic = %request.topic, "decomposed request into task graph");
        Ok(graph)
    }

    /// Task ids ordered by the longest chain of work hanging off each task,
    /// then priority, both descending; declaration order breaks ties.
    ///
    /// A heuristic for display; the executor does not use it.
    pub fn critical_path(&self, graph: &TaskGraph) -> Vec<TaskId> {
        let chain = chain_lengths(graph);
        let mut ids: Vec<(usize, &TaskDescriptor)> = graph.tasks().iter().enumerate().collect();
        ids.sort_by(|(ia, a), (ib, b)| {
            let ca = chain.get(a.id.as_str()).copied().unwrap_or(1);
            let cb = chain.get(b.id.as_str()).copied().unwrap_or(1);
            cb.cmp(&ca)
                .then(b.priority.cmp(&a.priority))
                .then(ia.cmp(ib))
        });
        ids.into_iter().map(|(_, t)| t.id.clone()).collect()
    }

    pub fn estimate_completion_time(&self, graph: &TaskGraph) -> CompletionEstimate {
        let total_cost_units: u64 = graph.tasks().iter().map(|t| u64::from(t.cost_units)).sum();
        let sequential_secs = total_cost_units * self.estimate.secs_per_cost_unit;
        let parallel_secs = (sequential_secs as f64 * self.estimate.parallel_factor).round() as u64;
        CompletionEstimate {
            total_cost_units,
            sequential_secs,
            parallel_secs,
        }
    }
}

/// Number of tasks on the longest path starting at each task and following
/// dependents down to a sink.
fn chain_lengths(graph: &TaskGraph) -> HashMap<&str, usize> {
    let mut lengths: HashMap<&str, usize> = HashMap::new();
    // Reverse topological order sees dependents first. An error here is
    // impossible for a constructed graph; fall back to declaration order.
    let order = graph
        .topological_order()
        .unwrap_or_else(|_| graph.task_ids().map(str::to_string).collect());
    for id in order.iter().rev() {
        let Some(task) = graph.get(id) else { continue };
        let longest_below = graph
            .dependents_of(id)
            .iter()
            .filter_map(|d| lengths.get(d.as_str()))
            .max()
            .copied()
            .unwrap_or(0);
        lengths.insert(task.id.as_str(), longest_below + 1);
    }
    lengths
}
