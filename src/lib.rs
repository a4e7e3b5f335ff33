// src/lib.rs

pub mod cli;
pub mod config;
pub mod coord;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate, load_or_default};
use crate::coord::{Coordinator, WorkflowRequest};
use crate::dag::TaskGraphBuilder;
use crate::exec::{CapabilityRegistry, CommandCapability, EchoCapability};
use crate::store::open_store;
use crate::types::WorkflowStatus;

const DEFAULT_CONFIG: &str = "Flowdag.toml";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - capability registry and state store
/// - the coordinator, which owns the executor
/// - status polling and Ctrl-C cancellation
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_config(&args.config)?;
    let request = build_request(&args);

    if args.dry_run {
        print_dry_run(&cfg, &request)?;
        return Ok(());
    }

    let registry = Arc::new(build_registry(&cfg, args.echo_missing));
    let store = open_store(cfg.coordinator.storage, cfg.coordinator.state_dir.clone())?;
    let coordinator = Coordinator::new(
        cfg.catalog().clone(),
        registry,
        store,
        cfg.coordinator_settings(),
        cfg.executor_options(),
    )
    .with_estimate(cfg.estimate_settings());

    let workflow_id = coordinator.submit(request)?;
    let poll = Duration::from_millis(args.poll_ms.max(10));
    let mut last_progress = -1.0;

    let report = loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => {
                        warn!(workflow_id = %workflow_id, "Ctrl-C received; cancelling workflow");
                        if let Err(e) = coordinator.cancel(&workflow_id) {
                            debug!(error = %e, "cancel request not applied");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
                }
            }
            _ = tokio::time::sleep(poll) => {}
        }

        let report = coordinator.status(&workflow_id)?;
        if report.progress_percentage != last_progress {
            last_progress = report.progress_percentage;
            info!(
                workflow_id = %workflow_id,
                progress = report.progress_percentage,
                stage = report.current_stage.as_deref().unwrap_or("-"),
                completed = report.counts.completed,
                active = report.counts.active,
                "progress"
            );
        }
        if report.is_terminal() {
            break report;
        }
    };

    match report.status {
        WorkflowStatus::Completed => {
            let document = coordinator.assemble_result(&workflow_id)?;
            println!("{}", serde_json::to_string_pretty(&document)?);
            Ok(())
        }
        status => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            bail!(
                "workflow {workflow_id} ended as {status}: {}",
                report.error.as_deref().unwrap_or("no error recorded")
            )
        }
    }
}

/// The default path may be absent; an explicit one must exist.
fn load_config(path: &str) -> Result<ConfigFile> {
    let cfg = if path == DEFAULT_CONFIG {
        load_or_default(Path::new(path))?
    } else {
        load_and_validate(Path::new(path))?
    };
    Ok(cfg)
}

fn build_request(args: &CliArgs) -> WorkflowRequest {
    let mut request = WorkflowRequest::new(args.topic.clone(), args.key_points.clone());
    for (key, value) in args.preferences.iter() {
        request.preferences.insert(key.clone(), value.clone());
    }
    request
}

/// Providers from `[capability.<name>]`, plus echo fallbacks when asked.
pub fn build_registry(cfg: &ConfigFile, echo_missing: bool) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    for (name, cap) in cfg.capability.iter() {
        match (&cap.cmd, &cap.builtin) {
            (Some(cmd), _) => registry.register(Arc::new(CommandCapability::new(name, cmd))),
            (None, Some(_)) => registry.register(Arc::new(EchoCapability::new(name))),
            (None, None) => {}
        }
    }

    if echo_missing {
        for name in registry.missing(cfg.catalog().capabilities()) {
            debug!(capability = %name, "no provider configured; using echo");
            registry.register(Arc::new(EchoCapability::new(name)));
        }
    }
    registry
}

/// Print the decomposed graph, critical path and ETA without executing.
fn print_dry_run(cfg: &ConfigFile, request: &WorkflowRequest) -> Result<()> {
    request.validate(&cfg.coordinator_settings())?;

    let builder = TaskGraphBuilder::new(cfg.catalog().clone(), cfg.estimate_settings());
    let graph = builder.decompose(request, cfg.executor.max_retries)?;

    println!("flowdag dry-run");
    println!("  topic = {:?}", request.topic);
    println!("  max_parallel_tasks = {}", cfg.executor.max_parallel_tasks);
    println!("  max_retries = {}", cfg.executor.max_retries);
    println!();

    println!("tasks ({}):", graph.len());
    for task in graph.tasks() {
        println!("  - {} [{}]", task.id, task.name);
        println!("      capability: {}", task.capability);
        println!("      stage: {}", task.stage);
        println!("      priority: {}", task.priority);
        println!("      cost_units: {}", task.cost_units);
        if !task.dependencies.is_empty() {
            println!("      after: {:?}", task.dependencies);
        }
        if let Some(cap) = cfg.capability.get(&task.capability) {
            if let Some(ref cmd) = cap.cmd {
                println!("      cmd: {cmd}");
            }
        }
    }
    println!();

    println!("critical path: {}", builder.critical_path(&graph).join(" -> "));
    let eta = builder.estimate_completion_time(&graph);
    println!(
        "estimate: {} cost units, ~{}s sequential, ~{}s parallel",
        eta.total_cost_units, eta.sequential_secs, eta.parallel_secs
    );

    debug!("dry-run complete (no execution)");
    Ok(())
}
