// src/exec/task_runner.rs

//! Runs one dispatched task to a final result: invoke, time out, back off,
//! retry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::state::TaskResult;
use crate::exec::capability::{Capability, CapabilityError, CapabilityRegistry};
use crate::exec::retry::RetryPolicy;

/// Why a single attempt did not produce an output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// What the executor gets back from [`run_task`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// Succeeded, or failed for good after exhausting retries.
    Finished(TaskResult),
    /// Cancelled mid-attempt or mid-backoff; the attempt is discarded.
    Interrupted,
    /// No provider is registered for the task's capability.
    MissingCapability(String),
}

/// Run `task` until it succeeds, runs out of retries, or `cancel` fires.
///
/// `retry_count` counts failed attempts. After failure number `n` another
/// attempt is made while `n < max_retries`, following a sleep of
/// [`RetryPolicy::delay_for`]`(n)`.
pub async fn run_task(
    task: ScheduledTask,
    registry: Arc<CapabilityRegistry>,
    policy: RetryPolicy,
    cancel: CancellationToken,
) -> RunReport {
    let Some(provider) = registry.get(&task.capability) else {
        warn!(task = %task.id, capability = %task.capability, "no provider registered for capability");
        return RunReport::MissingCapability(task.capability);
    };

    let started = Instant::now();
    let mut retry_count: u32 = 0;
    let mut backoff_ms: Vec<u64> = Vec::new();

    loop {
        let attempt = retry_count + 1;
        debug!(task = %task.id, attempt, seq = task.seq, "invoking capability");

        let error = match attempt_once(provider.as_ref(), task.input.clone(), &policy, &cancel).await
        {
            Ok(output) => {
                info!(task = %task.id, attempt, "task attempt succeeded");
                let mut result = TaskResult::succeeded(task.id.clone(), output);
                result.retry_count = retry_count;
                result.backoff_ms = backoff_ms;
                result.duration_ms = elapsed_ms(started);
                return RunReport::Finished(result);
            }
            Err(TaskError::Cancelled) => {
                info!(task = %task.id, attempt, "task attempt interrupted");
                return RunReport::Interrupted;
            }
            Err(error) => error,
        };

        retry_count += 1;
        if !policy.should_retry(&error, retry_count, task.max_retries) {
            warn!(task = %task.id, attempt, error = %error, "task failed; no retries left");
            let mut result = TaskResult::failed(task.id.clone(), error.to_string());
            result.retry_count = retry_count;
            result.backoff_ms = backoff_ms;
            result.duration_ms = elapsed_ms(started);
            return RunReport::Finished(result);
        }

        let delay = policy.delay_for(retry_count);
        warn!(
            task = %task.id,
            attempt,
            error = %error,
            backoff_ms = delay.as_millis() as u64,
            "task attempt failed; backing off"
        );
        backoff_ms.push(delay.as_millis() as u64);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(task = %task.id, "cancelled during backoff");
                return RunReport::Interrupted;
            }
            _ = sleep(delay) => {}
        }
    }
}

async fn attempt_once(
    provider: &dyn Capability,
    input: Value,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Value, TaskError> {
    let invocation = provider.invoke(input, cancel.clone());

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskError::Cancelled),
        res = timeout(policy.task_timeout, invocation) => match res {
            Err(_) => Err(TaskError::Timeout(policy.task_timeout)),
            Ok(Ok(output)) => Ok(output),
            Ok(Err(CapabilityError::Cancelled)) if cancel.is_cancelled() => Err(TaskError::Cancelled),
            Ok(Err(e)) => Err(TaskError::Failed(e.to_string())),
        },
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
