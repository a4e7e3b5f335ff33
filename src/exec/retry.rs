// src/exec/retry.rs

use std::time::Duration;

use crate::exec::task_runner::TaskError;

/// Retry, backoff and timeout policy applied to every task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound for a single invocation.
    pub task_timeout: Duration,
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            task_timeout: Duration::from_secs(300),
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    /// Sleep before the retry that follows failure number `retry_count`
    /// (1-based): `base * 2^(retry_count - 1)`, capped at `max_backoff`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `retry_count` failures.
    pub fn should_retry(&self, error: &TaskError, retry_count: u32, max_retries: u32) -> bool {
        match error {
            TaskError::Cancelled => false,
            TaskError::Timeout(_) if !self.retry_on_timeout => false,
            TaskError::Timeout(_) | TaskError::Failed(_) => retry_count < max_retries,
        }
    }
}
