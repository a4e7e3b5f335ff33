// src/exec/command.rs

//! Capability backed by a shell command.

use std::process::Stdio;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::capability::{Capability, CapabilityError, CapabilityFuture};

/// Runs `sh -c <cmd>` per invocation.
///
/// - The task input is written to stdin as JSON.
/// - Stdout is parsed as JSON; anything else is wrapped as
///   `{"content": <stdout>}`.
/// - A non-zero exit is a failure carrying the tail of stderr.
/// - Cancellation kills the child.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    name: String,
    cmd: String,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
        }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, input: Value, cancel: CancellationToken) -> Result<Value, CapabilityError> {
        info!(capability = %self.name, cmd = %self.cmd, "starting capability process");

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            CapabilityError::Failed(format!("spawning '{}' for '{}': {e}", self.cmd, self.name))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&input)
                .map_err(|e| CapabilityError::Failed(format!("encoding input: {e}")))?;
            let name = self.name.clone();
            // Written from its own task so a child that never reads stdin
            // cannot stall us.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(capability = %name, error = %e, "child closed stdin early");
                }
            });
        }

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                info!(capability = %self.name, "cancellation requested; killing process");
                // Dropping the wait future drops the child (kill_on_drop).
                return Err(CapabilityError::Cancelled);
            }
            res = child.wait_with_output() => res.map_err(|e| {
                CapabilityError::Failed(format!("waiting for '{}': {e}", self.cmd))
            })?,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            debug!(capability = %self.name, "stderr: {}", line);
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(capability = %self.name, exit_code = code, "capability process failed");
            let tail: String = stderr.lines().last().unwrap_or("").to_string();
            return Err(CapabilityError::Failed(format!(
                "'{}' exited with code {code}{}",
                self.cmd,
                if tail.is_empty() {
                    String::new()
                } else {
                    format!(": {tail}")
                }
            )));
        }

        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Capability for CommandCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, input: Value, cancel: CancellationToken) -> CapabilityFuture<'_> {
        Box::pin(self.run(input, cancel))
    }
}

fn parse_stdout(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if !trimmed.is_empty() => value,
        _ => json!({ "content": trimmed }),
    }
}
