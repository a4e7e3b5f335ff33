#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowdag::exec::{Capability, CapabilityError, CapabilityFuture};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Which task an invocation belongs to. Test graphs put the id under
/// `"task"`; graphs built from the catalog carry `"template"`.
pub fn task_of(input: &Value) -> String {
    input
        .get("task")
        .or_else(|| input.get("template"))
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

/// One entry in an [`InvocationLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Started(String),
    Finished(String),
    Cancelled(String),
}

/// Shared record of what fake capabilities were asked to do.
#[derive(Debug, Default)]
pub struct InvocationLog {
    events: Mutex<Vec<Invocation>>,
    inputs: Mutex<Vec<(String, Value)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl InvocationLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Invocation> {
        self.events.lock().unwrap().clone()
    }

    /// Task ids in the order their attempts started (one entry per attempt).
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Invocation::Started(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn attempts(&self, task: &str) -> usize {
        self.started().iter().filter(|t| t.as_str() == task).count()
    }

    /// Input of the most recent attempt of `task`.
    pub fn last_input(&self, task: &str) -> Option<Value> {
        self.inputs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == task)
            .map(|(_, v)| v.clone())
    }

    /// Highest number of attempts that were in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Index of the first `Finished(task)` event, if any.
    pub fn finished_at(&self, task: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Invocation::Finished(t) if t == task))
    }

    /// Index of the first `Started(task)` event, if any.
    pub fn started_at(&self, task: &str) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| matches!(e, Invocation::Started(t) if t == task))
    }

    fn enter(&self, task: &str, input: &Value) {
        self.events
            .lock()
            .unwrap()
            .push(Invocation::Started(task.to_string()));
        self.inputs
            .lock()
            .unwrap()
            .push((task.to_string(), input.clone()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, event: Invocation) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(event);
    }
}

/// A capability whose behaviour per task is scripted up front.
///
/// - Every attempt sleeps for `latency` (honouring cancellation).
/// - `fail_times(task, n)` makes the first `n` attempts of `task` fail.
/// - `always_fail(task)` makes every attempt of `task` fail.
/// - `hang(task)` makes attempts of `task` sleep forever and ignore
///   cancellation, so only an abort can stop them.
///
/// Successful attempts return `{"content": "<task> done", "task": <task>}`.
pub struct ScriptedCapability {
    name: String,
    latency: Duration,
    failures: Mutex<HashMap<String, u32>>,
    hanging: Vec<String>,
    log: Arc<InvocationLog>,
}

impl ScriptedCapability {
    pub fn new(name: &str, log: Arc<InvocationLog>) -> Self {
        Self {
            name: name.to_string(),
            latency: Duration::from_millis(5),
            failures: Mutex::new(HashMap::new()),
            hanging: Vec::new(),
            log,
        }
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_times(self, task: &str, n: u32) -> Self {
        self.failures.lock().unwrap().insert(task.to_string(), n);
        self
    }

    pub fn always_fail(self, task: &str) -> Self {
        self.fail_times(task, u32::MAX)
    }

    pub fn hang(mut self, task: &str) -> Self {
        self.hanging.push(task.to_string());
        self
    }

    pub fn into_arc(self) -> Arc<dyn Capability> {
        Arc::new(self)
    }

    /// Decrements the remaining failure budget; true if this attempt fails.
    fn should_fail(&self, task: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(task) {
            Some(n) if *n == u32::MAX => true,
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, input: Value, cancel: CancellationToken) -> CapabilityFuture<'_> {
        Box::pin(async move {
            let task = task_of(&input);
            self.log.enter(&task, &input);

            if self.hanging.contains(&task) {
                std::future::pending::<()>().await;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.log.leave(Invocation::Cancelled(task));
                    return Err(CapabilityError::Cancelled);
                }
                _ = tokio::time::sleep(self.latency) => {}
            }

            if self.should_fail(&task) {
                self.log.leave(Invocation::Finished(task.clone()));
                return Err(CapabilityError::Failed(format!("{task} failed on purpose")));
            }

            self.log.leave(Invocation::Finished(task.clone()));
            Ok(json!({ "content": format!("{task} done"), "task": task }))
        })
    }
}
