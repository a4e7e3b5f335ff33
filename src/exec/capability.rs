// src/exec/capability.rs

//! Capability providers: the code that performs a task's work.
//!
//! The executor only sees the [`Capability`] trait. Providers are looked up
//! by name in a [`CapabilityRegistry`] that is built once and then shared
//! read-only.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Provider names that can be referenced as `builtin = "..."` in config.
pub const BUILTIN_CAPABILITIES: &[&str] = &["echo"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability failed: {0}")]
    Failed(String),

    #[error("capability invocation cancelled")]
    Cancelled,
}

pub type CapabilityFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, CapabilityError>> + Send + 'a>>;

/// A named unit of work.
///
/// `invoke` receives the task input as JSON and a cancellation token. A
/// provider should return promptly once the token is cancelled; the executor
/// drops the future after a grace period either way.
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, input: Value, cancel: CancellationToken) -> CapabilityFuture<'_>;
}

/// Name -> provider lookup.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    providers: BTreeMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn Capability>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Register a provider under an explicit name.
    pub fn register_as(&mut self, name: impl Into<String>, provider: Arc<dyn Capability>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn Capability>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|s| s.as_str())
    }

    /// Names from `required` that have no provider, sorted.
    pub fn missing<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        required
            .into_iter()
            .filter(|name| !self.contains(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Returns a short content fragment built from the input. Used for dry
/// wiring and tests.
#[derive(Debug, Clone)]
pub struct EchoCapability {
    name: String,
}

impl EchoCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Capability for EchoCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, input: Value, cancel: CancellationToken) -> CapabilityFuture<'_> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Cancelled);
            }
            let topic = input.get("topic").and_then(Value::as_str).unwrap_or("");
            let stage = input
                .get("stage")
                .and_then(Value::as_str)
                .unwrap_or(self.name.as_str());
            Ok(json!({
                "content": format!("{stage} for {topic}"),
                "capability": self.name,
            }))
        })
    }
}
