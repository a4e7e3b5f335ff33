// tests/integration/support.rs

use std::sync::Arc;

use flowdag::dag::TaskGraph;
use flowdag::engine::{DagExecutor, ExecutorOptions};
use flowdag::exec::{Capability, CapabilityRegistry};
use flowdag::store::{MemoryStateStore, StateStore};

pub const WORKFLOW_ID: &str = "wf-test";

/// Executor over `graph` with the given providers and an in-memory store.
pub fn executor(
    graph: TaskGraph,
    providers: Vec<Arc<dyn Capability>>,
    options: ExecutorOptions,
) -> (DagExecutor, Arc<MemoryStateStore>) {
    let mut registry = CapabilityRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    let store = Arc::new(MemoryStateStore::new());
    let dyn_store: Arc<dyn StateStore> = store.clone();
    let executor = DagExecutor::new(WORKFLOW_ID, graph, Arc::new(registry), dyn_store, options);
    (executor, store)
}
