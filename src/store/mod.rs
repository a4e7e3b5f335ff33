// src/store/mod.rs

//! Persistence for workflow state and shared task outputs.
//!
//! The executor writes through [`StateStore`] after every transition; the
//! coordinator reads from it once a workflow is no longer in memory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::engine::state::WorkflowState;
use crate::errors::Result;
use crate::types::StorageMode;

pub mod file;
pub mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

pub trait StateStore: Send + Sync {
    fn save(&self, state: &WorkflowState) -> Result<()>;

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>>;

    /// Remove the state and shared values. Returns whether anything existed.
    fn delete(&self, workflow_id: &str) -> Result<bool>;

    /// Store a shared value; `ttl` of `None` means it never expires.
    fn set_shared(
        &self,
        workflow_id: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Expired values read as `None`.
    fn get_shared(&self, workflow_id: &str, key: &str) -> Result<Option<Value>>;

    /// Ids of every persisted workflow, sorted.
    fn list(&self) -> Result<Vec<String>>;
}

/// Pick a store implementation from configuration.
pub fn open_store(mode: StorageMode, state_dir: PathBuf) -> Result<Arc<dyn StateStore>> {
    Ok(match mode {
        StorageMode::Memory => Arc::new(MemoryStateStore::new()),
        StorageMode::File => Arc::new(FileStateStore::open(state_dir)?),
    })
}
