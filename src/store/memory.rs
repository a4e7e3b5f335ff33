// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::engine::state::WorkflowState;
use crate::errors::{FlowdagError, Result};
use crate::store::StateStore;

struct SharedEntry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    states: BTreeMap<String, WorkflowState>,
    shared: HashMap<String, HashMap<String, SharedEntry>>,
}

/// Keeps everything in process memory. Used by tests and one-shot CLI runs.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| FlowdagError::Store("memory store lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, state: &WorkflowState) -> Result<()> {
        self.lock()?
            .states
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        Ok(self.lock()?.states.get(workflow_id).cloned())
    }

    fn delete(&self, workflow_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let had_state = inner.states.remove(workflow_id).is_some();
        let had_shared = inner.shared.remove(workflow_id).is_some();
        Ok(had_state || had_shared)
    }

    fn set_shared(
        &self,
        workflow_id: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let entry = SharedEntry {
            value: value.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.lock()?
            .shared
            .entry(workflow_id.to_string())
            .or_default()
            .insert(key.to_string(), entry);
        Ok(())
    }

    fn get_shared(&self, workflow_id: &str, key: &str) -> Result<Option<Value>> {
        let mut inner = self.lock()?;
        let Some(entries) = inner.shared.get_mut(workflow_id) else {
            return Ok(None);
        };
        let expired = matches!(
            entries.get(key),
            Some(SharedEntry { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            debug!(workflow_id, key, "shared value expired");
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.states.keys().cloned().collect())
    }
}
