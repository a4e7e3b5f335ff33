// src/store/file.rs

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::engine::state::WorkflowState;
use crate::errors::{FlowdagError, Result};
use crate::store::StateStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SharedRecord {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// One JSON file per workflow under `<root>/workflows/`, shared values under
/// `<root>/shared/`.
///
/// Every write goes to a temporary sibling first and is then renamed over
/// the target, so readers never see a half-written record.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Create the directory layout if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("workflows"))?;
        fs::create_dir_all(root.join("shared"))?;
        debug!(root = %root.display(), "opened file state store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, workflow_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("workflows")
            .join(format!("{}.json", checked_id(workflow_id)?)))
    }

    fn shared_path(&self, workflow_id: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("shared")
            .join(format!("{}.json", checked_id(workflow_id)?)))
    }

    fn read_shared(&self, workflow_id: &str) -> Result<BTreeMap<String, SharedRecord>> {
        let path = self.shared_path(workflow_id)?;
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Ids become file names; refuse anything that could escape the directory.
fn checked_id(workflow_id: &str) -> Result<&str> {
    let ok = !workflow_id.is_empty()
        && workflow_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(workflow_id)
    } else {
        Err(FlowdagError::Store(format!(
            "invalid workflow id for file store: {workflow_id:?}"
        )))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

impl StateStore for FileStateStore {
    fn save(&self, state: &WorkflowState) -> Result<()> {
        let path = self.state_path(&state.workflow_id)?;
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &json)?;
        debug!(workflow_id = %state.workflow_id, status = %state.status, "persisted workflow state");
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>> {
        let path = self.state_path(workflow_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn delete(&self, workflow_id: &str) -> Result<bool> {
        let mut removed = false;
        for path in [self.state_path(workflow_id)?, self.shared_path(workflow_id)?] {
            if path.exists() {
                fs::remove_file(&path)?;
                removed = true;
            }
        }
        if removed {
            info!(workflow_id, "deleted persisted workflow");
        }
        Ok(removed)
    }

    fn set_shared(
        &self,
        workflow_id: &str,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut records = self.read_shared(workflow_id)?;
        let expires_at = match ttl {
            Some(ttl) => Some(
                Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| FlowdagError::Store(format!("ttl out of range: {e}")))?,
            ),
            None => None,
        };
        records.insert(
            key.to_string(),
            SharedRecord {
                value: value.clone(),
                expires_at,
            },
        );
        let json = serde_json::to_vec_pretty(&records)?;
        write_atomic(&self.shared_path(workflow_id)?, &json)
    }

    fn get_shared(&self, workflow_id: &str, key: &str) -> Result<Option<Value>> {
        let records = self.read_shared(workflow_id)?;
        Ok(records.get(key).and_then(|r| match r.expires_at {
            Some(at) if at <= Utc::now() => None,
            _ => Some(r.value.clone()),
        }))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("workflows"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
