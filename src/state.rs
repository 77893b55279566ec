//! Durable per-workflow state.
//!
//! One `workflow_state.json` per workflow identifier, holding the scalar
//! fields phases need to find each other's artifacts plus an append-only
//! log of phase names that have run. Persistence is the sole source of
//! truth: a new process instance reloads from storage before trusting
//! anything, which is what makes re-invocation with the same identifier
//! resume instead of restart.

use crate::errors::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STATE_FILENAME: &str = "workflow_state.json";

/// Model selection profile consulted by the agent transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    #[default]
    Base,
    Heavy,
}

/// The persistent record for one workflow run.
///
/// Fields are monotonically added or overwritten, never silently dropped;
/// `workflow_history` only grows. Unknown scalar fields survive round-trips
/// through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub wid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_port: Option<u16>,
    #[serde(default)]
    pub model_profile: ModelProfile,
    #[serde(default)]
    pub workflow_history: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl WorkflowState {
    pub fn new(wid: &str) -> Self {
        Self {
            wid: wid.to_string(),
            ..Default::default()
        }
    }

    /// The effective working directory: the isolated worktree when one is
    /// recorded, otherwise the given fallback (the main checkout).
    pub fn working_directory(&self, fallback: &Path) -> PathBuf {
        self.worktree_path
            .clone()
            .unwrap_or_else(|| fallback.to_path_buf())
    }
}

/// File-backed store for `WorkflowState` records, rooted at an agents
/// directory. Concurrent workflow identifiers live in disjoint
/// subdirectories and need no coordination; exactly one orchestrator
/// process owns a given identifier at a time.
#[derive(Debug, Clone)]
pub struct StateStore {
    agents_dir: PathBuf,
}

impl StateStore {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
        }
    }

    pub fn state_path(&self, wid: &str) -> PathBuf {
        self.agents_dir.join(wid).join(STATE_FILENAME)
    }

    /// Load the record for a workflow. A missing record is an empty one,
    /// never an error; a corrupt record is treated as empty with a warning.
    pub fn load(&self, wid: &str) -> WorkflowState {
        let path = self.state_path(wid);
        if !path.exists() {
            return WorkflowState::new(wid);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(wid, error = %e, "unreadable state record, starting empty");
                return WorkflowState::new(wid);
            }
        };

        match serde_json::from_str::<WorkflowState>(&content) {
            Ok(mut state) => {
                if state.wid.is_empty() {
                    state.wid = wid.to_string();
                }
                state
            }
            Err(e) => {
                warn!(wid, error = %e, "corrupt state record, starting empty");
                WorkflowState::new(wid)
            }
        }
    }

    /// Read-modify-write: load the record, apply the mutation, persist the
    /// whole record, and return the merged result.
    pub fn update<F>(&self, wid: &str, mutate: F) -> Result<WorkflowState, StoreError>
    where
        F: FnOnce(&mut WorkflowState),
    {
        let mut state = self.load(wid);
        mutate(&mut state);
        self.save(wid, &state, None)?;
        Ok(state)
    }

    /// Append a phase name to the workflow history. The log is raw and
    /// append-only: a re-run phase appears twice.
    pub fn append_history(&self, wid: &str, phase_name: &str) -> Result<WorkflowState, StoreError> {
        self.update(wid, |state| {
            state.workflow_history.push(phase_name.to_string());
        })
    }

    /// Persist the full record as pretty-printed JSON, recording which
    /// phase triggered the write for the audit trail.
    pub fn save(
        &self,
        wid: &str,
        state: &WorkflowState,
        workflow_step: Option<&str>,
    ) -> Result<(), StoreError> {
        let path = self.state_path(wid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::DirCreateFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json =
            serde_json::to_string_pretty(state).map_err(|source| StoreError::SerializeFailed {
                record: "state",
                wid: wid.to_string(),
                source,
            })?;

        fs::write(&path, json).map_err(|source| StoreError::WriteFailed {
            record: "state",
            wid: wid.to_string(),
            source,
        })?;

        if let Some(step) = workflow_step {
            info!(wid, step, "state saved");
        }
        Ok(())
    }
}
