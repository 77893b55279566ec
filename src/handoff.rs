//! Minimal context passing between workflow phases.
//!
//! Instead of carrying the full execution history forward, each phase
//! exposes only its declared output contract. A downstream phase receives
//! the fold of every strictly-earlier phase's record in the fixed pipeline
//! order, which bounds what a later (token-priced) agent must ingest no
//! matter how much intermediate reasoning happened upstream.

use crate::errors::{HandoffError, StoreError};
use crate::phase::Phase;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const HANDOFF_FILENAME: &str = "context_handoff.json";

/// The minimal context one phase exposes to its successors.
pub type PhaseContext = Map<String, Value>;

/// Required keys per phase. Phases not listed here accept anything.
fn required_keys(phase: &str) -> Option<&'static [&'static str]> {
    match phase {
        "plan" => Some(&["plan_file", "issue_number"]),
        "build" => Some(&["files_changed"]),
        "test" => Some(&["tests_passed"]),
        "review" => Some(&["approved"]),
        "ship" => Some(&["pr_url"]),
        _ => None,
    }
}

/// Validate that handoff data contains a phase's required keys.
pub fn validate_handoff(phase: &str, data: &PhaseContext) -> Result<(), HandoffError> {
    let Some(required) = required_keys(phase) else {
        return Ok(());
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|key| !data.contains_key(**key))
        .map(|key| key.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(HandoffError::SchemaViolation {
            phase: phase.to_string(),
            missing,
        })
    }
}

/// File-backed handoff record, one per workflow identifier.
#[derive(Debug, Clone)]
pub struct ContextHandoff {
    agents_dir: PathBuf,
}

impl ContextHandoff {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
        }
    }

    fn handoff_path(&self, wid: &str) -> PathBuf {
        self.agents_dir.join(wid).join(HANDOFF_FILENAME)
    }

    /// Store a phase's minimal context, validating it against that phase's
    /// schema first. A schema violation is logged and returned; the caller
    /// decides whether it aborts the run.
    pub fn save(&self, wid: &str, phase: &str, data: PhaseContext) -> Result<(), HandoffError> {
        if let Err(e) = validate_handoff(phase, &data) {
            warn!(wid, phase, error = %e, "handoff schema violation");
            return Err(e);
        }

        let mut handoff = self.load_all(wid);
        handoff.insert(phase.to_string(), data);

        let path = self.handoff_path(wid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::DirCreateFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(&handoff).map_err(|source| {
            StoreError::SerializeFailed {
                record: "handoff",
                wid: wid.to_string(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(|source| StoreError::WriteFailed {
            record: "handoff",
            wid: wid.to_string(),
            source,
        })?;
        Ok(())
    }

    /// Load the whole record: phase name → minimal context. Absent or
    /// corrupt files are empty with a warning.
    pub fn load_all(&self, wid: &str) -> BTreeMap<String, PhaseContext> {
        let path = self.handoff_path(wid);
        if !path.exists() {
            return BTreeMap::new();
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(wid, error = %e, "unreadable handoff record, starting empty");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(handoff) => handoff,
            Err(e) => {
                warn!(wid, error = %e, "corrupt handoff record, starting empty");
                BTreeMap::new()
            }
        }
    }

    /// Accumulated context for a phase: the fold of every strictly-earlier
    /// phase's record in the fixed order, later phases overriding earlier
    /// ones on key collision.
    ///
    /// A phase name outside the fixed order folds *all* known phases in
    /// arbitrary order. This "no minimization" mode is an explicit
    /// fallback, not a bug: it is what the out-of-order improvement pass
    /// relies on to see the full accumulated context.
    pub fn load_for_phase(&self, wid: &str, phase: &str) -> PhaseContext {
        let handoff = self.load_all(wid);

        let mut accumulated = PhaseContext::new();
        match Phase::parse(phase) {
            Some(target) => {
                for earlier in target.predecessors() {
                    if let Some(data) = handoff.get(earlier.as_str()) {
                        for (key, value) in data {
                            accumulated.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            None => {
                for data in handoff.values() {
                    for (key, value) in data {
                        accumulated.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        accumulated
    }

    /// The raw record for one phase, if it has saved anything.
    pub fn get_phase(&self, wid: &str, phase: &str) -> Option<PhaseContext> {
        self.load_all(wid).remove(phase)
    }

    /// Delete the whole handoff record for re-runs.
    pub fn clear(&self, wid: &str) -> Result<(), StoreError> {
        let path = self.handoff_path(wid);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::WriteFailed {
                record: "handoff",
                wid: wid.to_string(),
                source,
            })?;
        }
        Ok(())
    }
}
