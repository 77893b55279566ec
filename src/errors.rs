//! Typed error hierarchy for the stagehand coordination layer.
//!
//! Four top-level enums cover the four subsystems:
//! - `StoreError` — persisted state/handoff/metrics records
//! - `HandoffError` — inter-phase context validation
//! - `AllocationError` — port and worktree allocation
//! - `PhaseError` — phase execution failures at the orchestrator boundary

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the persistence layer. Absent or corrupt records on *read*
/// are not errors — stores treat them as empty and warn. Write failures are
/// fatal: no partial-state recovery is attempted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write {record} record for workflow {wid}: {source}")]
    WriteFailed {
        record: &'static str,
        wid: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {record} record for workflow {wid}: {source}")]
    SerializeFailed {
        record: &'static str,
        wid: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to create workflow directory {path}: {source}")]
    DirCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from handoff validation between phases.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Handoff data for phase '{phase}' is missing required keys: {}", missing.join(", "))]
    SchemaViolation { phase: String, missing: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the isolation allocator (ports and worktrees).
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("No available port pair in the allocated range for workflow {wid}")]
    NoAvailablePorts { wid: String },

    #[error("Failed to create worktree at {path}: {message}")]
    WorktreeCreateFailed { path: PathBuf, message: String },

    #[error("Failed to remove worktree at {path}: {message}")]
    WorktreeRemoveFailed { path: PathBuf, message: String },

    #[error("Failed to write port environment at {path}: {source}")]
    EnvWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run git: {0}")]
    GitSpawnFailed(#[source] std::io::Error),
}

/// Errors from a single phase execution, detected at the orchestrator
/// boundary immediately after each blocking transport call.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Phase '{phase}' failed: {output}")]
    HardPhaseFailed { phase: String, output: String },

    #[error("Agent transport error in phase '{phase}': {source}")]
    Transport {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violation_lists_missing_keys() {
        let err = HandoffError::SchemaViolation {
            phase: "plan".to_string(),
            missing: vec!["plan_file".to_string(), "issue_number".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("plan_file, issue_number"));
        assert!(msg.contains("'plan'"));
    }

    #[test]
    fn store_error_write_failed_carries_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err = StoreError::WriteFailed {
            record: "state",
            wid: "abc12345".to_string(),
            source: io_err,
        };
        match &err {
            StoreError::WriteFailed { record, wid, source } => {
                assert_eq!(*record, "state");
                assert_eq!(wid, "abc12345");
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected WriteFailed variant"),
        }
    }

    #[test]
    fn allocation_error_no_ports_names_workflow() {
        let err = AllocationError::NoAvailablePorts {
            wid: "deadbeef".to_string(),
        };
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn phase_error_converts_from_allocation_error() {
        let inner = AllocationError::NoAvailablePorts {
            wid: "abc12345".to_string(),
        };
        let phase_err: PhaseError = inner.into();
        assert!(matches!(
            phase_err,
            PhaseError::Allocation(AllocationError::NoAvailablePorts { .. })
        ));
    }

    #[test]
    fn hard_phase_failure_names_phase_and_output() {
        let err = PhaseError::HardPhaseFailed {
            phase: "build".to_string(),
            output: "compilation failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'build'"));
        assert!(msg.contains("compilation failed"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::DirCreateFailed {
            path: PathBuf::from("/x"),
            source: std::io::Error::other("boom"),
        });
        assert_std_error(&HandoffError::SchemaViolation {
            phase: "test".into(),
            missing: vec![],
        });
        assert_std_error(&AllocationError::NoAvailablePorts { wid: "x".into() });
        assert_std_error(&PhaseError::HardPhaseFailed {
            phase: "plan".into(),
            output: "x".into(),
        });
    }
}
