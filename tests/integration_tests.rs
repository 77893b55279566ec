//! Integration tests for the stagehand CLI.
//!
//! These exercise the binary surface against temporary project directories:
//! argument handling, workflow inspection, and the failure paths that do
//! not require a live agent or repository.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a stagehand Command.
fn stagehand() -> Command {
    cargo_bin_cmd!("stagehand")
}

/// Helper to create a temporary project directory.
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

/// Seed a persisted state record the way a run would have left it.
fn seed_state(dir: &TempDir, wid: &str, json: &str) {
    let wid_dir = dir.path().join("agents").join(wid);
    fs::create_dir_all(&wid_dir).unwrap();
    fs::write(wid_dir.join("workflow_state.json"), json).unwrap();
}

// =============================================================================
// Basic CLI tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        stagehand().arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        stagehand().arg("--version").assert().success();
    }

    #[test]
    fn test_missing_subcommand_is_usage_error() {
        stagehand().assert().failure().code(2);
    }

    #[test]
    fn test_run_without_issue_number_is_usage_error() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .code(2);
    }

    #[test]
    fn test_phase_requires_wid() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["phase", "build", "1"])
            .assert()
            .failure()
            .code(2);
    }
}

// =============================================================================
// Status and metrics inspection
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_status_empty_project() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No workflows found"));
    }

    #[test]
    fn test_status_lists_seeded_workflow() {
        let dir = create_temp_project();
        seed_state(
            &dir,
            "abc12345",
            r#"{"wid": "abc12345", "workflow_history": ["plan", "build"]}"#,
        );

        stagehand()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("abc12345"))
            .stdout(predicate::str::contains("last phase: build"));
    }

    #[test]
    fn test_status_for_one_wid_shows_record() {
        let dir = create_temp_project();
        seed_state(
            &dir,
            "abc12345",
            r#"{"wid": "abc12345", "issue_number": "42", "workflow_history": ["plan"]}"#,
        );

        stagehand()
            .current_dir(dir.path())
            .args(["status", "--wid", "abc12345"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"issue_number\": \"42\""));
    }

    #[test]
    fn test_status_for_unknown_wid_shows_empty_record() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["status", "--wid", "nothere1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"wid\": \"nothere1\""));
    }

    #[test]
    fn test_metrics_unknown_wid_is_all_zeros() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["metrics", "nothere1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase executions:   0"))
            .stdout(predicate::str::contains("optimization rate:  0.0%"));
    }

    #[test]
    fn test_metrics_csv_export() {
        let dir = create_temp_project();
        let wid_dir = dir.path().join("agents/abc12345");
        fs::create_dir_all(&wid_dir).unwrap();
        fs::write(
            wid_dir.join("metrics.json"),
            r#"{"plan": [{"timestamp": "2026-08-01T12:00:00Z", "output_tokens": 200, "cost_usd": 0.05}]}"#,
        )
        .unwrap();

        stagehand()
            .current_dir(dir.path())
            .args(["metrics", "abc12345", "--csv"])
            .assert()
            .success()
            .stdout(predicate::str::contains("metrics.csv"));

        let csv = fs::read_to_string(wid_dir.join("metrics.csv")).unwrap();
        assert!(csv.starts_with("phase,timestamp"));
        assert!(csv.lines().any(|l| l.starts_with("plan,")));
    }

    #[test]
    fn test_metrics_summary_reads_seeded_record() {
        let dir = create_temp_project();
        let wid_dir = dir.path().join("agents/abc12345");
        fs::create_dir_all(&wid_dir).unwrap();
        fs::write(
            wid_dir.join("metrics.json"),
            r#"{"plan": [{"timestamp": "2026-08-01T12:00:00Z", "output_tokens": 200, "cost_usd": 0.05}]}"#,
        )
        .unwrap();

        stagehand()
            .current_dir(dir.path())
            .args(["metrics", "abc12345"])
            .assert()
            .success()
            .stdout(predicate::str::contains("phase executions:   1"))
            .stdout(predicate::str::contains("output tokens:      200"))
            // (2000 - 200) / 2000 against the plan baseline.
            .stdout(predicate::str::contains("optimization rate:  90.0%"));
    }
}

// =============================================================================
// Failure paths
// =============================================================================

mod failure_paths {
    use super::*;

    #[test]
    fn test_unknown_phase_name_fails() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["phase", "deploy", "1", "--wid", "abc12345"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("Unknown phase"));
    }

    #[test]
    fn test_run_with_non_numeric_issue_fails() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["run", "not-a-number"])
            .assert()
            .failure()
            .code(1)
            .stderr(predicate::str::contains("Invalid issue number"));
    }

    #[test]
    fn test_clean_without_worktree_is_a_noop() {
        let dir = create_temp_project();
        stagehand()
            .current_dir(dir.path())
            .args(["clean", "abc12345"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No worktree to remove"));
    }
}
