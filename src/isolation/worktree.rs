//! Git worktree provisioning for isolated workflow execution.
//!
//! Each workflow gets a dedicated checkout under `trees/<wid>/` so that
//! concurrent workflows never touch each other's files. Validation treats
//! a stale record (deleted worktree, reused port) as "re-allocate", never
//! as a fatal error.

use crate::errors::AllocationError;
use crate::isolation::ports::is_port_available;
use crate::state::WorkflowState;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Create a git worktree for isolated execution, branching from
/// `origin/main`. An existing directory is reused with a warning; an
/// existing branch is attached without `-b`.
pub async fn create_worktree(
    project_dir: &Path,
    trees_dir: &Path,
    wid: &str,
    branch_name: &str,
) -> Result<PathBuf, AllocationError> {
    std::fs::create_dir_all(trees_dir).map_err(|source| AllocationError::EnvWriteFailed {
        path: trees_dir.to_path_buf(),
        source,
    })?;

    let worktree_path = trees_dir.join(wid);
    if worktree_path.exists() {
        warn!(wid, path = %worktree_path.display(), "worktree already exists, reusing");
        return Ok(worktree_path);
    }

    // Best-effort refresh so the worktree branches from current origin/main.
    let fetch = Command::new("git")
        .args(["fetch", "origin"])
        .current_dir(project_dir)
        .output()
        .await
        .map_err(AllocationError::GitSpawnFailed)?;
    if !fetch.status.success() {
        warn!(
            wid,
            stderr = %String::from_utf8_lossy(&fetch.stderr).trim(),
            "git fetch failed, continuing with local refs"
        );
    }

    let output = Command::new("git")
        .args(["worktree", "add", "-b", branch_name])
        .arg(&worktree_path)
        .arg("origin/main")
        .current_dir(project_dir)
        .output()
        .await
        .map_err(AllocationError::GitSpawnFailed)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        // The branch may survive from an earlier run; attach to it instead.
        if stderr.contains("already exists") {
            let retry = Command::new("git")
                .args(["worktree", "add"])
                .arg(&worktree_path)
                .arg(branch_name)
                .current_dir(project_dir)
                .output()
                .await
                .map_err(AllocationError::GitSpawnFailed)?;

            if !retry.status.success() {
                return Err(AllocationError::WorktreeCreateFailed {
                    path: worktree_path,
                    message: String::from_utf8_lossy(&retry.stderr).trim().to_string(),
                });
            }
        } else {
            return Err(AllocationError::WorktreeCreateFailed {
                path: worktree_path,
                message: stderr.trim().to_string(),
            });
        }
    }

    info!(wid, branch = branch_name, path = %worktree_path.display(), "worktree created");
    Ok(worktree_path)
}

/// Check whether a previously recorded environment is still usable: the
/// worktree path must exist on disk and the recorded ports must still be
/// bindable. Any failure yields a reason that forces re-allocation.
pub fn validate_worktree(state: &WorkflowState) -> Result<(), String> {
    let Some(worktree_path) = state.worktree_path.as_deref() else {
        return Err("no worktree path recorded in state".to_string());
    };

    if !worktree_path.exists() {
        return Err(format!(
            "worktree directory not found: {}",
            worktree_path.display()
        ));
    }

    for (label, port) in [
        ("backend", state.backend_port),
        ("frontend", state.frontend_port),
    ] {
        match port {
            None => return Err(format!("no {label} port recorded in state")),
            Some(port) if !is_port_available(port) => {
                return Err(format!("recorded {label} port {port} is no longer free"));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Remove a workflow's worktree. `git worktree remove --force` first, with
/// manual directory cleanup as a fallback when git no longer knows about
/// the path.
pub async fn remove_worktree(
    project_dir: &Path,
    trees_dir: &Path,
    wid: &str,
) -> Result<(), AllocationError> {
    let worktree_path = trees_dir.join(wid);

    let output = Command::new("git")
        .args(["worktree", "remove", "--force"])
        .arg(&worktree_path)
        .current_dir(project_dir)
        .output()
        .await
        .map_err(AllocationError::GitSpawnFailed)?;

    if !output.status.success() && worktree_path.exists() {
        std::fs::remove_dir_all(&worktree_path).map_err(|e| {
            AllocationError::WorktreeRemoveFailed {
                path: worktree_path.clone(),
                message: format!(
                    "{}; manual cleanup failed: {e}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
        })?;
        warn!(wid, path = %worktree_path.display(), "removed worktree directory manually");
    }

    info!(wid, path = %worktree_path.display(), "worktree removed");
    Ok(())
}

/// Write the port bindings into the worktree so services started by later
/// phases run against this workflow's isolated instance.
pub fn setup_worktree_environment(
    worktree_path: &Path,
    backend_port: u16,
    frontend_port: u16,
) -> Result<(), AllocationError> {
    let ports_env_path = worktree_path.join(".ports.env");

    let contents = format!(
        "BACKEND_PORT={backend_port}\nFRONTEND_PORT={frontend_port}\nVITE_BACKEND_URL=http://localhost:{backend_port}\n"
    );

    std::fs::write(&ports_env_path, contents).map_err(|source| {
        AllocationError::EnvWriteFailed {
            path: ports_env_path.clone(),
            source,
        }
    })?;

    info!(backend_port, frontend_port, path = %ports_env_path.display(), "port environment written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use tempfile::tempdir;

    fn state_with_env(path: Option<PathBuf>, ports: Option<(u16, u16)>) -> WorkflowState {
        let mut state = WorkflowState::new("abc12345");
        state.worktree_path = path;
        if let Some((backend, frontend)) = ports {
            state.backend_port = Some(backend);
            state.frontend_port = Some(frontend);
        }
        state
    }

    #[test]
    fn test_validate_rejects_missing_path_field() {
        let state = state_with_env(None, Some((9100, 9200)));
        let err = validate_worktree(&state).unwrap_err();
        assert!(err.contains("no worktree path"));
    }

    #[test]
    fn test_validate_rejects_deleted_directory() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("trees/abc12345");
        let state = state_with_env(Some(gone.clone()), Some((9100, 9200)));

        let err = validate_worktree(&state).unwrap_err();
        assert!(!err.is_empty());
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_validate_rejects_missing_ports() {
        let dir = tempdir().unwrap();
        let state = state_with_env(Some(dir.path().to_path_buf()), None);

        let err = validate_worktree(&state).unwrap_err();
        assert!(err.contains("port"));
    }

    #[test]
    fn test_validate_rejects_occupied_port() {
        let dir = tempdir().unwrap();
        // Bind an ephemeral port and record it as the backend port.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let occupied = listener.local_addr().unwrap().port();
        let state = state_with_env(Some(dir.path().to_path_buf()), Some((occupied, 0)));

        let err = validate_worktree(&state).unwrap_err();
        assert!(err.contains("no longer free"));
    }

    #[test]
    fn test_validate_accepts_live_environment() {
        let dir = tempdir().unwrap();
        // Discover two currently-free ephemeral ports, then release them.
        let (a, b) = {
            let la = TcpListener::bind("127.0.0.1:0").unwrap();
            let lb = TcpListener::bind("127.0.0.1:0").unwrap();
            (
                la.local_addr().unwrap().port(),
                lb.local_addr().unwrap().port(),
            )
        };
        let state = state_with_env(Some(dir.path().to_path_buf()), Some((a, b)));
        assert!(validate_worktree(&state).is_ok());
    }

    #[test]
    fn test_setup_worktree_environment_writes_ports_env() {
        let dir = tempdir().unwrap();
        setup_worktree_environment(dir.path(), 9104, 9204).unwrap();

        let contents = std::fs::read_to_string(dir.path().join(".ports.env")).unwrap();
        assert!(contents.contains("BACKEND_PORT=9104"));
        assert!(contents.contains("FRONTEND_PORT=9204"));
        assert!(contents.contains("VITE_BACKEND_URL=http://localhost:9104"));
    }
}
