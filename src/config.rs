//! Runtime configuration for stagehand.
//!
//! Resolves the project layout (agents/ for per-workflow records, trees/
//! for isolated worktrees) and the external agent binary. Values come from
//! CLI arguments with environment fallbacks; `.env` is loaded by the entry
//! point before this runs.

use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// The main repository checkout.
    pub project_dir: PathBuf,
    /// Per-workflow records live under `agents/<wid>/`.
    pub agents_dir: PathBuf,
    /// Isolated worktrees live under `trees/<wid>/`.
    pub trees_dir: PathBuf,
    /// External agent CLI binary.
    pub agent_cmd: String,
    pub skip_permissions: bool,
    /// Output style hint forwarded to the transport, if any.
    pub output_style: Option<String>,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let project_dir = match project_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to resolve current directory")?,
        };
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let agents_dir = project_dir.join("agents");
        let trees_dir = project_dir.join("trees");

        let agent_cmd = std::env::var("AGENT_CLI").unwrap_or_else(|_| "claude".to_string());
        let skip_permissions = std::env::var("AGENT_SKIP_PERMISSIONS")
            .map(|v| v != "false")
            .unwrap_or(true);
        let output_style = std::env::var("STAGEHAND_OUTPUT_STYLE").ok();

        Ok(Self {
            project_dir,
            agents_dir,
            trees_dir,
            agent_cmd,
            skip_permissions,
            output_style,
            verbose,
        })
    }

    /// The record directory for one workflow.
    pub fn wid_dir(&self, wid: &str) -> PathBuf {
        self.agents_dir.join(wid)
    }

    /// The per-run execution log for one workflow.
    pub fn log_file(&self, wid: &str) -> PathBuf {
        self.wid_dir(wid).join("execution.log")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.agents_dir).context("Failed to create agents directory")?;
        std::fs::create_dir_all(&self.trees_dir).context("Failed to create trees directory")?;
        Ok(())
    }
}
