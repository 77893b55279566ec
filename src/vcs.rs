//! Thin `git`/`gh` collaborators.
//!
//! These are narrow contracts consumed by the orchestrator: fetch an issue,
//! post a comment, name a branch, push and open a PR. All of them shell out
//! and surface failures as plain errors; none of them own workflow state.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// Marker prepended to every comment this tool posts, so webhook-driven
/// setups can filter their own output.
pub const BOT_IDENTIFIER: &str = "[stagehand]";

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl Issue {
    /// The minimal JSON payload sent to classification agents: number,
    /// title, and body only.
    pub fn minimal_json(&self) -> String {
        serde_json::json!({
            "number": self.number,
            "title": self.title,
            "body": self.body,
        })
        .to_string()
    }
}

/// Fetch an issue through the `gh` CLI.
pub async fn fetch_issue(number: u64, dir: &Path) -> Result<Issue> {
    let output = Command::new("gh")
        .args([
            "issue",
            "view",
            &number.to_string(),
            "--json",
            "number,title,body",
        ])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run gh issue view")?;

    if !output.status.success() {
        bail!(
            "Failed to fetch issue {number}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    serde_json::from_slice(&output.stdout).context("Failed to parse gh issue JSON")
}

/// Post a comment on an issue, tagged with the bot identifier and the
/// workflow that produced it.
pub async fn post_comment(number: u64, wid: &str, body: &str, dir: &Path) -> Result<()> {
    let tagged = format!("{BOT_IDENTIFIER} {wid}: {body}");
    let output = Command::new("gh")
        .args(["issue", "comment", &number.to_string(), "--body", &tagged])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run gh issue comment")?;

    if !output.status.success() {
        bail!(
            "Failed to comment on issue {number}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// The repository URL, via `gh repo view`.
pub async fn repo_url(dir: &Path) -> Result<String> {
    let output = Command::new("gh")
        .args(["repo", "view", "--json", "url", "--jq", ".url"])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run gh repo view")?;

    if !output.status.success() {
        bail!(
            "Failed to get repository URL: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Convert a title to a URL-safe slug, limited to `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.len() > max_len || slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Branch name for a classified issue:
/// `<class>-issue-<n>-wf-<wid>-<slug>`.
pub fn branch_name_for(issue_class: &str, issue_number: &str, wid: &str, title: &str) -> String {
    let class = issue_class.trim_start_matches('/');
    let slug = slugify(title, 40);
    format!("{class}-issue-{issue_number}-wf-{wid}-{slug}")
}

/// Stage everything and commit. A clean tree is not an error.
pub async fn commit_all(dir: &Path, message: &str) -> Result<()> {
    let add = Command::new("git")
        .args(["add", "-A"])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run git add")?;
    if !add.status.success() {
        bail!(
            "git add failed: {}",
            String::from_utf8_lossy(&add.stderr).trim()
        );
    }

    let commit = Command::new("git")
        .args(["commit", "-m", message])
        .current_dir(dir)
        .output()
        .await
        .context("Failed to run git commit")?;
    if !commit.status.success() {
        let stderr = String::from_utf8_lossy(&commit.stderr);
        let stdout = String::from_utf8_lossy(&commit.stdout);
        if stdout.contains("nothing to commit") || stderr.contains("nothing to commit") {
            info!("nothing to commit");
            return Ok(());
        }
        bail!("git commit failed: {}", stderr.trim());
    }
    Ok(())
}
