//! Worktree cleanup — `stagehand clean`.

use anyhow::Result;
use console::style;

use stagehand::config::Config;
use stagehand::isolation::remove_worktree;

/// Remove a workflow's isolated worktree. The per-workflow records under
/// `agents/` are kept as an audit trail.
pub async fn cmd_clean(config: Config, wid: &str) -> Result<()> {
    let worktree_path = config.trees_dir.join(wid);
    if !worktree_path.exists() {
        println!("No worktree to remove for {}", style(wid).cyan());
        return Ok(());
    }

    remove_worktree(&config.project_dir, &config.trees_dir, wid).await?;
    println!(
        "{} worktree for {}",
        style("Removed").green().bold(),
        style(wid).cyan()
    );
    Ok(())
}
