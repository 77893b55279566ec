//! Workflow inspection — `stagehand status` and `stagehand metrics`.

use anyhow::{Context, Result};
use console::style;

use stagehand::config::Config;
use stagehand::metrics::WorkflowMetrics;
use stagehand::state::StateStore;

/// Show one workflow's persisted state, or list all known workflows.
pub fn cmd_status(config: Config, wid: Option<&str>) -> Result<()> {
    let store = StateStore::new(&config.agents_dir);

    match wid {
        Some(wid) => {
            let state = store.load(wid);
            println!("{}", style(format!("Workflow {wid}")).cyan().bold());
            println!(
                "{}",
                serde_json::to_string_pretty(&state).context("Failed to render state")?
            );
        }
        None => {
            let mut wids: Vec<String> = match std::fs::read_dir(&config.agents_dir) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect(),
                Err(_) => Vec::new(),
            };
            wids.sort();

            if wids.is_empty() {
                println!("No workflows found");
                return Ok(());
            }

            for wid in wids {
                let state = store.load(&wid);
                let last = state
                    .workflow_history
                    .last()
                    .map(String::as_str)
                    .unwrap_or("(no phases run)");
                println!("{}  last phase: {}", style(&wid).cyan(), last);
            }
        }
    }
    Ok(())
}

/// Print a workflow's metrics summary, optionally exporting the flat CSV.
pub fn cmd_metrics(config: Config, wid: &str, csv: bool) -> Result<()> {
    let metrics = WorkflowMetrics::new(&config.agents_dir);

    if csv {
        let path = metrics.export_csv(wid)?;
        println!("Exported {}", style(path.display()).cyan());
        return Ok(());
    }

    let summary = metrics.workflow_summary(wid);
    println!("{}", style(format!("Workflow {wid}")).cyan().bold());
    println!("  phases executed:    {}", summary.phases);
    println!("  phase executions:   {}", summary.phase_executions);
    println!("  input tokens:       {}", summary.total_input_tokens);
    println!("  output tokens:      {}", summary.total_output_tokens);
    println!("  total cost:         ${:.4}", summary.total_cost_usd);
    println!(
        "  optimization rate:  {:.1}%",
        summary.optimization_rate * 100.0
    );
    println!(
        "  avg duration:       {:.1}s",
        summary.avg_duration_seconds
    );

    if !summary.phases_breakdown.is_empty() {
        println!();
        for (phase, breakdown) in &summary.phases_breakdown {
            println!(
                "  {:10} {} execution(s), {} output tokens",
                phase, breakdown.executions, breakdown.total_output_tokens
            );
        }
    }
    Ok(())
}
