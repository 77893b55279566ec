//! Pipeline execution — `stagehand run` and `stagehand phase <NAME>`.

use anyhow::{Result, bail};
use console::style;
use std::sync::Arc;

use stagehand::agent::CliTransport;
use stagehand::config::Config;
use stagehand::orchestrator::{PhaseOutcome, RunReport, WorkflowRunner};
use stagehand::phase::find_spec;

fn make_runner(config: &Config) -> WorkflowRunner {
    let transport = Arc::new(CliTransport::new(
        &config.agent_cmd,
        &config.agents_dir,
        config.skip_permissions,
    ));
    WorkflowRunner::new(config.clone(), transport)
}

/// Run the full pipeline (or a prefix of it) for an issue.
pub async fn cmd_run(
    config: Config,
    issue_number: &str,
    wid: &str,
    through: Option<&str>,
) -> Result<()> {
    println!(
        "{} workflow {} for issue {}",
        style("Starting").green().bold(),
        style(wid).cyan(),
        issue_number
    );

    let runner = make_runner(&config);
    let report = runner.run(wid, issue_number, through).await?;
    print_report(&report);
    Ok(())
}

/// Run a single phase against an existing workflow.
pub async fn cmd_phase(
    config: Config,
    name: &str,
    issue_number: &str,
    wid: &str,
) -> Result<()> {
    let Some(spec) = find_spec(name) else {
        bail!("Unknown phase '{name}'");
    };

    let runner = make_runner(&config);
    runner.ensure_environment(wid, issue_number).await?;
    let outcome = runner.run_phase(wid, &spec).await?;

    match outcome {
        PhaseOutcome::Completed {
            phase,
            duration_seconds,
        } => {
            println!(
                "{} phase {} in {:.1}s",
                style("Completed").green().bold(),
                style(&phase).cyan(),
                duration_seconds
            );
        }
        PhaseOutcome::SoftFailed { phase, .. } => {
            println!(
                "{} soft phase {} failed (non-fatal)",
                style("Warning:").yellow().bold(),
                style(&phase).cyan()
            );
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!();
    for outcome in &report.outcomes {
        match outcome {
            PhaseOutcome::Completed {
                phase,
                duration_seconds,
            } => {
                println!(
                    "  {} {:10} {:.1}s",
                    style("ok").green(),
                    phase,
                    duration_seconds
                );
            }
            PhaseOutcome::SoftFailed { phase, .. } => {
                println!("  {} {:10} (soft failure, skipped)", style("--").yellow(), phase);
            }
        }
    }

    let summary = &report.summary;
    println!();
    println!(
        "{} {} phase executions, {} output tokens, ${:.4}",
        style("Workflow complete:").green().bold(),
        summary.phase_executions,
        summary.total_output_tokens,
        summary.total_cost_usd
    );
    println!(
        "  optimization rate {:.1}%  avg phase duration {:.1}s",
        summary.optimization_rate * 100.0,
        summary.avg_duration_seconds
    );
}
