use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

use stagehand::config::Config;
use stagehand::logging;
use stagehand::util::make_wid;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(
    version,
    about = "Workflow isolation and state coordination for agentic development pipelines"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for an issue
    Run {
        issue_number: String,

        /// Existing workflow identifier to resume; a new one is generated
        /// if omitted
        #[arg(long)]
        wid: Option<String>,

        /// Stop after this phase
        #[arg(long)]
        through: Option<String>,
    },
    /// Run a single phase against a workflow
    Phase {
        /// Phase name (plan, build, test, review, ship, improve)
        name: String,
        issue_number: String,
        #[arg(long)]
        wid: String,
    },
    /// Show persisted workflow state
    Status {
        #[arg(long)]
        wid: Option<String>,
    },
    /// Show a workflow's metrics summary
    Metrics {
        wid: String,

        /// Export the flat per-execution CSV instead
        #[arg(long)]
        csv: bool,
    },
    /// Remove a workflow's isolated worktree
    Clean { wid: String },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("{} {e:#}", console::style("error:").red().bold());
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::new(cli.project_dir.clone(), cli.verbose)?;

    match cli.command {
        Commands::Run {
            issue_number,
            wid,
            through,
        } => {
            let wid = wid.unwrap_or_else(make_wid);
            let _guard = logging::init(cli.verbose, Some(&config.log_file(&wid)))?;
            cmd::cmd_run(config, &issue_number, &wid, through.as_deref()).await
        }
        Commands::Phase {
            name,
            issue_number,
            wid,
        } => {
            let _guard = logging::init(cli.verbose, Some(&config.log_file(&wid)))?;
            cmd::cmd_phase(config, &name, &issue_number, &wid).await
        }
        Commands::Status { wid } => {
            let _guard = logging::init(cli.verbose, None)?;
            cmd::cmd_status(config, wid.as_deref())
        }
        Commands::Metrics { wid, csv } => {
            let _guard = logging::init(cli.verbose, None)?;
            cmd::cmd_metrics(config, &wid, csv)
        }
        Commands::Clean { wid } => {
            let _guard = logging::init(cli.verbose, None)?;
            cmd::cmd_clean(config, &wid).await
        }
    }
}
