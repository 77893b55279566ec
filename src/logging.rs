//! Tracing setup: console output plus a per-workflow execution log.
//!
//! Every workflow run appends to `agents/<wid>/execution.log` so a resumed
//! run continues the same audit trail. `RUST_LOG` overrides the default
//! filter.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialize the global subscriber. Returns the appender guard which must
/// be held for the lifetime of the process when a log file is attached.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "stagehand=debug" } else { "stagehand=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer().with_target(false).without_time();

    let guard = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).context("Failed to create log directory")?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

            // try_init: a second call (tests, resumed entry points) keeps
            // the existing subscriber.
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .with(file_layer)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init();
            None
        }
    };

    Ok(guard)
}
