//! The agent transport seam.
//!
//! The coordination layer treats agent execution as an opaque blocking call
//! with a boolean outcome: hand it a slash command, get back output text,
//! a success flag, and whatever accounting the transport could extract.
//! The trait keeps the orchestrator testable against a scripted transport;
//! `CliTransport` is the real thing.

pub mod cli;
pub mod stream;

pub use cli::CliTransport;

use crate::handoff::PhaseContext;
use crate::state::ModelProfile;
use async_trait::async_trait;
use std::path::PathBuf;

/// One agent invocation: a slash command plus its positional arguments,
/// namespaced by workflow and agent identity.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub agent_name: String,
    pub slash_command: String,
    pub args: Vec<String>,
    pub wid: String,
    /// Run the agent inside this directory (the isolated worktree).
    pub working_dir: Option<PathBuf>,
    /// Output-verbosity hint, e.g. "concise-ultra".
    pub output_style: Option<String>,
    /// Minimal context accumulated from earlier phases.
    pub context: Option<PhaseContext>,
    /// Which model tier the transport should select for this command.
    pub model_profile: ModelProfile,
}

impl AgentInvocation {
    pub fn new(agent_name: &str, slash_command: &str, args: Vec<String>, wid: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            slash_command: slash_command.to_string(),
            args,
            wid: wid.to_string(),
            working_dir: None,
            output_style: None,
            context: None,
            model_profile: ModelProfile::default(),
        }
    }
}

/// What came back from one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    /// Result text on success, error text on failure.
    pub output: String,
    pub session_id: Option<String>,
    pub output_tokens: Option<u64>,
    pub total_cost_usd: Option<f64>,
}

impl AgentOutcome {
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            session_id: None,
            output_tokens: None,
            total_cost_usd: None,
        }
    }
}

/// Blocking transport to the external agent. Timeouts and retries are the
/// transport's own policy; the coordination layer never retries.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn execute(&self, request: &AgentInvocation) -> anyhow::Result<AgentOutcome>;
}
