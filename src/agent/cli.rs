//! CLI-backed agent transport.
//!
//! Spawns the external agent binary with stream-json output, streams the
//! transcript to `agents/<wid>/<agent>/raw_output.jsonl`, and parses the
//! final result record for outcome, session id, and cost. Retry with fixed
//! delays is this transport's own policy for transient process failures;
//! agent-reported errors are never retried.

use super::stream::{ContentBlock, StreamEvent};
use super::{AgentInvocation, AgentOutcome, AgentTransport};
use crate::state::ModelProfile;
use crate::util::truncate_output;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

const RETRY_DELAYS_SECS: [u64; 3] = [1, 3, 5];

/// Pick the model for a slash command given the workflow's profile. The
/// heavy profile upgrades generative commands; classification and plumbing
/// commands stay on the base model.
fn model_for_command(slash_command: &str, profile: ModelProfile) -> &'static str {
    match profile {
        ModelProfile::Base => "sonnet",
        ModelProfile::Heavy => match slash_command {
            "/implement" | "/chore" | "/bug" | "/feature" | "/patch" | "/improve" => "opus",
            _ => "sonnet",
        },
    }
}

pub struct CliTransport {
    binary: String,
    agents_dir: PathBuf,
    skip_permissions: bool,
    max_retries: u32,
}

impl CliTransport {
    pub fn new(binary: &str, agents_dir: impl Into<PathBuf>, skip_permissions: bool) -> Self {
        Self {
            binary: binary.to_string(),
            agents_dir: agents_dir.into(),
            skip_permissions,
            max_retries: RETRY_DELAYS_SECS.len() as u32,
        }
    }

    fn transcript_dir(&self, request: &AgentInvocation) -> PathBuf {
        self.agents_dir
            .join(&request.wid)
            .join(&request.agent_name)
    }

    fn assemble_prompt(request: &AgentInvocation) -> String {
        if request.args.is_empty() {
            request.slash_command.clone()
        } else {
            format!("{} {}", request.slash_command, request.args.join(" "))
        }
    }

    fn save_prompt(&self, request: &AgentInvocation, prompt: &str) {
        let prompt_dir = self.transcript_dir(request).join("prompts");
        let command_name = request.slash_command.trim_start_matches('/');
        if std::fs::create_dir_all(&prompt_dir).is_ok() {
            let _ = std::fs::write(prompt_dir.join(format!("{command_name}.txt")), prompt);
        }
    }

    /// One spawn of the agent binary. The second element of the pair says
    /// whether a failure is worth retrying (process-level trouble) or not
    /// (the agent itself reported an error).
    async fn run_once(&self, request: &AgentInvocation) -> Result<(AgentOutcome, bool)> {
        let transcript_dir = self.transcript_dir(request);
        std::fs::create_dir_all(&transcript_dir)
            .with_context(|| format!("Failed to create {}", transcript_dir.display()))?;
        let output_file = transcript_dir.join("raw_output.jsonl");

        let prompt = Self::assemble_prompt(request);
        self.save_prompt(request, &prompt);

        let model = model_for_command(&request.slash_command, request.model_profile);

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg(&prompt)
            .args(["--model", model, "--output-format", "stream-json", "--verbose"]);
        if self.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        if let Some(context) = &request.context {
            let context_json = serde_json::to_string_pretty(context)
                .context("Failed to serialize handoff context")?;
            cmd.arg("--append-system-prompt").arg(format!(
                "Previous phase context:\n{context_json}\n\nUse this minimal context from the previous workflow phase."
            ));
        }
        if let Some(style) = &request.output_style {
            cmd.args(["--output-style", style]);
        }
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        debug!(
            wid = %request.wid,
            agent = %request.agent_name,
            command = %request.slash_command,
            model,
            "spawning agent"
        );

        let mut child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn agent binary '{}'", self.binary))?;

        // Drain stderr concurrently so a chatty process cannot block.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let stdout = child.stdout.take().context("Failed to get agent stdout")?;
        let mut reader = BufReader::new(stdout).lines();

        let mut transcript = std::fs::File::create(&output_file)
            .with_context(|| format!("Failed to create {}", output_file.display()))?;

        let mut assistant_text = String::new();
        let mut final_result: Option<(String, Option<String>, bool, Option<String>, Option<f64>)> =
            None;

        while let Some(line) = reader.next_line().await? {
            if line.is_empty() {
                continue;
            }
            writeln!(transcript, "{line}")
                .with_context(|| format!("Failed to write {}", output_file.display()))?;

            match serde_json::from_str::<StreamEvent>(&line) {
                Ok(StreamEvent::Assistant { message }) => {
                    for block in message.content {
                        if let ContentBlock::Text { text } = block {
                            assistant_text.push_str(&text);
                            assistant_text.push('\n');
                        }
                    }
                }
                Ok(StreamEvent::Result {
                    subtype,
                    result,
                    is_error,
                    session_id,
                    total_cost_usd,
                }) => {
                    final_result = Some((subtype, result, is_error, session_id, total_cost_usd));
                }
                Ok(_) | Err(_) => {}
            }
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        let Some((subtype, result, is_error, session_id, total_cost_usd)) = final_result else {
            if !status.success() {
                let message = if stderr_text.trim().is_empty() {
                    format!(
                        "Agent exited with code {} and no result record",
                        status.code().unwrap_or(-1)
                    )
                } else {
                    format!("Agent error: {}", truncate_output(stderr_text.trim(), 800))
                };
                return Ok((AgentOutcome::failure(message), true));
            }
            return Ok((
                AgentOutcome::failure("No result record found in agent output"),
                false,
            ));
        };

        if subtype == "error_during_execution" {
            return Ok((
                AgentOutcome::failure(
                    "Error during execution: agent did not return a result".to_string(),
                ),
                true,
            ));
        }

        let mut output = result.unwrap_or(assistant_text);
        if is_error && output.len() > 1000 {
            output = truncate_output(&output, 800);
        }

        let output_tokens = if is_error {
            None
        } else {
            // Rough estimate: ~4 chars per token.
            Some((output.len() / 4) as u64)
        };

        Ok((
            AgentOutcome {
                success: !is_error,
                output,
                session_id,
                output_tokens,
                total_cost_usd,
            },
            false,
        ))
    }
}

#[async_trait]
impl AgentTransport for CliTransport {
    async fn execute(&self, request: &AgentInvocation) -> Result<AgentOutcome> {
        let mut attempt = 0u32;
        loop {
            let (outcome, retryable) = self.run_once(request).await?;
            if outcome.success || !retryable || attempt >= self.max_retries {
                return Ok(outcome);
            }

            let delay = RETRY_DELAYS_SECS
                .get(attempt as usize)
                .copied()
                .unwrap_or_else(|| RETRY_DELAYS_SECS[RETRY_DELAYS_SECS.len() - 1]);
            warn!(
                wid = %request.wid,
                command = %request.slash_command,
                attempt = attempt + 1,
                delay_secs = delay,
                "transient agent failure, retrying"
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
            attempt += 1;
        }
    }
}
