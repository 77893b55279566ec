use super::{PhaseOutcome, RunReport};
use crate::agent::{AgentInvocation, AgentTransport};
use crate::config::Config;
use crate::errors::{HandoffError, PhaseError};
use crate::handoff::{ContextHandoff, PhaseContext};
use crate::isolation::{
    create_worktree, find_next_available_ports, is_port_available, ports_for_workflow,
    setup_worktree_environment, validate_worktree,
};
use crate::metrics::{PhaseUsage, WorkflowMetrics};
use crate::phase::{PhaseSpec, default_pipeline};
use crate::state::{StateStore, WorkflowState};
use crate::util::truncate_output;
use crate::vcs;
use anyhow::{Context, anyhow};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct WorkflowRunner {
    config: Config,
    store: StateStore,
    handoff: ContextHandoff,
    metrics: WorkflowMetrics,
    transport: Arc<dyn AgentTransport>,
}

impl WorkflowRunner {
    pub fn new(config: Config, transport: Arc<dyn AgentTransport>) -> Self {
        let store = StateStore::new(&config.agents_dir);
        let handoff = ContextHandoff::new(&config.agents_dir);
        let metrics = WorkflowMetrics::new(&config.agents_dir);
        Self {
            config,
            store,
            handoff,
            metrics,
            transport,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn handoff(&self) -> &ContextHandoff {
        &self.handoff
    }

    pub fn metrics(&self) -> &WorkflowMetrics {
        &self.metrics
    }

    /// Run the full pipeline (or the prefix ending at `through`) for an
    /// issue, provisioning or revalidating the isolated environment first.
    pub async fn run(
        &self,
        wid: &str,
        issue_number: &str,
        through: Option<&str>,
    ) -> Result<RunReport, PhaseError> {
        let pipeline = pipeline_through(through).map_err(PhaseError::Other)?;
        self.ensure_environment(wid, issue_number).await?;

        match vcs::repo_url(&self.config.project_dir).await {
            Ok(url) => info!(wid, repo = %url, "repository resolved"),
            Err(e) => warn!(wid, error = %e, "could not resolve repository URL"),
        }

        let issue_num = issue_number.parse::<u64>().ok();
        self.comment(
            issue_num,
            wid,
            &format!("workflow started ({} phases)", pipeline.len()),
        )
        .await;

        match self.execute_pipeline(wid, &pipeline).await {
            Ok(report) => {
                self.comment(
                    issue_num,
                    wid,
                    &format!(
                        "workflow complete: {} phase executions, ${:.4}",
                        report.summary.phase_executions, report.summary.total_cost_usd
                    ),
                )
                .await;
                Ok(report)
            }
            Err(e) => {
                self.comment(issue_num, wid, &format!("workflow failed: {e}")).await;
                Err(e)
            }
        }
    }

    /// Best-effort issue comment; a missing tracker never fails the run.
    async fn comment(&self, issue: Option<u64>, wid: &str, body: &str) {
        let Some(number) = issue else { return };
        if let Err(e) = vcs::post_comment(number, wid, body, &self.config.project_dir).await {
            warn!(wid, error = %e, "issue comment skipped");
        }
    }

    /// Execute an already-provisioned workflow through the given pipeline.
    /// No phase begins before its predecessor's state and handoff writes
    /// are durable.
    pub async fn execute_pipeline(
        &self,
        wid: &str,
        pipeline: &[PhaseSpec],
    ) -> Result<RunReport, PhaseError> {
        let mut outcomes = Vec::with_capacity(pipeline.len());
        for spec in pipeline {
            outcomes.push(self.run_phase(wid, spec).await?);
        }

        Ok(RunReport {
            wid: wid.to_string(),
            outcomes,
            summary: self.metrics.workflow_summary(wid),
        })
    }

    /// Ensure the workflow has a usable isolated environment, reusing a
    /// valid recorded one and re-provisioning otherwise.
    pub async fn ensure_environment(
        &self,
        wid: &str,
        issue_number: &str,
    ) -> Result<WorkflowState, PhaseError> {
        self.config
            .ensure_directories()
            .map_err(PhaseError::Other)?;

        let mut state = self.store.load(wid);
        if state.issue_number.as_deref() != Some(issue_number) {
            state = self.store.update(wid, |s| {
                s.issue_number = Some(issue_number.to_string());
            })?;
        }

        match validate_worktree(&state) {
            Ok(()) => {
                info!(wid, "reusing existing isolated environment");
                return Ok(state);
            }
            Err(reason) => {
                info!(wid, reason = %reason, "environment invalid, provisioning");
            }
        }

        // Ports first: deterministic slot, falling forward on conflict.
        let (backend_port, frontend_port) = {
            let (backend, frontend) = ports_for_workflow(wid);
            if is_port_available(backend) && is_port_available(frontend) {
                (backend, frontend)
            } else {
                let pair = find_next_available_ports(wid)?;
                warn!(
                    wid,
                    backend = pair.0,
                    frontend = pair.1,
                    "deterministic ports taken, fell forward"
                );
                pair
            }
        };

        let issue_num: u64 = issue_number
            .parse()
            .with_context(|| format!("Invalid issue number '{issue_number}'"))
            .map_err(PhaseError::Other)?;
        let issue = vcs::fetch_issue(issue_num, &self.config.project_dir)
            .await
            .map_err(PhaseError::Other)?;

        let issue_class = match &state.issue_class {
            Some(class) => class.clone(),
            None => self.classify_issue(wid, &state, &issue).await?,
        };

        let branch_name = state.branch_name.clone().unwrap_or_else(|| {
            vcs::branch_name_for(&issue_class, issue_number, wid, &issue.title)
        });

        let worktree_path = create_worktree(
            &self.config.project_dir,
            &self.config.trees_dir,
            wid,
            &branch_name,
        )
        .await?;
        setup_worktree_environment(&worktree_path, backend_port, frontend_port)?;

        let state = self.store.update(wid, |s| {
            s.issue_class = Some(issue_class.clone());
            s.branch_name = Some(branch_name.clone());
            s.worktree_path = Some(worktree_path.clone());
            s.backend_port = Some(backend_port);
            s.frontend_port = Some(frontend_port);
        })?;
        self.store.save(wid, &state, Some("ensure_environment"))?;

        info!(
            wid,
            branch = %branch_name,
            backend_port,
            frontend_port,
            "isolated environment ready"
        );
        Ok(state)
    }

    async fn classify_issue(
        &self,
        wid: &str,
        state: &WorkflowState,
        issue: &vcs::Issue,
    ) -> Result<String, PhaseError> {
        let mut invocation = AgentInvocation::new(
            "issue_classifier",
            "/classify_issue",
            vec![issue.minimal_json()],
            wid,
        );
        invocation.model_profile = state.model_profile;

        let outcome = self
            .transport
            .execute(&invocation)
            .await
            .map_err(|source| PhaseError::Transport {
                phase: "classify".to_string(),
                source,
            })?;

        if !outcome.success {
            return Err(PhaseError::Other(anyhow!(
                "Failed to classify issue: {}",
                outcome.output
            )));
        }

        ["/chore", "/bug", "/feature"]
            .into_iter()
            .find(|class| outcome.output.contains(class))
            .map(str::to_string)
            .ok_or_else(|| {
                PhaseError::Other(anyhow!(
                    "No issue class selected: {}",
                    truncate_output(&outcome.output, 200)
                ))
            })
    }

    /// Run one phase: handoff in, transport, metrics, then — on success
    /// only — state and handoff out plus a history append.
    pub async fn run_phase(
        &self,
        wid: &str,
        spec: &PhaseSpec,
    ) -> Result<PhaseOutcome, PhaseError> {
        let state = self.store.load(wid);
        let context = self.handoff.load_for_phase(wid, spec.name);
        let working_dir = state.working_directory(&self.config.project_dir);

        // The plan phase runs the classified issue command.
        let slash_command = if spec.name == "plan" {
            state
                .issue_class
                .clone()
                .unwrap_or_else(|| spec.slash_command.to_string())
        } else {
            spec.slash_command.to_string()
        };

        let args = self.phase_args(spec, &state, &context)?;

        let mut invocation =
            AgentInvocation::new(spec.agent_name, &slash_command, args, wid);
        invocation.working_dir = Some(working_dir.clone());
        invocation.output_style = self.config.output_style.clone();
        invocation.model_profile = state.model_profile;
        if !context.is_empty() {
            invocation.context = Some(context.clone());
        }

        info!(wid, phase = spec.name, command = %slash_command, "phase starting");
        let start = Instant::now();
        let outcome = self
            .transport
            .execute(&invocation)
            .await
            .map_err(|source| PhaseError::Transport {
                phase: spec.name.to_string(),
                source,
            })?;
        let duration_seconds = start.elapsed().as_secs_f64();

        // Every invocation gets a sample, failed ones included: retries
        // must show up as distinct executions in the accounting.
        self.metrics.record_phase(
            wid,
            spec.name,
            PhaseUsage {
                input_tokens: None,
                output_tokens: outcome.output_tokens,
                output_style: invocation.output_style.clone(),
                duration_seconds: Some(duration_seconds),
                cost_usd: outcome.total_cost_usd,
            },
        )?;

        if !outcome.success {
            if spec.is_hard() {
                error!(wid, phase = spec.name, "hard phase failed, halting pipeline");
                return Err(PhaseError::HardPhaseFailed {
                    phase: spec.name.to_string(),
                    output: outcome.output,
                });
            }
            warn!(
                wid,
                phase = spec.name,
                output = %truncate_output(&outcome.output, 200),
                "soft phase failed, continuing"
            );
            return Ok(PhaseOutcome::SoftFailed {
                phase: spec.name.to_string(),
                output: outcome.output,
            });
        }

        let outputs = self.phase_outputs(spec.name, wid, &state, &outcome.output);

        if spec.name == "plan"
            && let Some(plan_file) = outputs.get("plan_file").and_then(|v| v.as_str())
        {
            let plan_file = plan_file.to_string();
            self.store.update(wid, |s| {
                s.plan_file = Some(plan_file.clone());
            })?;
        }

        match self.handoff.save(wid, spec.name, outputs) {
            Ok(()) => {}
            // Internally-built outputs satisfy the schemas; a violation
            // here means a contract drifted and is worth a warning, not an
            // abort.
            Err(HandoffError::SchemaViolation { phase, missing }) => {
                warn!(wid, phase = %phase, ?missing, "phase outputs missed handoff schema");
            }
            Err(HandoffError::Store(e)) => return Err(e.into()),
        }

        let state = self.store.append_history(wid, spec.name)?;
        self.store.save(wid, &state, Some(spec.name))?;

        // Checkpoint the worktree after each ordered phase so a resumed run
        // picks up from committed artifacts. Best-effort: a bare directory
        // (or a clean tree) is not a failure.
        if crate::phase::Phase::parse(spec.name).is_some()
            && let Err(e) =
                vcs::commit_all(&working_dir, &format!("{wid}: {} phase output", spec.name)).await
        {
            warn!(wid, phase = spec.name, error = %e, "phase checkpoint commit skipped");
        }

        info!(
            wid,
            phase = spec.name,
            duration_seconds = format!("{duration_seconds:.1}").as_str(),
            "phase completed"
        );
        Ok(PhaseOutcome::Completed {
            phase: spec.name.to_string(),
            duration_seconds,
        })
    }

    fn phase_args(
        &self,
        spec: &PhaseSpec,
        state: &WorkflowState,
        context: &PhaseContext,
    ) -> Result<Vec<String>, PhaseError> {
        let issue_number = || {
            state
                .issue_number
                .clone()
                .ok_or_else(|| PhaseError::Other(anyhow!("No issue number recorded in state")))
        };
        let plan_file = || {
            context
                .get("plan_file")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| state.plan_file.clone())
                .ok_or_else(|| {
                    PhaseError::Other(anyhow!(
                        "No plan found for this workflow; run the plan phase first"
                    ))
                })
        };

        let args = match spec.name {
            "plan" => vec![issue_number()?, state.wid.clone()],
            "build" => vec![plan_file()?],
            "review" => vec![plan_file()?],
            "ship" => vec![
                state.branch_name.clone().unwrap_or_default(),
                issue_number()?,
                state.plan_file.clone().unwrap_or_default(),
                state.wid.clone(),
            ],
            _ => vec![state.wid.clone()],
        };
        Ok(args)
    }

    /// The minimal context a phase exposes to its successors, derived from
    /// state and the transport output. Shapes match the handoff schemas.
    fn phase_outputs(
        &self,
        phase: &str,
        wid: &str,
        state: &WorkflowState,
        output: &str,
    ) -> PhaseContext {
        let issue_number = state.issue_number.clone().unwrap_or_default();
        let mut outputs = PhaseContext::new();

        match phase {
            "plan" => {
                let plan_file = last_nonempty_line(output)
                    .filter(|line| line.ends_with(".md"))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("specs/issue-{issue_number}-wf-{wid}-plan.md"));
                outputs.insert("plan_file".to_string(), json!(plan_file));
                outputs.insert("issue_number".to_string(), json!(issue_number));
            }
            "build" => {
                outputs.insert(
                    "files_changed".to_string(),
                    json!(truncate_output(output.trim(), 400)),
                );
            }
            "test" => {
                outputs.insert("tests_passed".to_string(), json!(true));
            }
            "review" => {
                outputs.insert("approved".to_string(), json!(true));
            }
            "ship" => {
                let pr_url = last_nonempty_line(output).unwrap_or_default().to_string();
                outputs.insert("pr_url".to_string(), json!(pr_url));
            }
            _ => {
                outputs.insert(
                    "summary".to_string(),
                    json!(truncate_output(output.trim(), 400)),
                );
            }
        }
        outputs
    }
}

fn last_nonempty_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).next_back()
}

/// The default pipeline, optionally cut after a named phase.
fn pipeline_through(through: Option<&str>) -> anyhow::Result<Vec<PhaseSpec>> {
    let pipeline = default_pipeline();
    match through {
        None => Ok(pipeline),
        Some(name) => {
            let end = pipeline
                .iter()
                .position(|spec| spec.name == name)
                .ok_or_else(|| anyhow!("Unknown phase '{name}'"))?;
            Ok(pipeline.into_iter().take(end + 1).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentOutcome;
    use crate::phase::{Criticality, find_spec};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted transport: a canned outcome per slash command, recording
    /// every invocation it sees.
    struct MockTransport {
        responses: HashMap<String, AgentOutcome>,
        calls: Mutex<Vec<AgentInvocation>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(mut self, command: &str, outcome: AgentOutcome) -> Self {
            self.responses.insert(command.to_string(), outcome);
            self
        }

        fn succeed(self, command: &str, output: &str) -> Self {
            self.respond(
                command,
                AgentOutcome {
                    success: true,
                    output: output.to_string(),
                    session_id: Some("s-1".to_string()),
                    output_tokens: Some(output.len() as u64 / 4),
                    total_cost_usd: Some(0.01),
                },
            )
        }

        fn fail(self, command: &str, output: &str) -> Self {
            self.respond(command, AgentOutcome::failure(output))
        }

        fn calls(&self) -> Vec<AgentInvocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentTransport for MockTransport {
        async fn execute(&self, request: &AgentInvocation) -> anyhow::Result<AgentOutcome> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(self
                .responses
                .get(&request.slash_command)
                .cloned()
                .unwrap_or_else(|| AgentOutcome::failure("unscripted command")))
        }
    }

    fn make_runner(transport: Arc<MockTransport>) -> (WorkflowRunner, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        config.ensure_directories().unwrap();
        (WorkflowRunner::new(config, transport), dir)
    }

    /// Seed a state record as the environment bootstrap would have left it.
    fn seed_state(runner: &WorkflowRunner, wid: &str, workdir: &std::path::Path) {
        runner
            .store()
            .update(wid, |s| {
                s.issue_number = Some("1".to_string());
                s.issue_class = Some("/feature".to_string());
                s.branch_name = Some("feature-issue-1-wf-test".to_string());
                s.worktree_path = Some(workdir.to_path_buf());
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_successful_phase_persists_everything() {
        let transport =
            Arc::new(MockTransport::new().succeed("/feature", "specs/issue-1-plan.md"));
        let (runner, dir) = make_runner(transport.clone());
        seed_state(&runner, "abc12345", dir.path());

        let outcome = runner
            .run_phase("abc12345", &find_spec("plan").unwrap())
            .await
            .unwrap();
        assert!(outcome.is_completed());

        // Handoff carries the plan contract.
        let saved = runner.handoff().get_phase("abc12345", "plan").unwrap();
        assert_eq!(saved.get("plan_file").unwrap(), "specs/issue-1-plan.md");
        assert_eq!(saved.get("issue_number").unwrap(), "1");

        // State picked up the plan file and the history entry.
        let state = runner.store().load("abc12345");
        assert_eq!(state.plan_file.as_deref(), Some("specs/issue-1-plan.md"));
        assert_eq!(state.workflow_history, vec!["plan"]);

        // One metrics sample for the invocation.
        let summary = runner.metrics().workflow_summary("abc12345");
        assert_eq!(summary.phase_executions, 1);
    }

    #[tokio::test]
    async fn test_build_receives_plan_context_only() {
        let transport = Arc::new(
            MockTransport::new()
                .succeed("/feature", "specs/issue-1-plan.md")
                .succeed("/implement", "changed 3 files"),
        );
        let (runner, dir) = make_runner(transport.clone());
        seed_state(&runner, "abc12345", dir.path());

        runner
            .run_phase("abc12345", &find_spec("plan").unwrap())
            .await
            .unwrap();
        runner
            .run_phase("abc12345", &find_spec("build").unwrap())
            .await
            .unwrap();

        let calls = transport.calls();
        let build_call = calls
            .iter()
            .find(|c| c.slash_command == "/implement")
            .unwrap();

        let context = build_call.context.as_ref().unwrap();
        assert_eq!(context.get("plan_file").unwrap(), "specs/issue-1-plan.md");
        // The plan invocation itself saw no upstream context.
        let plan_call = calls.iter().find(|c| c.slash_command == "/feature").unwrap();
        assert!(plan_call.context.is_none());
        // And the build args carry the plan file.
        assert_eq!(build_call.args, vec!["specs/issue-1-plan.md"]);
    }

    #[tokio::test]
    async fn test_hard_failure_halts_with_state_intact() {
        let transport = Arc::new(
            MockTransport::new()
                .succeed("/feature", "specs/issue-1-plan.md")
                .fail("/implement", "compilation failed"),
        );
        let (runner, dir) = make_runner(transport);
        seed_state(&runner, "abc12345", dir.path());

        let pipeline: Vec<PhaseSpec> = default_pipeline().into_iter().take(3).collect();
        let err = runner
            .execute_pipeline("abc12345", &pipeline)
            .await
            .unwrap_err();

        match err {
            PhaseError::HardPhaseFailed { phase, output } => {
                assert_eq!(phase, "build");
                assert_eq!(output, "compilation failed");
            }
            other => panic!("Expected HardPhaseFailed, got {other}"),
        }

        // Durable state reflects the last successful phase only.
        let state = runner.store().load("abc12345");
        assert_eq!(state.workflow_history, vec!["plan"]);
        assert!(runner.handoff().get_phase("abc12345", "build").is_none());

        // The failed invocation still produced a metrics sample.
        let summary = runner.metrics().workflow_summary("abc12345");
        assert_eq!(summary.phase_executions, 2);
    }

    #[tokio::test]
    async fn test_soft_failure_continues_without_state_writes() {
        let transport = Arc::new(MockTransport::new().fail("/improve", "no improvements found"));
        let (runner, dir) = make_runner(transport);
        seed_state(&runner, "abc12345", dir.path());

        let improve = PhaseSpec {
            name: "improve",
            slash_command: "/improve",
            agent_name: "sdlc_improver",
            criticality: Criticality::Soft,
        };
        let report = runner
            .execute_pipeline("abc12345", &[improve])
            .await
            .unwrap();

        assert!(matches!(
            &report.outcomes[0],
            PhaseOutcome::SoftFailed { phase, .. } if phase == "improve"
        ));

        // No history entry and no handoff record for the failed soft phase.
        let state = runner.store().load("abc12345");
        assert!(state.workflow_history.is_empty());
        assert!(runner.handoff().get_phase("abc12345", "improve").is_none());
    }

    #[tokio::test]
    async fn test_rerun_after_failure_resumes() {
        // First attempt: build fails.
        let failing = Arc::new(
            MockTransport::new()
                .succeed("/feature", "specs/issue-1-plan.md")
                .fail("/implement", "flaky"),
        );
        let (runner, dir) = make_runner(failing);
        seed_state(&runner, "abc12345", dir.path());

        let pipeline: Vec<PhaseSpec> = default_pipeline().into_iter().take(2).collect();
        assert!(runner.execute_pipeline("abc12345", &pipeline).await.is_err());

        // Second attempt against the same records: build succeeds and sees
        // the plan context persisted by the first attempt.
        let fixed = Arc::new(MockTransport::new().succeed("/implement", "done"));
        let config = Config::new(Some(dir.path().to_path_buf()), false).unwrap();
        let runner2 = WorkflowRunner::new(config, fixed.clone());

        runner2
            .run_phase("abc12345", &find_spec("build").unwrap())
            .await
            .unwrap();

        let state = runner2.store().load("abc12345");
        assert_eq!(state.workflow_history, vec!["plan", "build"]);

        let calls = fixed.calls();
        let context = calls[0].context.as_ref().unwrap();
        assert_eq!(context.get("plan_file").unwrap(), "specs/issue-1-plan.md");

        // Both build executions (failed + retried) are in the accounting.
        let summary = runner2.metrics().workflow_summary("abc12345");
        assert_eq!(
            summary
                .phases_breakdown
                .get("build")
                .map(|b| b.executions),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_plan_uses_classified_issue_command() {
        let transport = Arc::new(MockTransport::new().succeed("/bug", "specs/fix.md"));
        let (runner, dir) = make_runner(transport.clone());
        runner
            .store()
            .update("abc12345", |s| {
                s.issue_number = Some("9".to_string());
                s.issue_class = Some("/bug".to_string());
                s.worktree_path = Some(dir.path().to_path_buf());
            })
            .unwrap();

        runner
            .run_phase("abc12345", &find_spec("plan").unwrap())
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].slash_command, "/bug");
        assert_eq!(calls[0].agent_name, "sdlc_planner");
    }

    #[tokio::test]
    async fn test_build_without_plan_is_an_error() {
        let transport = Arc::new(MockTransport::new().succeed("/implement", "ok"));
        let (runner, dir) = make_runner(transport);
        runner
            .store()
            .update("abc12345", |s| {
                s.issue_number = Some("1".to_string());
                s.worktree_path = Some(dir.path().to_path_buf());
            })
            .unwrap();

        let err = runner
            .run_phase("abc12345", &find_spec("build").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("plan"));
    }

    #[test]
    fn test_pipeline_through_cuts_after_named_phase() {
        let full = pipeline_through(None).unwrap();
        assert_eq!(full.len(), 6);

        let prefix = pipeline_through(Some("test")).unwrap();
        let names: Vec<&str> = prefix.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["plan", "build", "test"]);

        assert!(pipeline_through(Some("deploy")).is_err());
    }
}
