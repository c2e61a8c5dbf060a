//! The agent cycle: context, plan, validate, apply, report.
//!
//! [`Agent::run_agent`] never fails. Planner and validation errors end the cycle
//! in [`CyclePhase::Failed`] with a degraded response; per-action errors are
//! logged and the remaining actions still run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::allow_list::default_allow_list;
use crate::core::cycle::CyclePhase;
use crate::core::endpoint::{base_url, invocation_url};
use crate::core::preview::{ROOT_ROUTE, infer_preview_path};
use crate::core::summary::summarize_plan;
use crate::core::types::{Action, AgentResponse, PlanRequest, PlannerReply};
use crate::core::validate::{PlanError, validate_plan};
use crate::io::command::CommandRunner;
use crate::io::config::AgentConfig;
use crate::io::context::build_context;
use crate::io::error::ApplyError;
use crate::io::files::FileApplier;
use crate::io::planner::{HttpPlanner, Planner, PlannerError};
use crate::io::sandbox::Sandbox;
use crate::io::trace::{HttpTraceSink, TraceKind, TraceSink, Tracer};

/// Errors that end a cycle in [`CyclePhase::Failed`].
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// Per-call options for [`Agent::run_agent`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Correlates the cycle's trace events; generated when absent or blank.
    pub session_id: Option<String>,
    /// Planner base or invocation URL; overrides the configured one.
    pub planner_url: Option<String>,
}

pub struct Agent {
    sandbox: Sandbox,
    config: AgentConfig,
    planner: Arc<dyn Planner>,
    sink: Arc<dyn TraceSink>,
    allow_list: Vec<String>,
}

impl Agent {
    pub fn new(
        sandbox: Sandbox,
        config: AgentConfig,
        planner: Arc<dyn Planner>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            sandbox,
            config,
            planner,
            sink,
            allow_list: default_allow_list(),
        }
    }

    /// Agent talking HTTP to the configured planner and trace sink.
    pub fn from_config(root: &Path, config: AgentConfig) -> Result<Self, ApplyError> {
        let sandbox = Sandbox::new(root)?;
        let planner = Arc::new(HttpPlanner::new(config.planning_timeout()));
        let sink = Arc::new(HttpTraceSink::new(config.trace_timeout()));
        Ok(Self::new(sandbox, config, planner, sink))
    }

    pub fn with_allow_list(mut self, allow_list: Vec<String>) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one cycle under the outer `ceiling`.
    ///
    /// Exceeding the ceiling yields the degraded `timeout` response whatever
    /// phase the cycle was in; actions already applied stay applied.
    pub async fn run_agent_within(
        &self,
        prompt: &str,
        options: RunOptions,
        ceiling: Duration,
    ) -> AgentResponse {
        let session_id = resolve_session_id(options.session_id.as_deref());
        let invocation = invocation_url(options.planner_url.as_deref(), &self.config.planner_url);
        let options = RunOptions {
            session_id: Some(session_id.clone()),
            ..options
        };

        match tokio::time::timeout(ceiling, self.run_agent(prompt, options)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(ceiling_secs = ceiling.as_secs_f64(), "cycle exceeded its ceiling");
                let tracer = Tracer::new(self.sink.clone(), base_url(&invocation), &session_id);
                let err = CycleError::Planner(PlannerError::Timeout);
                tracer
                    .emit(
                        TraceKind::Error,
                        json!({"message": err.to_string(), "phase": "cycle"}),
                    )
                    .await;
                degraded(&session_id, &err, Vec::new())
            }
        }
    }

    /// Run one request/plan/apply/report cycle for `prompt`.
    #[instrument(skip_all, fields(session_id = tracing::field::Empty))]
    pub async fn run_agent(&self, prompt: &str, options: RunOptions) -> AgentResponse {
        let session_id = resolve_session_id(options.session_id.as_deref());
        tracing::Span::current().record("session_id", session_id.as_str());
        let invocation = invocation_url(options.planner_url.as_deref(), &self.config.planner_url);
        let tracer = Tracer::new(self.sink.clone(), base_url(&invocation), &session_id);
        info!(url = %invocation, "cycle started");

        let mut phases = PhaseTrace::new(&tracer);
        let context = build_context(&self.sandbox, &self.config.context);
        phases
            .advance(CyclePhase::ContextBuilt, json!({"files": context.files.len()}))
            .await;

        phases.advance(CyclePhase::Planning, json!({})).await;
        let request = PlanRequest {
            input: prompt.to_string(),
            context,
            session_id: session_id.clone(),
        };
        let (reply, plan) = match self.request_plan(&tracer, &invocation, &request).await {
            Ok(planned) => planned,
            Err(err) => return phases.fail(&session_id, err).await,
        };

        phases
            .advance(CyclePhase::Validated, json!({"actions": plan.len()}))
            .await;
        tracer
            .emit(TraceKind::PlanSummary, plan_summary(&plan))
            .await;

        phases.advance(CyclePhase::Applying, json!({})).await;
        let (logs, failures) = self.apply_plan(&tracer, &plan).await;

        let preview_path = infer_preview_path(&plan);
        phases
            .advance(CyclePhase::Done, json!({"previewPath": preview_path}))
            .await;
        tracer
            .emit(
                TraceKind::Done,
                json!({"ok": true, "previewPath": preview_path, "actions": plan.len(), "failures": failures}),
            )
            .await;
        info!(actions = plan.len(), failures, preview = %preview_path, "cycle done");

        let assistant = reply
            .assistant_message
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| summarize_plan(prompt, &plan));
        AgentResponse {
            assistant,
            plan,
            logs,
            preview_path,
            session_id,
            error: None,
        }
    }

    async fn request_plan(
        &self,
        tracer: &Tracer,
        invocation: &str,
        request: &PlanRequest,
    ) -> Result<(PlannerReply, Vec<Action>), CycleError> {
        tracer
            .emit(
                TraceKind::PlannerCall,
                json!({"url": invocation, "contextFiles": request.context.files.len()}),
            )
            .await;

        let budget = self.config.planning_timeout();
        let result = match tokio::time::timeout(budget, self.planner.plan(invocation, request)).await
        {
            Ok(result) => result,
            Err(_) => Err(PlannerError::Timeout),
        };

        match &result {
            Ok(reply) => {
                tracer
                    .emit(
                        TraceKind::PlannerDone,
                        json!({
                            "ok": true,
                            "hasAssistantMessage": reply.assistant_message.is_some(),
                        }),
                    )
                    .await;
            }
            Err(err) => {
                warn!(err = %err, "planning request failed");
                tracer
                    .emit(
                        TraceKind::PlannerDone,
                        json!({"ok": false, "error": err.to_string()}),
                    )
                    .await;
            }
        }
        let reply = result?;

        let raw = reply
            .actions
            .clone()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let plan = validate_plan(&raw)?;
        Ok((reply, plan))
    }

    /// Apply `plan` in order. Returns the log lines and the number of failed actions.
    async fn apply_plan(&self, tracer: &Tracer, plan: &[Action]) -> (Vec<String>, usize) {
        let files = FileApplier::new(&self.sandbox, tracer);
        let commands = CommandRunner::new(
            self.sandbox.root().to_path_buf(),
            self.config.command_timeout(),
            self.config.command_output_limit_bytes,
        )
        .with_allow_list(self.allow_list.clone());

        let mut logs = Vec::with_capacity(plan.len());
        let mut failures = 0;
        for (index, action) in plan.iter().enumerate() {
            match apply_action(&files, &commands, tracer, action).await {
                Ok(line) => {
                    debug!(index, line = %line, "action applied");
                    logs.push(line);
                }
                Err(err) => {
                    failures += 1;
                    warn!(index, kind = action.kind(), err = %err, "action failed");
                    tracer
                        .emit(
                            TraceKind::Error,
                            json!({
                                "index": index,
                                "action": action.kind(),
                                "message": err.to_string(),
                            }),
                        )
                        .await;
                    logs.push(format!("error: {err}"));
                }
            }
        }
        (logs, failures)
    }
}

async fn apply_action(
    files: &FileApplier<'_>,
    commands: &CommandRunner,
    tracer: &Tracer,
    action: &Action,
) -> Result<String, ApplyError> {
    match action {
        Action::CreateFile { path, contents } => {
            files.write(path, contents, false).await?;
            Ok(format!("create file {path}"))
        }
        Action::UpdateFile { path, contents } => {
            files.write(path, contents, true).await?;
            Ok(format!("update file {path}"))
        }
        Action::DeleteFile { path } => {
            files.remove(path).await?;
            Ok(format!("delete file {path}"))
        }
        Action::RunCommand { command } => {
            let outcome = commands.run(command, tracer).await?;
            Ok(if outcome.skipped {
                format!("skip command {command} (not allowed)")
            } else if outcome.timed_out {
                format!("run command {command} (timed out, exit {})", outcome.exit_code)
            } else {
                format!("run command {command} (exit {})", outcome.exit_code)
            })
        }
    }
}

/// Emits a `step` trace event on every phase change.
struct PhaseTrace<'a> {
    tracer: &'a Tracer,
    phase: CyclePhase,
}

impl<'a> PhaseTrace<'a> {
    fn new(tracer: &'a Tracer) -> Self {
        Self {
            tracer,
            phase: CyclePhase::Idle,
        }
    }

    async fn advance(&mut self, next: CyclePhase, detail: Value) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        debug!(from = self.phase.as_str(), to = next.as_str(), "phase");
        self.phase = next;
        self.tracer
            .emit(
                TraceKind::Step,
                json!({
                    "phase": next.as_str(),
                    "terminal": next.is_terminal(),
                    "detail": detail,
                }),
            )
            .await;
    }

    async fn fail(mut self, session_id: &str, err: CycleError) -> AgentResponse {
        let from = self.phase;
        self.advance(CyclePhase::Failed, json!({"from": from.as_str()}))
            .await;
        let message = err.to_string();
        warn!(err = %message, "cycle failed");
        self.tracer
            .emit(
                TraceKind::Error,
                json!({"message": message, "phase": from.as_str()}),
            )
            .await;
        self.tracer
            .emit(
                TraceKind::Done,
                json!({"ok": false, "previewPath": ROOT_ROUTE, "error": message}),
            )
            .await;
        degraded(session_id, &err, vec![format!("error: {message}")])
    }
}

fn degraded(session_id: &str, err: &CycleError, logs: Vec<String>) -> AgentResponse {
    let assistant = match err {
        CycleError::Planner(PlannerError::Timeout) => {
            "Sorry, the planner did not answer in time. No changes were made.".to_string()
        }
        CycleError::Planner(_) => {
            format!("Sorry, I could not reach the planner ({err}). No changes were made.")
        }
        CycleError::Plan(_) => {
            format!("Sorry, the planner proposed a plan I cannot apply ({err}). No changes were made.")
        }
    };
    AgentResponse {
        assistant,
        plan: Vec::new(),
        logs,
        preview_path: ROOT_ROUTE.to_string(),
        session_id: session_id.to_string(),
        error: Some(err.to_string()),
    }
}

fn plan_summary(plan: &[Action]) -> Value {
    let actions: Vec<Value> = plan
        .iter()
        .map(|action| match action {
            Action::RunCommand { command } => json!({"type": action.kind(), "command": command}),
            _ => json!({"type": action.kind(), "path": action.path()}),
        })
        .collect();
    json!({"count": plan.len(), "actions": actions})
}

fn resolve_session_id(requested: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingSink, ScriptedPlanner, ScriptedReply, TestProject};

    const HELLO_PAGE: &str = "export default function P(){return <div>hi</div>}";

    fn agent(project: &TestProject, planner: ScriptedPlanner, sink: &RecordingSink) -> Agent {
        agent_with(project, planner, sink, AgentConfig::default())
    }

    fn agent_with(
        project: &TestProject,
        planner: ScriptedPlanner,
        sink: &RecordingSink,
        config: AgentConfig,
    ) -> Agent {
        Agent::new(
            project.sandbox().clone(),
            config,
            Arc::new(planner),
            Arc::new(sink.clone()),
        )
    }

    fn options(session: &str) -> RunOptions {
        RunOptions {
            session_id: Some(session.to_string()),
            planner_url: None,
        }
    }

    #[tokio::test]
    async fn hello_page_is_created_and_previewed() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([
            {"type": "create_file", "path": "app/hello/page.tsx", "contents": HELLO_PAGE}
        ]));
        let agent = agent(&project, planner.clone(), &sink);

        let response = agent.run_agent("add a hello page", options("s-1")).await;

        assert_eq!(response.error, None);
        assert_eq!(response.preview_path, "/hello");
        assert!(
            response
                .logs
                .contains(&"create file app/hello/page.tsx".to_string())
        );
        assert_eq!(project.read("app/hello/page.tsx").as_deref(), Some(HELLO_PAGE));
        assert_eq!(response.session_id, "s-1");
        assert!(response.assistant.starts_with("changes applied"));

        let requests = planner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "http://localhost:8000/invocations");
        assert_eq!(requests[0].1.input, "add a hello page");
        assert_eq!(requests[0].1.session_id, "s-1");
    }

    #[tokio::test]
    async fn every_phase_is_traced_in_order() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([]));

        agent(&project, planner, &sink)
            .run_agent("noop", options("s"))
            .await;

        let steps: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind == TraceKind::Step)
            .collect();
        let phases: Vec<&str> = steps
            .iter()
            .map(|e| e.payload["phase"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(
            phases,
            ["context_built", "planning", "validated", "applying", "done"]
        );
        let terminal: Vec<bool> = steps
            .iter()
            .map(|e| e.payload["terminal"] == true)
            .collect();
        assert_eq!(terminal, [false, false, false, false, true]);
        let kinds = sink.kinds();
        assert!(kinds.contains(&TraceKind::PlannerCall));
        assert!(kinds.contains(&TraceKind::PlannerDone));
        assert!(kinds.contains(&TraceKind::PlanSummary));
        assert_eq!(kinds.last(), Some(&TraceKind::Done));
        assert!(sink.events().iter().all(|e| e.session_id == "s"));
    }

    #[tokio::test]
    async fn explicit_planner_url_drives_request_and_trace_base() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([]));
        let agent = agent(&project, planner.clone(), &sink);

        agent
            .run_agent(
                "x",
                RunOptions {
                    session_id: None,
                    planner_url: Some("http://planner.test/invocations/".to_string()),
                },
            )
            .await;

        assert_eq!(planner.requests()[0].0, "http://planner.test/invocations");
        assert!(sink.bases().iter().all(|b| b == "http://planner.test"));
    }

    #[tokio::test]
    async fn disallowed_action_rejects_whole_plan_without_side_effects() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([
            {"type": "create_file", "path": "a.txt", "contents": "a"},
            {"type": "exec_shell", "command": "rm -rf /"}
        ]));

        let response = agent(&project, planner, &sink)
            .run_agent("wipe", options("s"))
            .await;

        assert!(response.plan.is_empty());
        assert_eq!(response.preview_path, "/");
        let error = response.error.expect("error");
        assert!(error.contains("disallowed action type `exec_shell`"), "{error}");
        assert!(project.list_files().is_empty());
        let kinds = sink.kinds();
        assert!(!kinds.contains(&TraceKind::FileOpStart));
        assert!(!kinds.contains(&TraceKind::CommandStart));
        assert!(kinds.contains(&TraceKind::Error));
    }

    #[tokio::test]
    async fn path_escape_does_not_stop_later_actions() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([
            {"type": "create_file", "path": "../../evil.txt", "contents": "x"},
            {"type": "create_file", "path": "app/ok/page.tsx", "contents": "ok"}
        ]));

        let response = agent(&project, planner, &sink)
            .run_agent("two files", options("s"))
            .await;

        assert_eq!(response.error, None);
        assert_eq!(response.plan.len(), 2);
        assert!(response.logs[0].starts_with("error: path escapes project root"));
        assert_eq!(response.logs[1], "create file app/ok/page.tsx");
        assert_eq!(response.preview_path, "/ok");
        assert_eq!(project.list_files(), ["app/ok/page.tsx"]);
    }

    #[tokio::test]
    async fn unlisted_command_is_logged_as_skipped() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([
            {"type": "run_command", "command": "touch pwned"}
        ]));

        let response = agent(&project, planner, &sink)
            .run_agent("x", options("s"))
            .await;

        assert_eq!(response.logs, ["skip command touch pwned (not allowed)"]);
        assert!(!project.exists("pwned"));
    }

    #[tokio::test]
    async fn planning_timeout_degrades() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::new(vec![ScriptedReply::Delay(
            Duration::from_secs(30),
            PlannerReply::default(),
        )]);
        let config = AgentConfig {
            planning_timeout_secs: 1,
            ..AgentConfig::default()
        };

        let response = agent_with(&project, planner, &sink, config)
            .run_agent("slow", options("s"))
            .await;

        assert_eq!(response.error.as_deref(), Some("timeout"));
        assert!(response.plan.is_empty());
        assert_eq!(response.preview_path, "/");
        assert!(!response.assistant.is_empty());
    }

    #[tokio::test]
    async fn outer_ceiling_degrades_with_same_session() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::new(vec![ScriptedReply::Delay(
            Duration::from_secs(30),
            PlannerReply::default(),
        )]);

        let response = agent(&project, planner, &sink)
            .run_agent_within("slow", RunOptions::default(), Duration::from_millis(100))
            .await;

        assert_eq!(response.error.as_deref(), Some("timeout"));
        assert!(!response.session_id.is_empty());
        assert!(
            sink.events()
                .iter()
                .all(|e| e.session_id == response.session_id)
        );
    }

    #[tokio::test]
    async fn planner_http_error_is_fatal() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::failing(PlannerError::Http {
            status: 502,
            body: "bad gateway".to_string(),
        });

        let response = agent(&project, planner, &sink)
            .run_agent("x", options("s"))
            .await;

        let error = response.error.expect("error");
        assert!(error.contains("HTTP 502"), "{error}");
        assert_eq!(response.logs, [format!("error: {error}")]);
        let last = sink.events().pop().expect("done event");
        assert_eq!(last.kind, TraceKind::Done);
        assert_eq!(last.payload["ok"], false);
    }

    #[tokio::test]
    async fn planner_message_wins_over_summary() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::new(vec![ScriptedReply::Reply(PlannerReply {
            assistant_message: Some("Done: added it.".to_string()),
            actions: None,
        })]);

        let response = agent(&project, planner, &sink)
            .run_agent("x", options("s"))
            .await;

        assert_eq!(response.assistant, "Done: added it.");
        assert!(response.plan.is_empty());
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn missing_session_id_is_generated() {
        let project = TestProject::new();
        let sink = RecordingSink::new();
        let planner = ScriptedPlanner::with_actions(json!([]));

        let response = agent(&project, planner.clone(), &sink)
            .run_agent(
                "x",
                RunOptions {
                    session_id: Some("   ".to_string()),
                    planner_url: None,
                },
            )
            .await;

        assert!(uuid::Uuid::parse_str(&response.session_id).is_ok());
        assert_eq!(planner.requests()[0].1.session_id, response.session_id);
    }
}
