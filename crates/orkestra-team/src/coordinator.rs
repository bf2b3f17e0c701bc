// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The coordinator: decomposes a request into role-tagged assignments,
//! runs them sequence-bucket by sequence-bucket (concurrently within a
//! bucket), synthesizes a final verification pass, and — on a successful
//! git-backed run — pushes the working branch and opens a pull request.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use orkestra_config::RolesConfig;
use orkestra_model::channel::ChannelFactory;
use orkestra_session::Session;
use orkestra_tools::{AgentEvent, CallbackType, CreatePullRequestTool, PushBranchTool, TaskAssignment, Tool, ToolCall};
use serde_json::json;

use crate::agent_factory::{self, AgentBinding};
use crate::decomposition;
use crate::events::{render_params, EventRecorder};

const MAX_DECOMPOSITION_RETRIES: u32 = 2;
const TRUNCATED_REQUEST_CHARS: usize = 2_000;
const FINAL_VERIFICATION_SEQUENCE: i64 = 99;

/// A callback an agent raised mid-task: a blocker, a clarification request,
/// or a general query. Blockers feed into the final verification task;
/// every callback is surfaced to the caller in [`CoordinatorReport`].
#[derive(Debug, Clone)]
pub struct Callback {
    pub agent_name: String,
    pub callback_type: CallbackType,
    pub message: String,
}

/// The outcome of running one [`TaskAssignment`] through an agent's full
/// agentic loop.
#[derive(Debug, Clone)]
pub struct AssignmentResult {
    pub role: String,
    pub agent: String,
    pub task: String,
    pub sequence: i64,
    pub response: String,
    /// `"live"` or `"replay"`, mirroring which channel produced the result.
    pub source: &'static str,
    pub success: bool,
    pub error: Option<String>,
    pub blockers: Vec<String>,
}

/// Everything one coordinator run produced.
#[derive(Debug, Clone)]
pub struct CoordinatorReport {
    pub assignments: Vec<AssignmentResult>,
    pub final_verification: Option<AssignmentResult>,
    pub callbacks: Vec<Callback>,
}

pub struct Coordinator {
    roles: RolesConfig,
    channel_factory: ChannelFactory,
    session: Arc<Session>,
    working_dir: PathBuf,
    in_git_repo: bool,
    recorder: EventRecorder,
    instance_counters: Mutex<std::collections::HashMap<String, u32>>,
    callbacks: Mutex<Vec<Callback>>,
    /// One cancel sender per assignment currently in flight, keyed by its
    /// agent instance name. [`Coordinator::cancel_all`] drains this to abort
    /// every running assignment without touching the ones that have already
    /// finished.
    pending_cancels: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl Coordinator {
    pub fn new(roles: RolesConfig, channel_factory: ChannelFactory, session: Arc<Session>, working_dir: PathBuf, in_git_repo: bool) -> Self {
        let recorder = EventRecorder::new(session.clone());
        Self {
            roles,
            channel_factory,
            session,
            working_dir,
            in_git_repo,
            recorder,
            instance_counters: Mutex::new(std::collections::HashMap::new()),
            callbacks: Mutex::new(Vec::new()),
            pending_cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Aborts every assignment currently in flight. Each one's running
    /// agentic loop is dropped at its next `await` point rather than being
    /// allowed to run to completion; the assignment is recorded as failed.
    pub fn cancel_all(&self) {
        let mut pending = self.pending_cancels.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(());
        }
    }

    fn source_tag(&self) -> &'static str {
        match &self.channel_factory {
            ChannelFactory::Live { .. } => "live",
            ChannelFactory::Replay { .. } => "replay",
        }
    }

    fn next_instance_name(&self, role: &str) -> String {
        let mut counters = self.instance_counters.lock().unwrap();
        let n = counters.entry(role.to_string()).or_insert(0);
        *n += 1;
        format!("{role}{:02}", *n)
    }

    fn build_binding(&self, role: &str, name: &str) -> anyhow::Result<AgentBinding> {
        let role_cfg = self.roles.get(role).ok_or_else(|| anyhow::anyhow!("no role config declared for '{role}'"))?;
        Ok(agent_factory::build_agent(name, role_cfg, &self.working_dir, &self.channel_factory, self.session.clone(), self.in_git_repo))
    }

    /// Runs the whole pipeline for one user request: decompose, dispatch in
    /// sequence-ordered buckets, verify, finalize the git workflow.
    pub async fn run(self: &Arc<Self>, user_request: &str) -> anyhow::Result<CoordinatorReport> {
        let valid_roles: HashSet<String> = self.roles.keys().cloned().collect();
        let manager_name = self.next_instance_name("manager");
        let manager = self.build_binding("manager", &manager_name)?;

        let assignments = decomposition::decompose(
            &manager.agent,
            &manager.dispatcher,
            manager.events,
            user_request,
            &valid_roles,
            &self.recorder,
            MAX_DECOMPOSITION_RETRIES,
        )
        .await?;

        let mut buckets: BTreeMap<i64, Vec<TaskAssignment>> = BTreeMap::new();
        let mut has_final_verification = false;
        for assignment in assignments {
            if assignment.role == "auditor" && assignment.sequence == FINAL_VERIFICATION_SEQUENCE {
                has_final_verification = true;
            }
            buckets.entry(assignment.sequence).or_default().push(assignment);
        }

        let mut results = Vec::new();
        for (_, bucket) in buckets {
            let mut handles = Vec::with_capacity(bucket.len());
            for assignment in bucket {
                let coordinator = Arc::clone(self);
                let request = user_request.to_string();
                handles.push(tokio::spawn(async move { coordinator.execute_assignment(assignment, &request).await }));
            }
            for handle in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(join_err) => results.push(AssignmentResult {
                        role: "unknown".to_string(),
                        agent: "unknown".to_string(),
                        task: String::new(),
                        sequence: 0,
                        response: String::new(),
                        source: self.source_tag(),
                        success: false,
                        error: Some(format!("assignment task panicked: {join_err}")),
                        blockers: Vec::new(),
                    }),
                }
            }
        }

        let final_verification = if has_final_verification {
            None
        } else {
            let blockers = self.pending_blockers();
            let task = build_verification_task(user_request, &blockers);
            let assignment = TaskAssignment { role: "auditor".to_string(), task, sequence: FINAL_VERIFICATION_SEQUENCE };
            let result = self.execute_assignment(assignment, user_request).await;
            results.push(result.clone());
            Some(result)
        };

        if let Err(e) = self.finalize_git_workflow().await {
            tracing::warn!(error = %e, "git workflow finalization failed (non-fatal)");
        }

        Ok(CoordinatorReport { assignments: results, final_verification, callbacks: self.callbacks.lock().unwrap().clone() })
    }

    fn pending_blockers(&self) -> Vec<String> {
        self.callbacks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.callback_type == CallbackType::Blocker)
            .map(|c| c.message.clone())
            .collect()
    }

    /// Runs one assignment end to end: builds a fresh agent instance for
    /// its role, runs the agentic loop, drains its raised callbacks into
    /// the shared ledger, and records `task_started`/`task_completed`/
    /// `task_failed`. Registers a cancel receiver for the duration so
    /// [`Coordinator::cancel_all`] can abort it mid-flight.
    async fn execute_assignment(&self, assignment: TaskAssignment, original_request: &str) -> AssignmentResult {
        let name = self.next_instance_name(&assignment.role);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending_cancels.lock().unwrap().insert(name.clone(), cancel_tx);
        let result = tokio::select! {
            result = self.run_assignment(assignment, original_request, name.clone()) => result,
            _ = cancel_rx => AssignmentResult {
                role: "unknown".to_string(),
                agent: name.clone(),
                task: String::new(),
                sequence: 0,
                response: String::new(),
                source: self.source_tag(),
                success: false,
                error: Some("cancelled".to_string()),
                blockers: Vec::new(),
            },
        };
        self.pending_cancels.lock().unwrap().remove(&name);
        result
    }

    async fn run_assignment(&self, assignment: TaskAssignment, original_request: &str, name: String) -> AssignmentResult {
        let binding = match self.build_binding(&assignment.role, &name) {
            Ok(b) => b,
            Err(e) => {
                self.recorder
                    .record_failed(
                        "task_failed",
                        "coordinator",
                        render_params(&[("role", json!(assignment.role)), ("sequence", json!(assignment.sequence))]),
                        "OrganizationError",
                        &e.to_string(),
                    )
                    .await;
                return AssignmentResult {
                    role: assignment.role,
                    agent: name,
                    task: assignment.task,
                    sequence: assignment.sequence,
                    response: String::new(),
                    source: self.source_tag(),
                    success: false,
                    error: Some(e.to_string()),
                    blockers: Vec::new(),
                };
            }
        };

        self.recorder
            .record(
                "task_started",
                "coordinator",
                render_params(&[("role", json!(assignment.role)), ("agent", json!(name)), ("sequence", json!(assignment.sequence))]),
            )
            .await;

        let user_prompt = build_assignment_prompt(&assignment.task, original_request);
        let loop_result = orkestra_core::run_agentic_loop(&binding.agent, &binding.dispatcher, &user_prompt, orkestra_core::DEFAULT_MAX_ITERATIONS).await;

        let blockers = self.drain_callbacks(&name, binding.events);

        match loop_result {
            Ok(outcome) => {
                self.recorder
                    .record(
                        "task_completed",
                        "coordinator",
                        render_params(&[
                            ("role", json!(assignment.role)),
                            ("agent", json!(name)),
                            ("iterations", json!(outcome.iteration_count)),
                            ("task_complete", json!(outcome.task_complete)),
                        ]),
                    )
                    .await;
                AssignmentResult {
                    role: assignment.role,
                    agent: name,
                    task: assignment.task,
                    sequence: assignment.sequence,
                    response: outcome.final_response,
                    source: self.source_tag(),
                    success: true,
                    error: None,
                    blockers,
                }
            }
            Err(e) => {
                self.recorder
                    .record_failed(
                        "task_failed",
                        "coordinator",
                        render_params(&[("role", json!(assignment.role)), ("agent", json!(name))]),
                        "AgenticLoopError",
                        &e.to_string(),
                    )
                    .await;
                AssignmentResult {
                    role: assignment.role,
                    agent: name,
                    task: assignment.task,
                    sequence: assignment.sequence,
                    response: String::new(),
                    source: self.source_tag(),
                    success: false,
                    error: Some(e.to_string()),
                    blockers,
                }
            }
        }
    }

    /// Drains every [`AgentEvent::Callback`] an agent raised during its
    /// loop into the shared ledger, returning just the blocker messages
    /// (for embedding into the final verification task).
    fn drain_callbacks(&self, agent_name: &str, mut events: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<String> {
        let mut blockers = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::Callback { agent_name: from, callback_type, message } = event {
                if callback_type == CallbackType::Blocker {
                    blockers.push(message.clone());
                }
                self.callbacks.lock().unwrap().push(Callback { agent_name: from, callback_type, message });
            }
        }
        let _ = agent_name;
        blockers
    }

    /// Pushes the working branch and opens a pull request, if a git repo
    /// is in play, at least one role allows `push_branch`, and the current
    /// branch isn't already the configured default. Every failure here is
    /// logged and swallowed — a successful run should not be undone by a
    /// git hiccup at the very end.
    async fn finalize_git_workflow(&self) -> anyhow::Result<()> {
        if !self.in_git_repo {
            return Ok(());
        }
        let git_allowed = self.roles.values().any(|r| r.allowed_tools.as_ref().map_or(true, |a| a.contains("push_branch")));
        if !git_allowed {
            return Ok(());
        }
        let default_branch = self.roles.values().find_map(|r| r.default_git_branch.clone()).unwrap_or_else(|| "main".to_string());

        let current_branch = current_branch(&self.working_dir).await?;
        if current_branch == default_branch {
            return Ok(());
        }

        let push = PushBranchTool { working_dir: self.working_dir.clone() };
        let push_out = push.execute(&ToolCall { id: "git-workflow-finalize-push".into(), name: "push_branch".into(), args: json!({"repo_dir": "."}) }).await;
        if push_out.is_error {
            tracing::warn!(error = %push_out.content, "push_branch failed during git workflow finalization");
            return Ok(());
        }

        let pr = CreatePullRequestTool { working_dir: self.working_dir.clone() };
        let pr_out = pr
            .execute(&ToolCall {
                id: "git-workflow-finalize-pr".into(),
                name: "create_pull_request".into(),
                args: json!({"repo_dir": ".", "base_branch": default_branch}),
            })
            .await;
        if pr_out.is_error {
            tracing::warn!(error = %pr_out.content, "create_pull_request failed during git workflow finalization");
        }
        Ok(())
    }
}

async fn current_branch(working_dir: &std::path::Path) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("git").args(["rev-parse", "--abbrev-ref", "HEAD"]).current_dir(working_dir).output().await?;
    if !output.status.success() {
        anyhow::bail!("git rev-parse failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}... [truncated]")
}

fn build_assignment_prompt(description: &str, original_request: &str) -> String {
    format!(
        "Task: {description}\n\nOriginal request (for context, truncated):\n{}",
        truncate_text(original_request, TRUNCATED_REQUEST_CHARS)
    )
}

fn build_verification_task(original_request: &str, blockers: &[String]) -> String {
    let mut task = format!(
        "Perform a final audit of this run. Original request (truncated):\n{}",
        truncate_text(original_request, TRUNCATED_REQUEST_CHARS)
    );
    if !blockers.is_empty() {
        task.push_str("\n\nOpen blockers raised during the run:\n");
        for b in blockers {
            task.push_str(&format!("- {b}\n"));
        }
    }
    task
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_passes_short_strings_through() {
        assert_eq!(truncate_text("short", 100), "short");
    }

    #[test]
    fn truncate_text_caps_long_strings() {
        let long = "a".repeat(50);
        let truncated = truncate_text(&long, 10);
        assert!(truncated.starts_with(&"a".repeat(10)));
        assert!(truncated.ends_with("[truncated]"));
    }

    #[test]
    fn build_verification_task_lists_blockers() {
        let task = build_verification_task("do the thing", &["missing credentials".to_string()]);
        assert!(task.contains("missing credentials"));
    }

    #[test]
    fn build_verification_task_omits_blocker_section_when_empty() {
        let task = build_verification_task("do the thing", &[]);
        assert!(!task.contains("Open blockers"));
    }

    #[test]
    fn build_assignment_prompt_includes_description_and_request() {
        let prompt = build_assignment_prompt("write the parser", "build a CLI tool");
        assert!(prompt.contains("write the parser"));
        assert!(prompt.contains("build a CLI tool"));
    }
}
