// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Builds one agent binding for a role: a tool registry scoped to what that
//! role can actually use, the dispatcher wrapping it, and the `Agent` that
//! talks to the model. Mirrors the shape of the teacher's own per-role
//! binding step, generalized so any declared role (not just a fixed set)
//! can be instantiated this way.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use orkestra_config::RoleConfig;
use orkestra_model::channel::ChannelFactory;
use orkestra_session::Session;
use orkestra_tools::{
    AppendFileTool, AssignTaskTool, AssignTasksTool, AuditFilesTool, CheckPackageInstalledTool,
    CheckoutBranchTool, CloneRepoTool, ConfirmTaskCompleteTool, CreatePullRequestTool,
    DeleteFileTool, EditFileTool, GetFileInfoTool, InstallPackageTool, ListAllFilesTool,
    ListDirectoryTool, ListInstalledPackagesTool, PushBranchTool, RaiseCallbackTool,
    ReadFileTool, RunPythonTool, RunTestsTool, SearchFilesTool, SearchPackageTool, ToolRegistry,
    WriteFileTool,
};
use orkestra_core::{Agent, ToolDispatcher};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use orkestra_tools::AgentEvent;

const GIT_TOOL_NAMES: [&str; 4] = ["clone_repo", "checkout_branch", "push_branch", "create_pull_request"];

/// `true` when a role's `allowed_tools` either admits every tool (no
/// allowlist configured) or names at least one git tool. Used to decide
/// whether git tools get registered for this agent's binding at all, rather
/// than being registered-but-denied for every role that never touches git.
fn role_uses_git(role_cfg: &RoleConfig) -> bool {
    match &role_cfg.allowed_tools {
        None => true,
        Some(allowed) => GIT_TOOL_NAMES.iter().any(|name| allowed.contains(*name)),
    }
}

/// Everything the coordinator needs to run one instance of a role: the
/// agent itself, the dispatcher guarding its tool calls, and the receiving
/// end of the channel its agent-comm tools (`raise_callback`, `audit_files`,
/// `confirm_task_complete`, `assign_task`, `assign_tasks`) write into.
pub struct AgentBinding {
    pub agent: Agent,
    pub dispatcher: ToolDispatcher,
    pub events: UnboundedReceiver<AgentEvent>,
}

/// Builds the binding for one agent instance. `working_dir` scopes every
/// filesystem/git/package tool; `name` must be unique per session (the
/// coordinator derives it from role name plus an incrementing counter, e.g.
/// `developer01`).
pub fn build_agent(
    name: impl Into<String>,
    role_cfg: &RoleConfig,
    working_dir: &Path,
    channel_factory: &ChannelFactory,
    session: Arc<Session>,
    in_git_repo: bool,
) -> AgentBinding {
    let name = name.into();
    let (tx, rx) = mpsc::unbounded_channel::<AgentEvent>();
    let produced_files = Arc::new(Mutex::new(HashSet::new()));
    let working_dir: PathBuf = working_dir.to_path_buf();

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool { working_dir: working_dir.clone() });
    registry.register(WriteFileTool { working_dir: working_dir.clone() });
    registry.register(AppendFileTool { working_dir: working_dir.clone() });
    registry.register(DeleteFileTool { working_dir: working_dir.clone() });
    registry.register(ListDirectoryTool { working_dir: working_dir.clone() });
    registry.register(ListAllFilesTool { working_dir: working_dir.clone() });
    registry.register(SearchFilesTool { working_dir: working_dir.clone() });
    registry.register(GetFileInfoTool { working_dir: working_dir.clone() });
    registry.register(EditFileTool { working_dir: working_dir.clone() });
    registry.register(RunPythonTool { working_dir: working_dir.clone(), default_timeout_secs: 30 });
    registry.register(RunTestsTool { working_dir: working_dir.clone(), default_timeout_secs: 300 });
    registry.register(SearchPackageTool { working_dir: working_dir.clone() });
    registry.register(InstallPackageTool { working_dir: working_dir.clone() });
    registry.register(CheckPackageInstalledTool { working_dir: working_dir.clone() });
    registry.register(ListInstalledPackagesTool { working_dir: working_dir.clone() });

    // Agent-factory tool stripping: a role with no git use never gets git
    // tools registered at all, rather than present-but-denied.
    if role_uses_git(role_cfg) {
        registry.register(CloneRepoTool { working_dir: working_dir.clone() });
        registry.register(CheckoutBranchTool { working_dir: working_dir.clone() });
        registry.register(PushBranchTool { working_dir: working_dir.clone() });
        registry.register(CreatePullRequestTool { working_dir: working_dir.clone() });
    }

    registry.register(RaiseCallbackTool { agent_name: name.clone(), events: tx.clone() });
    registry.register(AuditFilesTool { agent_name: name.clone(), events: tx.clone(), produced_files: produced_files.clone() });
    registry.register(ConfirmTaskCompleteTool { agent_name: name.clone(), events: tx.clone() });
    registry.register(AssignTaskTool { events: tx.clone() });
    registry.register(AssignTasksTool { events: tx });

    let registry = Arc::new(registry);
    let dispatcher = ToolDispatcher::new(
        registry,
        role_cfg.allowed_tools.clone(),
        role_cfg.role.clone(),
        role_cfg.default_git_branch.clone(),
        produced_files,
    );
    let agent = Agent::new(name, role_cfg, channel_factory, &dispatcher.schemas(), in_git_repo, session);

    AgentBinding { agent, dispatcher, events: rx }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use orkestra_config::ModelEndpoint;
    use orkestra_model::channel::ReplaySource;
    use orkestra_model::CompletionResponse;
    use std::sync::atomic::AtomicUsize;

    struct EmptySource;
    impl ReplaySource for EmptySource {
        fn next_response(&self, _agent_name: &str) -> Option<CompletionResponse> {
            None
        }
    }

    fn role_cfg(allowed: Option<Vec<&str>>) -> RoleConfig {
        RoleConfig {
            role: "developer".to_string(),
            system_prompt: "You write code.".to_string(),
            model_endpoints: vec![ModelEndpoint { model: "gpt-4o".into(), endpoint: "http://localhost:9".into() }],
            temperature: 0.2,
            max_tokens: -1,
            timeout_seconds: 5,
            allowed_tools: allowed.map(|names| names.into_iter().map(String::from).collect()),
            default_git_branch: None,
        }
    }

    #[tokio::test]
    async fn binding_includes_git_tools_with_no_allowlist() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let factory = ChannelFactory::replay(Arc::new(EmptySource) as Arc<dyn ReplaySource>);
        let binding = build_agent("developer01", &role_cfg(None), root.path(), &factory, session, false);
        assert!(binding.dispatcher.is_read_only_tool("read_file"));
        assert!(!binding.dispatcher.is_read_only_tool("push_branch"));
        let _ = AtomicUsize::new(0);
    }

    #[tokio::test]
    async fn binding_strips_git_tools_when_role_disallows_them() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let factory = ChannelFactory::replay(Arc::new(EmptySource) as Arc<dyn ReplaySource>);
        let cfg = role_cfg(Some(vec!["read_file", "write_file"]));
        let binding = build_agent("developer01", &cfg, root.path(), &factory, session, false);
        let schemas = binding.dispatcher.schemas();
        assert!(!schemas.iter().any(|s| s.name == "push_branch"));
        assert!(schemas.iter().any(|s| s.name == "write_file"));
    }

    #[tokio::test]
    async fn binding_keeps_git_tools_when_role_allows_one() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let factory = ChannelFactory::replay(Arc::new(EmptySource) as Arc<dyn ReplaySource>);
        let cfg = role_cfg(Some(vec!["read_file", "push_branch"]));
        let binding = build_agent("developer01", &cfg, root.path(), &factory, session, false);
        let schemas = binding.dispatcher.schemas();
        assert!(schemas.iter().any(|s| s.name == "push_branch"));
    }

    #[tokio::test]
    async fn binding_always_registers_agent_comm_tools() {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(Session::new_session(root.path()).await.unwrap());
        let factory = ChannelFactory::replay(Arc::new(EmptySource) as Arc<dyn ReplaySource>);
        let binding = build_agent("manager01", &role_cfg(None), root.path(), &factory, session, false);
        let schemas = binding.dispatcher.schemas();
        for expected in ["raise_callback", "audit_files", "confirm_task_complete", "assign_task", "assign_tasks"] {
            assert!(schemas.iter().any(|s| s.name == expected), "missing {expected}");
        }
    }
}
