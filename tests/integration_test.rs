// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end coverage of one coordinator run against scripted replay
//! responses: manager decomposition, a single developer assignment, and
//! the synthesized final verification pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use orkestra_config::{ModelEndpoint, RoleConfig, RolesConfig};
use orkestra_model::channel::{ChannelFactory, ReplaySource};
use orkestra_model::{AssistantMessage, Choice, CompletionResponse, RawFunctionCall, RawToolCall};
use orkestra_session::Session;
use orkestra_team::Coordinator;
use serde_json::json;

struct ScriptedSource {
    by_agent: HashMap<&'static str, Vec<CompletionResponse>>,
    cursors: std::sync::Mutex<HashMap<String, AtomicUsize>>,
}

impl ReplaySource for ScriptedSource {
    fn next_response(&self, agent_name: &str) -> Option<CompletionResponse> {
        let prefix = agent_name.trim_end_matches(|c: char| c.is_ascii_digit());
        let list = self.by_agent.get(prefix)?;
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(agent_name.to_string()).or_insert_with(|| AtomicUsize::new(0));
        let idx = cursor.fetch_add(1, Ordering::SeqCst);
        list.get(idx).cloned()
    }
}

fn text_response(s: &str) -> CompletionResponse {
    CompletionResponse::ChatCompletions {
        choices: vec![Choice { message: AssistantMessage { content: Some(s.to_string()), tool_calls: None } }],
    }
}

fn tool_call_response(id: &str, name: &str, args: serde_json::Value) -> CompletionResponse {
    CompletionResponse::ChatCompletions {
        choices: vec![Choice {
            message: AssistantMessage {
                content: None,
                tool_calls: Some(vec![RawToolCall {
                    id: id.to_string(),
                    function: RawFunctionCall { name: name.to_string(), arguments: args.to_string() },
                }]),
            },
        }],
    }
}

fn role(name: &str) -> RoleConfig {
    RoleConfig {
        role: name.to_string(),
        system_prompt: format!("You are the {name}."),
        model_endpoints: vec![ModelEndpoint { model: "gpt-4o".into(), endpoint: "http://localhost:9".into() }],
        temperature: 0.2,
        max_tokens: -1,
        timeout_seconds: 5,
        allowed_tools: None,
        default_git_branch: None,
    }
}

fn roles_config() -> RolesConfig {
    let mut cfg = RolesConfig::new();
    cfg.insert("manager".to_string(), role("manager"));
    cfg.insert("developer".to_string(), role("developer"));
    cfg.insert("auditor".to_string(), role("auditor"));
    cfg
}

#[tokio::test]
async fn coordinator_decomposes_dispatches_and_verifies() {
    let root = tempfile::tempdir().unwrap();
    let session = Session::new_session(root.path()).await.unwrap();

    let source = ScriptedSource {
        by_agent: HashMap::from([
            (
                "manager",
                vec![tool_call_response("assign-1", "assign_task", json!({"role": "developer", "task": "write the parser", "sequence": 1}))],
            ),
            ("developer", vec![tool_call_response("complete-1", "confirm_task_complete", json!({"summary": "done"}))]),
            ("auditor", vec![text_response("everything checks out")]),
        ]),
        cursors: std::sync::Mutex::new(HashMap::new()),
    };

    let factory = ChannelFactory::replay(Arc::new(source) as Arc<dyn ReplaySource>);
    let coordinator = Arc::new(Coordinator::new(roles_config(), factory, Arc::new(session), root.path().to_path_buf(), false));

    let report = coordinator.run("build a small parser").await.unwrap();

    assert_eq!(report.assignments.len(), 2, "one developer assignment plus the synthesized final verification");
    let developer_result = report.assignments.iter().find(|a| a.role == "developer").unwrap();
    assert!(developer_result.success);
    assert_eq!(developer_result.task, "write the parser");

    let verification = report.final_verification.as_ref().unwrap();
    assert_eq!(verification.role, "auditor");
    assert_eq!(verification.sequence, 99);
    assert!(verification.response.contains("everything checks out"));
}

#[tokio::test]
async fn coordinator_fails_fast_when_manager_assigns_an_undeclared_role() {
    let root = tempfile::tempdir().unwrap();
    let session = Session::new_session(root.path()).await.unwrap();

    let bad_response = tool_call_response("assign-1", "assign_task", json!({"role": "wizard", "task": "cast a spell", "sequence": 1}));
    let source = ScriptedSource {
        by_agent: HashMap::from([("manager", vec![bad_response.clone(), bad_response.clone(), bad_response])]),
        cursors: std::sync::Mutex::new(HashMap::new()),
    };

    let factory = ChannelFactory::replay(Arc::new(source) as Arc<dyn ReplaySource>);
    let coordinator = Arc::new(Coordinator::new(roles_config(), factory, Arc::new(session), root.path().to_path_buf(), false));

    let result = coordinator.run("do something arcane").await;
    assert!(result.is_err());
}
