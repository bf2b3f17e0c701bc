// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The agentic loop: trim history, call the model, dedup cached reads,
//! execute tool calls, detect stuck loops, and inject results back into the
//! conversation — until the agent confirms completion, produces no more
//! tool calls, or the iteration ceiling is reached.

use std::collections::{HashMap, VecDeque};

use orkestra_model::{CompletionResponse, Message, ToolChoice};
use orkestra_tools::ToolOutput;
use serde_json::Value;

use crate::agent::Agent;
use crate::compact;
use crate::dispatch::{self, ToolDispatcher};
use crate::extraction;

pub const DEFAULT_MAX_ITERATIONS: usize = 25;
const LOOP_DETECTION_WINDOW: usize = 3;
/// Per-tool-result character cap before injecting into history. Distinct
/// from [`compact::MAX_CONTEXT_CHARS`], which bounds the whole transcript.
const MAX_TOOL_RESULT_CHARS: usize = 8_000;

#[derive(Debug)]
pub struct LoopResult {
    pub final_response: String,
    pub conversation_history: Vec<Message>,
    pub tool_results_per_iteration: Vec<Vec<ToolOutput>>,
    pub iteration_count: usize,
    pub task_complete: bool,
}

/// Runs the loop for `agent` starting from `user_prompt`, using `dispatcher`
/// for tool execution and allowlist enforcement.
pub async fn run(agent: &Agent, dispatcher: &ToolDispatcher, user_prompt: &str, max_iterations: usize) -> anyhow::Result<LoopResult> {
    let mut history = vec![Message::system(agent.system_prompt().to_string()), Message::user(user_prompt.to_string())];
    let mut files_already_read: HashMap<String, String> = HashMap::new();
    let mut tool_results_per_iteration: Vec<Vec<ToolOutput>> = Vec::new();
    let mut signature_window: VecDeque<Vec<(String, String)>> = VecDeque::with_capacity(LOOP_DETECTION_WINDOW);
    let mut force_text_response = false;
    let mut tool_override = false;
    let mut task_complete = false;
    let mut final_response = String::new();
    let mut iteration_count = 0usize;

    for _ in 0..max_iterations {
        iteration_count += 1;

        let cached_files: Vec<String> = files_already_read.keys().cloned().collect();
        compact::trim_history(&mut history, &cached_files);

        let tools = if tool_override { dispatcher.write_only_schemas() } else { dispatcher.schemas() };
        let tool_choice = if force_text_response { Some(ToolChoice::None) } else { None };

        let response = agent.complete_with_retry(&history, tools, tool_choice).await?;
        let response_style = matches!(response, CompletionResponse::ResponseStyle { .. });
        let (text, mut tool_calls) = response.extract();

        if tool_calls.is_empty() {
            let fenced = extraction::extract_fenced_calls(&text);
            tool_calls = if !fenced.is_empty() {
                fenced
            } else {
                let allowed_names = dispatcher.schemas().into_iter().map(|s| s.name).collect();
                extraction::extract_plain_text_calls(&text, &allowed_names)
            };
        }

        history.push(Message::assistant_with_tool_calls(text.clone(), tool_calls.clone()));
        final_response = text;

        if tool_calls.is_empty() {
            break;
        }

        check_for_stuck_loop(&mut signature_window, &tool_calls)?;

        let mut to_execute = Vec::new();
        let mut iteration_outputs = Vec::new();

        let cached_hits: Vec<(orkestra_model::ToolCall, String)> = tool_calls
            .iter()
            .filter_map(|call| {
                if call.function_name != "read_file" {
                    return None;
                }
                let path = call.arguments.get("path").and_then(Value::as_str)?;
                files_already_read.get(path).map(|cached| (call.clone(), cached.clone()))
            })
            .collect();
        let cached_paths: std::collections::HashSet<&str> =
            cached_hits.iter().filter_map(|(c, _)| c.arguments.get("path").and_then(Value::as_str)).collect();

        for call in &tool_calls {
            let is_cached_read = call.function_name == "read_file"
                && call.arguments.get("path").and_then(Value::as_str).map(|p| cached_paths.contains(p)).unwrap_or(false);
            if !is_cached_read {
                to_execute.push(call.clone());
            }
        }

        for (call, cached_content) in &cached_hits {
            let output = ToolOutput::ok(&call.id, cached_content.clone());
            inject_tool_result(&mut history, call, &output, response_style);
            iteration_outputs.push(output);
        }

        if to_execute.is_empty() && !cached_hits.is_empty() {
            let names: Vec<&str> = cached_paths.iter().copied().collect();
            history.push(Message::system(format!(
                "All requested reads this turn were already cached earlier in this task ({}). \
                 Do not re-read them — act on the cached content already in this conversation.",
                names.join(", ")
            )));
        } else {
            for call in &to_execute {
                if call.function_name == "confirm_task_complete" {
                    task_complete = true;
                }

                let runtime_call = dispatch::adapt_tool_call(call);
                let mut output = dispatcher.dispatch(&runtime_call).await;
                let category = dispatcher.output_category(&call.function_name);
                output.content = compact::smart_truncate(&output.content, category, MAX_TOOL_RESULT_CHARS);

                if call.function_name == "read_file" && !output.is_error {
                    if let Some(path) = call.arguments.get("path").and_then(Value::as_str) {
                        files_already_read.insert(path.to_string(), output.content.clone());
                    }
                }

                inject_tool_result(&mut history, call, &output, response_style);

                if call.function_name == "read_file" && !output.is_error {
                    if let Some(path) = call.arguments.get("path").and_then(Value::as_str) {
                        history.push(Message::system(format!(
                            "Reminder: the contents of {path} are now in this conversation above; do not read it again."
                        )));
                    }
                }

                iteration_outputs.push(output);
            }
        }

        tool_results_per_iteration.push(iteration_outputs);

        if task_complete {
            break;
        }

        let any_write_executed = to_execute.iter().any(|c| !dispatcher.is_read_only_tool(&c.function_name));
        force_text_response = !any_write_executed;
        tool_override = !any_write_executed;
    }

    Ok(LoopResult { final_response, conversation_history: history, tool_results_per_iteration, iteration_count, task_complete })
}

fn inject_tool_result(history: &mut Vec<Message>, call: &orkestra_model::ToolCall, output: &ToolOutput, response_style: bool) {
    if response_style {
        history.push(Message::function_call_output(call.id.clone(), output.content.clone()));
    } else {
        history.push(Message::tool_result(call.id.clone(), output.content.clone()));
    }
}

/// Three consecutive iterations with an identical (name, sorted-args)
/// signature set mean the agent is stuck — abort rather than burn the full
/// iteration budget repeating the same dead end.
fn check_for_stuck_loop(
    window: &mut VecDeque<Vec<(String, String)>>,
    tool_calls: &[orkestra_model::ToolCall],
) -> anyhow::Result<()> {
    let mut signature: Vec<(String, String)> =
        tool_calls.iter().map(|c| (c.function_name.clone(), canonical_args(&c.arguments))).collect();
    signature.sort();

    if window.len() == LOOP_DETECTION_WINDOW {
        window.pop_front();
    }
    window.push_back(signature);

    if window.len() == LOOP_DETECTION_WINDOW && window.iter().all(|s| *s == window[0]) {
        anyhow::bail!("agentic loop stuck: identical tool-call signature repeated {LOOP_DETECTION_WINDOW} times in a row");
    }
    Ok(())
}

fn canonical_args(args: &Value) -> String {
    match args {
        Value::Object(map) => {
            let mut entries: Vec<(String, String)> = map.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
            entries.sort();
            entries.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
        }
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orkestra_config::{ModelEndpoint, RoleConfig};
    use orkestra_model::channel::{ChannelFactory, ReplaySource};
    use orkestra_model::{AssistantMessage, Choice, RawFunctionCall, RawToolCall, ToolCall as ModelToolCall};
    use orkestra_tools::{ApprovalPolicy, ToolCall as RuntimeToolCall, ToolRegistry};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedSource {
        responses: Vec<CompletionResponse>,
        cursor: AtomicUsize,
    }

    impl ReplaySource for ScriptedSource {
        fn next_response(&self, _agent_name: &str) -> Option<CompletionResponse> {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.responses.get(idx).cloned()
        }
    }

    fn text_only(s: &str) -> CompletionResponse {
        CompletionResponse::ChatCompletions {
            choices: vec![Choice { message: AssistantMessage { content: Some(s.to_string()), tool_calls: None } }],
        }
    }

    fn tool_call_response(id: &str, name: &str, args: Value) -> CompletionResponse {
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

    struct StubTool { name: &'static str, read_only: bool }

    #[async_trait]
    impl orkestra_tools::Tool for StubTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "stub" }
        fn parameters_schema(&self) -> Value { json!({"type": "object"}) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        fn is_read_only(&self) -> bool { self.read_only }
        async fn execute(&self, call: &RuntimeToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("result for {}", call.args.get("path").and_then(Value::as_str).unwrap_or("?")))
        }
    }

    struct CompleteTool;

    #[async_trait]
    impl orkestra_tools::Tool for CompleteTool {
        fn name(&self) -> &str { "confirm_task_complete" }
        fn description(&self) -> &str { "completes the task" }
        fn parameters_schema(&self) -> Value { json!({"type": "object"}) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        fn is_read_only(&self) -> bool { true }
        async fn execute(&self, call: &RuntimeToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "task marked complete")
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(StubTool { name: "read_file", read_only: true });
        reg.register(StubTool { name: "write_file", read_only: false });
        reg.register(CompleteTool);
        Arc::new(reg)
    }

    fn dispatcher() -> ToolDispatcher {
        ToolDispatcher::new(registry(), None, "developer", None, Arc::new(Mutex::new(HashSet::new())))
    }

    fn role_config() -> RoleConfig {
        RoleConfig {
            role: "developer".to_string(),
            system_prompt: "You write code.".to_string(),
            model_endpoints: vec![ModelEndpoint { model: "gpt-4o".into(), endpoint: "http://localhost:9".into() }],
            temperature: 0.2,
            max_tokens: -1,
            timeout_seconds: 5,
            allowed_tools: None,
            default_git_branch: None,
        }
    }

    async fn agent_with(responses: Vec<CompletionResponse>) -> (Agent, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let session = Arc::new(orkestra_session::Session::new_session(root.path()).await.unwrap());
        let source = Arc::new(ScriptedSource { responses, cursor: AtomicUsize::new(0) });
        let factory = ChannelFactory::replay(source);
        let agent = Agent::new("developer01", &role_config(), &factory, &[], false, session);
        (agent, root)
    }

    #[tokio::test]
    async fn loop_stops_naturally_when_no_tool_calls_returned() {
        let (agent, _root) = agent_with(vec![text_only("all done, nothing to call")]).await;
        let d = dispatcher();
        let result = run(&agent, &d, "do something", DEFAULT_MAX_ITERATIONS).await.unwrap();
        assert_eq!(result.iteration_count, 1);
        assert!(!result.task_complete);
        assert_eq!(result.final_response, "all done, nothing to call");
    }

    #[tokio::test]
    async fn loop_breaks_on_confirm_task_complete() {
        let (agent, _root) = agent_with(vec![tool_call_response("1", "confirm_task_complete", json!({}))]).await;
        let d = dispatcher();
        let result = run(&agent, &d, "do something", DEFAULT_MAX_ITERATIONS).await.unwrap();
        assert!(result.task_complete);
        assert_eq!(result.tool_results_per_iteration.len(), 1);
    }

    #[tokio::test]
    async fn loop_dedups_repeated_read_of_same_path() {
        let (agent, _root) = agent_with(vec![
            tool_call_response("1", "read_file", json!({"path": "a.txt"})),
            tool_call_response("2", "read_file", json!({"path": "a.txt"})),
            text_only("finished"),
        ])
        .await;
        let d = dispatcher();
        let result = run(&agent, &d, "read a.txt twice", DEFAULT_MAX_ITERATIONS).await.unwrap();
        assert_eq!(result.iteration_count, 3);
        let second_iteration_output = &result.tool_results_per_iteration[1][0];
        assert_eq!(second_iteration_output.content, "result for a.txt");
    }

    #[tokio::test]
    async fn loop_detector_fires_on_three_identical_signatures() {
        let repeated = tool_call_response("1", "read_file", json!({"path": "stuck.txt"}));
        let responses: Vec<CompletionResponse> = (0..5).map(|_| repeated.clone()).collect();
        let (agent, _root) = agent_with(responses).await;
        let d = dispatcher();
        let result = run(&agent, &d, "get stuck", DEFAULT_MAX_ITERATIONS).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("stuck"));
    }

    #[tokio::test]
    async fn max_iterations_ceiling_is_respected() {
        let response = tool_call_response("1", "write_file", json!({"path": "out.txt", "content": "x"}));
        // Varying args each round to dodge the loop detector, proving the
        // ceiling (not the detector) ends the run.
        let responses: Vec<CompletionResponse> = (0..10)
            .map(|i| tool_call_response("1", "write_file", json!({"path": format!("out{i}.txt"), "content": "x"})))
            .collect();
        let _ = response;
        let (agent, _root) = agent_with(responses).await;
        let d = dispatcher();
        let result = run(&agent, &d, "write many files", 5).await.unwrap();
        assert_eq!(result.iteration_count, 5);
        assert!(!result.task_complete);
    }

    #[test]
    fn canonical_args_is_order_independent() {
        let a = json!({"path": "a.txt", "offset": 1});
        let b = json!({"offset": 1, "path": "a.txt"});
        assert_eq!(canonical_args(&a), canonical_args(&b));
    }

    #[test]
    fn check_for_stuck_loop_does_not_fire_before_window_fills() {
        let mut window = VecDeque::new();
        let calls = vec![ModelToolCall { id: "1".into(), function_name: "read_file".into(), arguments: json!({"path": "a.txt"}) }];
        assert!(check_for_stuck_loop(&mut window, &calls).is_ok());
        assert!(check_for_stuck_loop(&mut window, &calls).is_ok());
    }
}
