// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turns a manager's single-shot response to the original request into an
//! ordered list of task assignments. Tries the `assign_task`/`assign_tasks`
//! tool calls first, falls back to parsing a bare JSON array or
//! `{"assignments": [...]}` object out of the response text, and re-prompts
//! with a corrective constraint when a role doesn't match the configured set.

use std::collections::HashSet;

use orkestra_core::{self as core, Agent, ToolDispatcher};
use orkestra_model::Message;
use orkestra_tools::{AgentEvent, TaskAssignment};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::events::{render_params, EventRecorder};

const AGENT_COMM_NAMES: [&str; 2] = ["assign_task", "assign_tasks"];

#[derive(Deserialize)]
struct LooseAssignment {
    role: String,
    task: String,
    #[serde(default)]
    sequence: Option<i64>,
}

#[derive(Deserialize)]
struct LooseAssignments {
    assignments: Vec<LooseAssignment>,
}

fn loose_to_assignment(a: LooseAssignment) -> TaskAssignment {
    TaskAssignment { role: a.role, task: a.task, sequence: a.sequence.unwrap_or(1) }
}

/// Tries `Vec<LooseAssignment>` then `{assignments: [...]}`, in that order.
fn parse_json_fallback(text: &str) -> Vec<TaskAssignment> {
    if let Ok(list) = serde_json::from_str::<Vec<LooseAssignment>>(text) {
        return list.into_iter().map(loose_to_assignment).collect();
    }
    if let Ok(wrapped) = serde_json::from_str::<LooseAssignments>(text) {
        return wrapped.assignments.into_iter().map(loose_to_assignment).collect();
    }
    // The manager's text may wrap the JSON in prose; scan for the first
    // top-level JSON array or object and retry against just that slice.
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if end > start {
                let slice = &text[start..=end];
                if slice != text {
                    let nested = parse_json_fallback(slice);
                    if !nested.is_empty() {
                        return nested;
                    }
                }
            }
        }
    }
    Vec::new()
}

/// Extracts every `TaskAssignment` a manager's response produced: structured
/// tool calls first (dispatched for real, so `assign_task`/`assign_tasks`
/// run through the same path a live tool call would), then fenced and
/// plain-text call syntax, then a bare-JSON fallback over the response text.
async fn extract_assignments(
    response: &orkestra_model::CompletionResponse,
    dispatcher: &ToolDispatcher,
    events: &mut UnboundedReceiver<AgentEvent>,
) -> Vec<TaskAssignment> {
    let (text, mut tool_calls) = response.extract();
    if tool_calls.is_empty() {
        let fenced = core::extraction::extract_fenced_calls(&text);
        tool_calls = if !fenced.is_empty() {
            fenced
        } else {
            let allowed: HashSet<String> = AGENT_COMM_NAMES.iter().map(|s| s.to_string()).collect();
            core::extraction::extract_plain_text_calls(&text, &allowed)
        };
    }

    let assignment_calls: Vec<_> = tool_calls.into_iter().filter(|c| AGENT_COMM_NAMES.contains(&c.function_name.as_str())).collect();
    if !assignment_calls.is_empty() {
        for call in &assignment_calls {
            let runtime_call = core::adapt_tool_call(call);
            dispatcher.dispatch(&runtime_call).await;
        }
        let mut assignments = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::Assignments { assignments: batch } = event {
                assignments.extend(batch);
            }
        }
        if !assignments.is_empty() {
            return assignments;
        }
    }

    parse_json_fallback(&text)
}

/// Runs decomposition: one single-shot call per attempt, up to
/// `max_retries` corrective re-prompts after a role-validation failure.
/// The final failure is fatal — the coordinator has nothing to dispatch.
pub async fn decompose(
    manager: &Agent,
    dispatcher: &ToolDispatcher,
    mut events: UnboundedReceiver<AgentEvent>,
    user_request: &str,
    valid_roles: &HashSet<String>,
    recorder: &EventRecorder,
    max_retries: u32,
) -> anyhow::Result<Vec<TaskAssignment>> {
    let mut constraint = String::new();
    let mut attempt = 0u32;

    loop {
        let prompt = format!("{user_request}{constraint}");
        let messages = vec![Message::system(manager.system_prompt().to_string()), Message::user(prompt)];
        let response = manager.complete_with_retry(&messages, dispatcher.schemas(), None).await?;
        let assignments = extract_assignments(&response, dispatcher, &mut events).await;

        let invalid_roles: Vec<String> =
            assignments.iter().filter(|a| !valid_roles.contains(&a.role)).map(|a| a.role.clone()).collect();

        if !assignments.is_empty() && invalid_roles.is_empty() {
            recorder
                .record(
                    "request_decomposed",
                    "coordinator",
                    render_params(&[("assignment_count", serde_json::json!(assignments.len())), ("attempt", serde_json::json!(attempt))]),
                )
                .await;
            return Ok(assignments);
        }

        recorder
            .record_failed(
                "role_validation_failed",
                "coordinator",
                render_params(&[("invalid_roles", serde_json::json!(invalid_roles)), ("attempt", serde_json::json!(attempt))]),
                "RoleValidationError",
                if assignments.is_empty() { "manager produced no task assignments" } else { "manager assigned an undeclared role" },
            )
            .await;

        if attempt >= max_retries {
            anyhow::bail!("decomposition failed after {} attempt(s): no valid task assignments produced", attempt + 1);
        }
        attempt += 1;
        recorder.record("role_retry", "coordinator", render_params(&[("attempt", serde_json::json!(attempt))])).await;

        let mut roles: Vec<&String> = valid_roles.iter().collect();
        roles.sort();
        let names: Vec<&str> = roles.iter().map(|s| s.as_str()).collect();
        constraint = format!(
            "\n\nConstraint: every assigned role must be exactly one of: {}. Re-issue your task assignments with assign_task or assign_tasks.",
            names.join(", ")
        );
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
