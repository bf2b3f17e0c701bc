// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent-to-coordinator tools: `raise_callback`, `audit_files`,
//! `confirm_task_complete`, `assign_task`, `assign_tasks`. None of these
//! touch the filesystem directly — each emits an [`AgentEvent`] on a channel
//! the coordinator holds the receiving end of, mirroring the way every other
//! tool's effect (a file write, a process exit code) is observable only
//! through its `ToolOutput`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackType {
    Blocker,
    Clarification,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub role: String,
    pub task: String,
    pub sequence: i64,
}

/// Everything an agent can hand back to the coordinator other than its
/// normal tool-result text.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Callback { agent_name: String, callback_type: CallbackType, message: String },
    AuditRequest { agent_name: String, file_paths: Vec<String>, description: String, focus_areas: Vec<String> },
    TaskComplete { agent_name: String, summary: String, deliverables: Vec<String> },
    Assignments { assignments: Vec<TaskAssignment> },
}

pub struct RaiseCallbackTool {
    pub agent_name: String,
    pub events: UnboundedSender<AgentEvent>,
}

#[async_trait]
impl Tool for RaiseCallbackTool {
    fn name(&self) -> &str {
        "raise_callback"
    }
    fn description(&self) -> &str {
        "Raise a callback for a blocker, clarification request, or general query."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" },
                "callback_type": { "type": "string", "enum": ["blocker", "clarification", "query"] }
            },
            "required": ["message", "callback_type"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (Some(message), Some(type_str)) = (
            call.args.get("message").and_then(|v| v.as_str()),
            call.args.get("callback_type").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'message' or 'callback_type'");
        };
        let callback_type = match type_str {
            "blocker" => CallbackType::Blocker,
            "clarification" => CallbackType::Clarification,
            "query" => CallbackType::Query,
            other => return ToolOutput::err(&call.id, format!("unknown callback_type: {other}")),
        };
        let event = AgentEvent::Callback {
            agent_name: self.agent_name.clone(),
            callback_type,
            message: message.to_string(),
        };
        if self.events.send(event).is_err() {
            return ToolOutput::err(&call.id, "coordinator is no longer listening for callbacks");
        }
        ToolOutput::ok(&call.id, "callback raised")
    }
}

/// Validates that every audited path was actually produced by this agent's
/// own loop before forwarding the request — an agent cannot ask for an
/// audit of files it never touched.
pub struct AuditFilesTool {
    pub agent_name: String,
    pub events: UnboundedSender<AgentEvent>,
    pub produced_files: Arc<std::sync::Mutex<HashSet<String>>>,
}

#[async_trait]
impl Tool for AuditFilesTool {
    fn name(&self) -> &str {
        "audit_files"
    }
    fn description(&self) -> &str {
        "Request an audit of files this agent produced, for quality, security, or correctness."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_paths": { "type": "array", "items": { "type": "string" } },
                "description": { "type": "string" },
                "focus_areas": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["file_paths", "description"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (Some(file_paths), Some(description)) = (
            call.args.get("file_paths").and_then(|v| v.as_array()),
            call.args.get("description").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'file_paths' or 'description'");
        };
        let file_paths: Vec<String> = file_paths.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
        if file_paths.is_empty() {
            return ToolOutput::err(&call.id, "file_paths must be a non-empty list");
        }
        {
            let produced = self.produced_files.lock().unwrap();
            let unknown: Vec<&String> = file_paths.iter().filter(|p| !produced.contains(*p)).collect();
            if !unknown.is_empty() {
                return ToolOutput::err(
                    &call.id,
                    format!(
                        "cannot audit files this agent did not produce: {}",
                        unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                );
            }
        }
        let focus_areas: Vec<String> = call
            .args
            .get("focus_areas")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let event = AgentEvent::AuditRequest {
            agent_name: self.agent_name.clone(),
            file_paths,
            description: description.to_string(),
            focus_areas,
        };
        if self.events.send(event).is_err() {
            return ToolOutput::err(&call.id, "coordinator is no longer listening for audit requests");
        }
        ToolOutput::ok(&call.id, "audit request recorded")
    }
}

/// Sets the agentic loop's completion flag. The loop itself (not this tool)
/// is what breaks on seeing the corresponding [`AgentEvent::TaskComplete`].
pub struct ConfirmTaskCompleteTool {
    pub agent_name: String,
    pub events: UnboundedSender<AgentEvent>,
}

#[async_trait]
impl Tool for ConfirmTaskCompleteTool {
    fn name(&self) -> &str {
        "confirm_task_complete"
    }
    fn description(&self) -> &str {
        "Confirm the assigned task is complete, ending this agent's loop."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "deliverables": { "type": "array", "items": { "type": "string" } }
            },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let summary = call.args.get("summary").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let deliverables: Vec<String> = call
            .args
            .get("deliverables")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let event =
            AgentEvent::TaskComplete { agent_name: self.agent_name.clone(), summary, deliverables };
        if self.events.send(event).is_err() {
            return ToolOutput::err(&call.id, "coordinator is no longer listening for completion events");
        }
        ToolOutput::ok(&call.id, "task marked complete")
    }
}

/// Manager-only: assigns a single task to a role and sequence slot.
pub struct AssignTaskTool {
    pub events: UnboundedSender<AgentEvent>,
}

#[async_trait]
impl Tool for AssignTaskTool {
    fn name(&self) -> &str {
        "assign_task"
    }
    fn description(&self) -> &str {
        "Assign a single task to a specific role."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role": { "type": "string" },
                "task": { "type": "string" },
                "sequence": { "type": "integer" }
            },
            "required": ["role", "task", "sequence"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (Some(role), Some(task), Some(sequence)) = (
            call.args.get("role").and_then(|v| v.as_str()),
            call.args.get("task").and_then(|v| v.as_str()),
            call.args.get("sequence").and_then(|v| v.as_i64()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'role', 'task', or 'sequence'");
        };
        let assignment = TaskAssignment { role: role.to_string(), task: task.to_string(), sequence };
        if self.events.send(AgentEvent::Assignments { assignments: vec![assignment] }).is_err() {
            return ToolOutput::err(&call.id, "coordinator is no longer listening for assignments");
        }
        ToolOutput::ok(&call.id, format!("assigned to {role} at sequence {sequence}"))
    }
}

/// Manager-only: assigns a batch of tasks at once.
pub struct AssignTasksTool {
    pub events: UnboundedSender<AgentEvent>,
}

#[async_trait]
impl Tool for AssignTasksTool {
    fn name(&self) -> &str {
        "assign_tasks"
    }
    fn description(&self) -> &str {
        "Assign multiple tasks at once for batch processing."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "assignments": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": { "type": "string" },
                            "task": { "type": "string" },
                            "sequence": { "type": "integer" }
                        },
                        "required": ["role", "task", "sequence"]
                    }
                }
            },
            "required": ["assignments"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(raw) = call.args.get("assignments").and_then(|v| v.as_array()) else {
            return ToolOutput::err(&call.id, "missing 'assignments'");
        };
        let mut assignments = Vec::with_capacity(raw.len());
        for item in raw {
            let (Some(role), Some(task), Some(sequence)) = (
                item.get("role").and_then(|v| v.as_str()),
                item.get("task").and_then(|v| v.as_str()),
                item.get("sequence").and_then(|v| v.as_i64()),
            ) else {
                return ToolOutput::err(&call.id, "each assignment needs 'role', 'task', and 'sequence'");
            };
            assignments.push(TaskAssignment { role: role.to_string(), task: task.to_string(), sequence });
        }
        if assignments.is_empty() {
            return ToolOutput::err(&call.id, "assignments must be a non-empty list");
        }
        let count = assignments.len();
        if self.events.send(AgentEvent::Assignments { assignments }).is_err() {
            return ToolOutput::err(&call.id, "coordinator is no longer listening for assignments");
        }
        ToolOutput::ok(&call.id, format!("assigned {count} task(s)"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
