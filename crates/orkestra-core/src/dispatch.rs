// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool dispatch for one agent binding: allowlist enforcement, schema
//! listing, `clone_repo` branch substitution, and `developer`-role
//! files-produced tracking.
//!
//! Tools outside a role's `allowed_tools` stay present in the tool
//! description sent to the model — denial happens here, at call time, so an
//! attempt is recorded as a `not-allowed` error result rather than simply
//! never being offered. This is the single allowlist check in the system;
//! nothing upstream filters by name.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use orkestra_tools::{ToolCall, ToolOutput, ToolRegistry, ToolSchema};
use serde_json::Value;

/// Tracks files produced by write calls during one agentic loop. Shared with
/// [`orkestra_tools::AuditFilesTool`], which is constructed with the same
/// handle so `audit_files` can validate against exactly what this dispatcher
/// recorded.
pub type ProducedFiles = Arc<Mutex<HashSet<String>>>;

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    allowed_tools: Option<HashSet<String>>,
    role: String,
    default_git_branch: Option<String>,
    files_produced: ProducedFiles,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        allowed_tools: Option<HashSet<String>>,
        role: impl Into<String>,
        default_git_branch: Option<String>,
        files_produced: ProducedFiles,
    ) -> Self {
        Self { registry, allowed_tools, role: role.into(), default_git_branch, files_produced }
    }

    /// Tool schemas visible to the model, filtered by `allowed_tools` (all
    /// registered tools when no allowlist is configured).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        match &self.allowed_tools {
            Some(allowed) => self.registry.schemas_for(allowed),
            None => self.registry.schemas(),
        }
    }

    /// The write-only subset of [`Self::schemas`], used for the agentic
    /// loop's `tool_override` modifier after a read-only-only iteration.
    pub fn write_only_schemas(&self) -> Vec<ToolSchema> {
        let write_names: HashSet<String> = self.registry.write_names().into_iter().collect();
        let scoped = match &self.allowed_tools {
            Some(allowed) => write_names.intersection(allowed).cloned().collect(),
            None => write_names,
        };
        self.registry.schemas_for(&scoped)
    }

    /// The output-shape category a registered tool declares, for context-
    /// aware truncation of its captured output. Unregistered names fall
    /// back to [`orkestra_tools::OutputCategory::Generic`].
    pub fn output_category(&self, name: &str) -> orkestra_tools::OutputCategory {
        self.registry.get(name).map(|t| t.output_category()).unwrap_or_default()
    }

    /// `true` when `name` names a registered read-only tool.
    pub fn is_read_only_tool(&self, name: &str) -> bool {
        self.registry.get(name).map(|t| t.is_read_only()).unwrap_or(false)
    }

    fn is_allowed(&self, name: &str) -> bool {
        match &self.allowed_tools {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }

    /// Run one tool call: allowlist check, `clone_repo` branch substitution,
    /// execution, and (for `developer` write calls) files-produced tracking.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        if !self.is_allowed(&call.name) {
            return ToolOutput::err(&call.id, format!("tool '{}' is not allowed for role '{}'", call.name, self.role));
        }

        let call = self.substitute_default_branch(call);
        let is_write = self.registry.get(&call.name).map(|t| !t.is_read_only()).unwrap_or(false);
        let output = self.registry.execute(&call).await;

        if is_write && self.role == "developer" && !output.is_error {
            if let Some(path) = call.args.get("path").and_then(Value::as_str) {
                self.files_produced.lock().unwrap().insert(path.to_string());
            }
        }
        output
    }

    fn substitute_default_branch(&self, call: &ToolCall) -> ToolCall {
        if call.name != "clone_repo" {
            return call.clone();
        }
        let has_branch = call.args.get("branch").and_then(Value::as_str).map(|s| !s.is_empty()).unwrap_or(false);
        if has_branch {
            return call.clone();
        }
        let Some(branch) = &self.default_git_branch else { return call.clone() };
        let mut args = call.args.clone();
        if let Value::Object(map) = &mut args {
            map.insert("branch".to_string(), Value::String(branch.clone()));
        }
        ToolCall { id: call.id.clone(), name: call.name.clone(), args }
    }

    /// Snapshot of paths recorded by this loop's write calls so far.
    pub fn files_produced(&self) -> HashSet<String> {
        self.files_produced.lock().unwrap().clone()
    }

    /// The shared handle, for constructing an [`orkestra_tools::AuditFilesTool`]
    /// that validates against the same set this dispatcher populates.
    pub fn produced_files_handle(&self) -> ProducedFiles {
        self.files_produced.clone()
    }

    /// Validates an `audit_files` request: every path must already be among
    /// this loop's produced files. Returns the offending paths on failure.
    pub fn validate_audit_paths(&self, paths: &[String]) -> Result<(), Vec<String>> {
        let produced = self.files_produced.lock().unwrap();
        let invalid: Vec<String> = paths.iter().filter(|p| !produced.contains(p.as_str())).cloned().collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(invalid)
        }
    }
}

/// Adapts a model-layer tool call (as extracted from a completion response)
/// into the tool-runtime-layer shape the registry and dispatcher expect.
pub fn adapt_tool_call(call: &orkestra_model::ToolCall) -> ToolCall {
    ToolCall { id: call.id.clone(), name: call.function_name.clone(), args: call.arguments.clone() }
}

/// Adapts a tool-runtime schema into the wire-format shape a
/// [`orkestra_model::CompletionRequest`] carries. The two crates keep
/// independent `ToolSchema` types (the tools crate has no dependency on the
/// model crate); this is the one place that bridges them, mirrored by
/// [`adapt_tool_call`] on the call side.
pub fn adapt_schema(schema: &ToolSchema) -> orkestra_model::ToolSchema {
    orkestra_model::ToolSchema {
        name: schema.name.clone(),
        description: schema.description.clone(),
        parameters: schema.parameters.clone(),
    }
}

pub fn adapt_schemas(schemas: &[ToolSchema]) -> Vec<orkestra_model::ToolSchema> {
    schemas.iter().map(adapt_schema).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
