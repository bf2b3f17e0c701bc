// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Tool, ToolCall, ToolOutput};

/// A tool schema sent to the model. Kept as its own type (rather than
/// reusing `orkestra_model::ToolSchema` directly) so this crate doesn't need
/// to depend on the model crate just to describe its own tools.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Holds every tool available to an agent, keyed by name. `HashMap<String,
/// Arc<dyn Tool>>` is already `Sync` on its own — `Tool: Send + Sync` and
/// neither the map nor the registry exposes interior mutability — so no
/// `unsafe impl` is needed here.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn to_schema(t: &Arc<dyn Tool>) -> ToolSchema {
        ToolSchema {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        }
    }

    /// Produce schemas for every registered tool, allowlist-unfiltered.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self.tools.values().map(Self::to_schema).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Produce schemas for the subset of tools named in `allowed`, preserving
    /// registry tool identity (unknown names are silently skipped — the
    /// allowlist is enforced once, at the call dispatcher, not here).
    pub fn schemas_for(&self, allowed: &std::collections::HashSet<String>) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> =
            self.tools.values().filter(|t| allowed.contains(t.name())).map(Self::to_schema).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Names of every registered read-only tool (for `tool_override`'s
    /// write-only-subset computation, this is the complement).
    pub fn read_only_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.tools.values().filter(|t| t.is_read_only()).map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }

    /// Names of every registered write tool.
    pub fn write_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.tools.values().filter(|t| !t.is_read_only()).map(|t| t.name().to_string()).collect();
        names.sort();
        names
    }

    /// Executes a tool by name. Allowlist enforcement is the caller's job —
    /// this always runs a registered tool regardless of any role's
    /// `allowed_tools`, matching the "present in the binding, denied at call
    /// time" design: callers check the allowlist before reaching here, or
    /// construct a [`ToolOutput::err`] "not-allowed" result instead of
    /// calling `execute`.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    struct StubTool { name: &'static str, read_only: bool }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str { self.name }
        fn description(&self) -> &str { "a stub tool for registry tests" }
        fn parameters_schema(&self) -> Value { json!({ "type": "object" }) }
        fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
        fn is_read_only(&self) -> bool { self.read_only }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("ran:{}", call.args))
        }
    }

    fn reader(name: &'static str) -> StubTool {
        StubTool { name, read_only: true }
    }

    fn writer(name: &'static str) -> StubTool {
        StubTool { name, read_only: false }
    }

    fn registry_with(tools: Vec<StubTool>) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for t in tools {
            reg.register(t);
        }
        reg
    }

    // -- allowlist filtering: this is what every role's `allowed_tools` set
    // actually relies on, so it gets the most coverage --

    #[test]
    fn schemas_for_includes_only_the_allowed_names() {
        let reg = registry_with(vec![reader("read_file"), writer("write_file"), writer("delete_file")]);
        let allowed: HashSet<String> = ["read_file".to_string(), "write_file".to_string()].into_iter().collect();
        let mut names: Vec<_> = reg.schemas_for(&allowed).into_iter().map(|s| s.name).collect();
        names.sort();
        assert_eq!(names, vec!["read_file".to_string(), "write_file".to_string()]);
    }

    #[test]
    fn schemas_for_empty_allowlist_yields_nothing() {
        let reg = registry_with(vec![reader("read_file")]);
        assert!(reg.schemas_for(&HashSet::new()).is_empty());
    }

    #[test]
    fn schemas_for_silently_drops_names_not_in_the_registry() {
        // schemas_for doesn't error on an allowed name with no matching
        // tool — the allowlist is enforced once, at the dispatcher.
        let reg = registry_with(vec![reader("read_file")]);
        let allowed: HashSet<String> = ["read_file".to_string(), "nonexistent".to_string()].into_iter().collect();
        assert_eq!(reg.schemas_for(&allowed).len(), 1);
    }

    #[test]
    fn schemas_unfiltered_includes_everything_regardless_of_allowlist() {
        let reg = registry_with(vec![reader("read_file"), writer("write_file")]);
        assert_eq!(reg.schemas().len(), 2);
    }

    #[test]
    fn read_only_and_write_names_partition_the_registry() {
        let reg = registry_with(vec![reader("read_file"), writer("write_file"), writer("push_branch")]);
        assert_eq!(reg.read_only_names(), vec!["read_file".to_string()]);
        let mut writes = reg.write_names();
        writes.sort();
        assert_eq!(writes, vec!["push_branch".to_string(), "write_file".to_string()]);
    }

    // -- execution and basic bookkeeping --

    #[tokio::test]
    async fn execute_runs_the_named_tool() {
        let reg = registry_with(vec![reader("read_file")]);
        let call = ToolCall { id: "1".into(), name: "read_file".into(), args: json!({"path": "a.txt"}) };
        let out = reg.execute(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("ran:"));
    }

    #[tokio::test]
    async fn execute_unregistered_name_is_an_error_not_a_panic() {
        let reg = ToolRegistry::new();
        let call = ToolCall { id: "x".into(), name: "missing".into(), args: json!({}) };
        let out = reg.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn get_unknown_returns_none() {
        assert!(ToolRegistry::new().get("nope").is_none());
    }

    #[test]
    fn re_registering_a_name_replaces_the_previous_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(reader("dual_role"));
        reg.register(writer("dual_role"));
        assert_eq!(reg.names().len(), 1);
        assert!(!reg.get("dual_role").unwrap().is_read_only());
    }
}
