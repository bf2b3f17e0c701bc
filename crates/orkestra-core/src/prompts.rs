// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System-prompt assembly: splices a tool description block into a role's
//! configured prompt (unless one is already present) and, for manager agents
//! operating inside a git repository, a directive to create/switch to a
//! working branch before assigning any tasks.

use orkestra_tools::ToolSchema;

/// Marker string used to detect that a role's configured `system_prompt`
/// already documents its tools, so the splice becomes a no-op.
const TOOLS_MARKER: &str = "Available tools:";

const BRANCH_DIRECTIVE: &str = "\n\nThis task operates inside a git repository. Call checkout_branch \
to create or switch to a working branch before assigning any tasks.";

/// Builds the final system prompt an agent sends on every call: the role's
/// configured prompt, with a tool description appended if missing, and (for
/// managers in a git repo) the branch-management directive appended.
pub fn augmented_system_prompt(base_prompt: &str, schemas: &[ToolSchema], role: &str, in_git_repo: bool) -> String {
    let mut prompt = base_prompt.to_string();
    if !prompt.contains(TOOLS_MARKER) {
        prompt.push_str("\n\n");
        prompt.push_str(&tools_description(schemas));
    }
    if role == "manager" && in_git_repo {
        prompt.push_str(BRANCH_DIRECTIVE);
    }
    prompt
}

fn tools_description(schemas: &[ToolSchema]) -> String {
    let mut out = String::from(TOOLS_MARKER);
    out.push('\n');
    for s in schemas {
        out.push_str(&format!("- {}: {}\n", s.name, s.description));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema { name: name.to_string(), description: format!("{name} description"), parameters: json!({}) }
    }

    #[test]
    fn appends_tools_description_when_absent() {
        let prompt = augmented_system_prompt("You write code.", &[schema("read_file")], "developer", false);
        assert!(prompt.contains("Available tools:"));
        assert!(prompt.contains("read_file description"));
    }

    #[test]
    fn does_not_duplicate_tools_description_when_already_present() {
        let base = "You write code.\n\nAvailable tools:\n- custom_tool: hand-written";
        let prompt = augmented_system_prompt(base, &[schema("read_file")], "developer", false);
        assert_eq!(prompt.matches("Available tools:").count(), 1);
        assert!(!prompt.contains("read_file description"));
    }

    #[test]
    fn manager_in_git_repo_gets_branch_directive() {
        let prompt = augmented_system_prompt("Decompose requests.", &[], "manager", true);
        assert!(prompt.contains("checkout_branch"));
    }

    #[test]
    fn manager_outside_git_repo_has_no_branch_directive() {
        let prompt = augmented_system_prompt("Decompose requests.", &[], "manager", false);
        assert!(!prompt.contains("checkout_branch"));
    }

    #[test]
    fn developer_never_gets_branch_directive_even_in_git_repo() {
        let prompt = augmented_system_prompt("Write code.", &[], "developer", true);
        assert!(!prompt.contains("checkout_branch"));
    }
}
