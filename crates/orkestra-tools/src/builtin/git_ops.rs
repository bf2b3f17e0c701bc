// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Git workflow tools: `clone_repo`, `checkout_branch`, `push_branch`,
//! `create_pull_request`. Every repo-relative path goes through
//! [`path_guard::validate_path`]; shell arguments are passed positionally to
//! `git`/`gh`, never interpolated into a shell string.

use std::path::PathBuf;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;

use super::path_guard::validate_path;
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

static BRANCH_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_/-]*$").unwrap());

/// Derives a directory name from a repo URL the way a clone without
/// `-o <dir>` would: trailing slash stripped, `.git` suffix stripped.
fn derive_repo_dir_name(repo_url: &str) -> String {
    let cleaned = repo_url.trim_end_matches('/');
    let base = cleaned.rsplit('/').next().unwrap_or(cleaned);
    base.strip_suffix(".git").unwrap_or(base).to_string()
}

async fn run_git(args: &[&str], cwd: &std::path::Path) -> Result<String, String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| format!("git spawn error: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(format!("git {}: {}", args.join(" "), String::from_utf8_lossy(&output.stderr).trim()))
    }
}

pub struct CloneRepoTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for CloneRepoTool {
    fn name(&self) -> &str {
        "clone_repo"
    }
    fn description(&self) -> &str {
        "Clone a git repository into the working directory."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_url": { "type": "string" },
                "dest_dir": { "type": "string" },
                "branch": { "type": "string" },
                "depth": { "type": "integer" }
            },
            "required": ["repo_url"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(repo_url) = call.args.get("repo_url").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'repo_url'");
        };
        let dest_dir = call
            .args
            .get("dest_dir")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| derive_repo_dir_name(repo_url));
        if dest_dir.is_empty() {
            return ToolOutput::err(&call.id, "destination directory could not be derived from repo_url");
        }
        let target = match validate_path(&self.working_dir, &dest_dir) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if target.exists() && target.read_dir().map(|mut d| d.next().is_some()).unwrap_or(false) {
            return ToolOutput::err(&call.id, format!("destination directory is not empty: {dest_dir}"));
        }
        if let Some(parent) = target.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut args: Vec<String> = vec!["clone".into()];
        if let Some(depth) = call.args.get("depth").and_then(|v| v.as_i64()) {
            if depth <= 0 {
                return ToolOutput::err(&call.id, "depth must be a positive integer");
            }
            args.push("--depth".into());
            args.push(depth.to_string());
        }
        if let Some(branch) = call.args.get("branch").and_then(|v| v.as_str()) {
            args.push("--branch".into());
            args.push(branch.into());
        }
        args.push(repo_url.into());
        args.push(target.display().to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match run_git(&arg_refs, &self.working_dir).await {
            Ok(_) => {
                ToolOutput::ok(&call.id, json!({ "dest_dir": dest_dir, "repo_url": repo_url }).to_string())
            }
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

pub struct CheckoutBranchTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for CheckoutBranchTool {
    fn name(&self) -> &str {
        "checkout_branch"
    }
    fn description(&self) -> &str {
        "Create or switch to a branch in a cloned repository."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string" },
                "branch_name": { "type": "string" },
                "create": { "type": "boolean" }
            },
            "required": ["repo_dir", "branch_name"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (Some(repo_dir), Some(branch_name)) = (
            call.args.get("repo_dir").and_then(|v| v.as_str()),
            call.args.get("branch_name").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'repo_dir' or 'branch_name'");
        };
        if !BRANCH_NAME_RE.is_match(branch_name) {
            return ToolOutput::err(
                &call.id,
                format!("invalid branch name: {branch_name}; use alphanumeric, '_', '-', '/'"),
            );
        }
        let repo_path = match validate_path(&self.working_dir, repo_dir) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !repo_path.is_dir() {
            return ToolOutput::err(&call.id, format!("repository directory not found: {repo_dir}"));
        }
        let create = call.args.get("create").and_then(|v| v.as_bool()).unwrap_or(true);
        let args: Vec<&str> =
            if create { vec!["checkout", "-b", branch_name] } else { vec!["checkout", branch_name] };
        match run_git(&args, &repo_path).await {
            Ok(_) => ToolOutput::ok(&call.id, json!({ "branch": branch_name, "created": create }).to_string()),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

pub struct PushBranchTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for PushBranchTool {
    fn name(&self) -> &str {
        "push_branch"
    }
    fn description(&self) -> &str {
        "Push a branch to the remote, optionally setting upstream tracking."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string" },
                "branch_name": { "type": "string" },
                "set_upstream": { "type": "boolean" }
            },
            "required": ["repo_dir"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(repo_dir) = call.args.get("repo_dir").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'repo_dir'");
        };
        let repo_path = match validate_path(&self.working_dir, repo_dir) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !repo_path.is_dir() {
            return ToolOutput::err(&call.id, format!("repository directory not found: {repo_dir}"));
        }
        if !repo_path.join(".git").exists() {
            return ToolOutput::err(&call.id, format!("not a git repository: {repo_dir}"));
        }

        let branch_name = match call.args.get("branch_name").and_then(|v| v.as_str()) {
            Some(b) => b.to_string(),
            None => match run_git(&["rev-parse", "--abbrev-ref", "HEAD"], &repo_path).await {
                Ok(b) => b,
                Err(e) => return ToolOutput::err(&call.id, e),
            },
        };
        let set_upstream = call.args.get("set_upstream").and_then(|v| v.as_bool()).unwrap_or(true);
        let args: Vec<&str> = if set_upstream {
            vec!["push", "-u", "origin", &branch_name]
        } else {
            vec!["push", "origin", &branch_name]
        };
        match run_git(&args, &repo_path).await {
            Ok(_) => ToolOutput::ok(&call.id, json!({ "branch": branch_name, "pushed": true }).to_string()),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

pub struct CreatePullRequestTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for CreatePullRequestTool {
    fn name(&self) -> &str {
        "create_pull_request"
    }
    fn description(&self) -> &str {
        "Create a pull request for the current branch using the GitHub CLI."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repo_dir": { "type": "string" },
                "title": { "type": "string" },
                "body": { "type": "string" },
                "base_branch": { "type": "string" }
            },
            "required": ["repo_dir"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(repo_dir) = call.args.get("repo_dir").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'repo_dir'");
        };
        let repo_path = match validate_path(&self.working_dir, repo_dir) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        if !repo_path.is_dir() {
            return ToolOutput::err(&call.id, format!("repository directory not found: {repo_dir}"));
        }
        if !repo_path.join(".git").exists() {
            return ToolOutput::err(&call.id, format!("not a git repository: {repo_dir}"));
        }

        let title = call.args.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let body = call.args.get("body").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let base_branch = call.args.get("base_branch").and_then(|v| v.as_str()).unwrap_or("main").to_string();

        let mut args: Vec<String> = vec!["pr".into(), "create".into(), "--base".into(), base_branch];
        if !title.is_empty() {
            args.push("--title".into());
            args.push(title);
        }
        args.push("--body".into());
        args.push(body);

        let output = Command::new("gh").args(&args).current_dir(&repo_path).output().await;
        match output {
            Ok(out) if out.status.success() => {
                let url = String::from_utf8_lossy(&out.stdout).trim().to_string();
                ToolOutput::ok(&call.id, json!({ "url": url }).to_string())
            }
            Ok(out) => ToolOutput::err(&call.id, String::from_utf8_lossy(&out.stderr).trim().to_string()),
            Err(e) => ToolOutput::err(&call.id, format!("gh spawn error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "1".into(), name: name.into(), args }
    }

    #[test]
    fn derive_repo_dir_name_strips_git_suffix_and_slash() {
        assert_eq!(derive_repo_dir_name("https://github.com/org/repo.git"), "repo");
        assert_eq!(derive_repo_dir_name("git@github.com:org/repo.git"), "repo");
        assert_eq!(derive_repo_dir_name("/path/to/repo/"), "repo");
    }

    #[tokio::test]
    async fn checkout_rejects_invalid_branch_name() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CheckoutBranchTool { working_dir: dir.path().to_path_buf() };
        let out = tool
            .execute(&call("checkout_branch", json!({"repo_dir": ".", "branch_name": "-bad"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid branch name"));
    }

    #[tokio::test]
    async fn checkout_missing_repo_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CheckoutBranchTool { working_dir: dir.path().to_path_buf() };
        let out = tool
            .execute(&call("checkout_branch", json!({"repo_dir": "nope", "branch_name": "feature-x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    #[tokio::test]
    async fn push_branch_rejects_non_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tool = PushBranchTool { working_dir: dir.path().to_path_buf() };
        let out = tool.execute(&call("push_branch", json!({"repo_dir": "."}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("not a git repository"));
    }

    #[tokio::test]
    async fn clone_rejects_empty_repo_url() {
        let dir = tempfile::tempdir().unwrap();
        let tool = CloneRepoTool { working_dir: dir.path().to_path_buf() };
        let out = tool.execute(&call("clone_repo", json!({"repo_url": ""}))).await;
        assert!(out.is_error);
    }
}
