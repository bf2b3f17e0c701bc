// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File-op tools: `read_file`, `write_file`, `append_file`, `list_directory`,
//! `list_all_files`, `search_files`, `get_file_info`. Every path argument is
//! validated with [`path_guard::validate_path`] before touching disk.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::path_guard::validate_path;
use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const MAX_READ_BYTES: usize = 200_000;

fn bad_path(call_id: &str, err: String) -> ToolOutput {
    ToolOutput::err(call_id, err)
}

// ── read_file ─────────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str { "read_file" }
    fn description(&self) -> &str { "Read the contents of a file beneath the working directory." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn output_category(&self) -> OutputCategory { OutputCategory::FileContent }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() as usize > MAX_READ_BYTES => {
                ToolOutput::err(&call.id, format!("size-error: {path} exceeds {MAX_READ_BYTES} bytes"))
            }
            Ok(_) => match tokio::fs::read_to_string(&resolved).await {
                Ok(content) => ToolOutput::ok(&call.id, content),
                Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
            },
            Err(e) => ToolOutput::err(&call.id, format!("read error: {e}")),
        }
    }
}

// ── write_file ────────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str { "write_file" }
    fn description(&self) -> &str { "Write content to a file, creating or overwriting it." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn is_read_only(&self) -> bool { false }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let (Some(path), Some(content)) = (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'path' or 'content'");
        };
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        if let Some(parent) = resolved.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match tokio::fs::write(&resolved, content).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ── append_file ───────────────────────────────────────────────────────────────

pub struct AppendFileTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for AppendFileTool {
    fn name(&self) -> &str { "append_file" }
    fn description(&self) -> &str { "Append content to the end of a file, creating it if missing." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn is_read_only(&self) -> bool { false }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        use tokio::io::AsyncWriteExt;
        let (Some(path), Some(content)) = (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("content").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'path' or 'content'");
        };
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        if let Some(parent) = resolved.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match tokio::fs::OpenOptions::new().append(true).create(true).open(&resolved).await {
            Ok(mut f) => match f.write_all(content.as_bytes()).await {
                Ok(_) => ToolOutput::ok(&call.id, format!("appended {} bytes to {path}", content.len())),
                Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
            },
            Err(e) => ToolOutput::err(&call.id, format!("open error: {e}")),
        }
    }
}

// ── delete_file ───────────────────────────────────────────────────────────────

pub struct DeleteFileTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str { "delete_file" }
    fn description(&self) -> &str { "Delete a single file beneath the working directory." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn is_read_only(&self) -> bool { false }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        match tokio::fs::remove_file(&resolved).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("deleted {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
        }
    }
}

// ── list_directory / list_all_files ───────────────────────────────────────────

pub struct ListDirectoryTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str { "list_directory" }
    fn description(&self) -> &str { "List the immediate contents of a directory." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        match tokio::fs::read_dir(&resolved).await {
            Ok(mut rd) => {
                let mut entries = Vec::new();
                while let Ok(Some(entry)) = rd.next_entry().await {
                    let name = entry.file_name().to_string_lossy().to_string();
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    entries.push(if is_dir { format!("{name}/") } else { name });
                }
                entries.sort();
                ToolOutput::ok(&call.id, entries.join("\n"))
            }
            Err(e) => ToolOutput::err(&call.id, format!("list error: {e}")),
        }
    }
}

pub struct ListAllFilesTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for ListAllFilesTool {
    fn name(&self) -> &str { "list_all_files" }
    fn description(&self) -> &str { "Recursively list every file beneath a directory, optionally filtered by extension." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "extensions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        let extensions: Option<Vec<String>> = call
            .args
            .get("extensions")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());

        let mut results = Vec::new();
        for entry in walkdir::WalkDir::new(&resolved).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(exts) = &extensions {
                let matches = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| exts.iter().any(|want| want.trim_start_matches('.') == e))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            results.push(entry.path().display().to_string());
        }
        results.sort();
        ToolOutput::ok(&call.id, results.join("\n"))
    }
}

// ── search_files ──────────────────────────────────────────────────────────────

pub struct SearchFilesTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str { "search_files" }
    fn description(&self) -> &str { "Search for files matching a glob pattern (e.g. '*.rs', 'test_*.py')." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }
    fn output_category(&self) -> OutputCategory { OutputCategory::MatchList }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(pattern) = call.args.get("pattern").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'pattern'");
        };
        let base = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let resolved = match validate_path(&self.working_dir, base) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        let matcher = globset::Glob::new(pattern).ok().map(|g| g.compile_matcher());
        let Some(matcher) = matcher else {
            return ToolOutput::err(&call.id, format!("invalid glob pattern: {pattern}"));
        };
        let mut matches = Vec::new();
        for entry in walkdir::WalkDir::new(&resolved).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.path().file_name().and_then(|n| n.to_str()) {
                if matcher.is_match(name) {
                    matches.push(entry.path().display().to_string());
                }
            }
        }
        matches.sort();
        ToolOutput::ok(&call.id, matches.join("\n"))
    }
}

// ── get_file_info ─────────────────────────────────────────────────────────────

pub struct GetFileInfoTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for GetFileInfoTool {
    fn name(&self) -> &str { "get_file_info" }
    fn description(&self) -> &str { "Get size and modified time for a file." }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(path) = call.args.get("path").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'path'");
        };
        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return bad_path(&call.id, e),
        };
        match tokio::fs::metadata(&resolved).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                ToolOutput::ok(
                    &call.id,
                    json!({
                        "size_bytes": meta.len(),
                        "is_dir": meta.is_dir(),
                        "modified_unix": modified,
                    })
                    .to_string(),
                )
            }
            Err(e) => ToolOutput::err(&call.id, format!("get_file_info error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
