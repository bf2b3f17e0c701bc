// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `edit_file`: applies a unified diff to a file on disk. Context and
//! deletion lines must match the file's current contents exactly — there is
//! no fuzzy or indent-normalized fallback. A mismatch is a hard failure and
//! the file is left untouched.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::path_guard::validate_path;
use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

// ── Hunk data structures ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum HunkLine {
    /// Unchanged line — must exist in the file, kept verbatim.
    Context(String),
    /// Line to remove from the file.
    Del(String),
    /// Line to insert into the file.
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must already be present in the file (Context + Del), in order.
    fn search_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Del(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }
}

/// Strip a leading ` ```diff ` / ` ``` ` markdown fence if present.
fn strip_markdown_fence(diff: &str) -> &str {
    let t = diff.trim_start();
    if t.starts_with("```") {
        if let Some(nl) = t.find('\n') {
            let body = &t[nl + 1..];
            if let Some(close) = body.rfind("\n```") {
                return &body[..close + 1];
            }
            return body;
        }
    }
    diff
}

/// Parse unified diff hunks. Accepts standard `@@ -N,M +N,M @@` headers and
/// bare `@@ @@` headers; line numbers are discarded — position is always
/// found by exact content match.
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let diff = strip_markdown_fence(diff);
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") {
            continue;
        }
        if line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk { lines: Vec::new() });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                h.lines.push(HunkLine::Context(String::new()));
            }
        }
    }
    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }
    if hunks.is_empty() {
        return Err("no hunks found in diff; use @@ headers".to_string());
    }
    Ok(hunks)
}

/// Finds the single exact, contiguous occurrence of `search_lines` in
/// `file_lines`. Zero or more-than-one occurrence is an error — an
/// unambiguous location is required before mutating the file.
fn find_hunk_position(file_lines: &[String], search_lines: &[&str]) -> Result<usize, String> {
    if search_lines.is_empty() {
        return Ok(file_lines.len());
    }
    let n = search_lines.len();
    if file_lines.len() < n {
        return Err("context does not match file contents".to_string());
    }
    let file_refs: Vec<&str> = file_lines.iter().map(String::as_str).collect();
    let matches: Vec<usize> =
        (0..=(file_refs.len() - n)).filter(|&i| file_refs[i..i + n] == *search_lines).collect();
    match matches.len() {
        0 => Err("context does not match file contents".to_string()),
        1 => Ok(matches[0]),
        _ => Err("context matches file contents in more than one place".to_string()),
    }
}

/// Applies one hunk to `file_lines` in place, returning the new line count
/// consumed so the next hunk searches past it.
fn apply_hunk(file_lines: &mut Vec<String>, hunk: &Hunk) -> Result<(), String> {
    let search = hunk.search_lines();
    let pos = find_hunk_position(file_lines, &search)?;

    let mut replacement = Vec::new();
    for line in &hunk.lines {
        match line {
            HunkLine::Context(s) => replacement.push(s.clone()),
            HunkLine::Del(_) => {}
            HunkLine::Add(s) => replacement.push(s.clone()),
        }
    }
    file_lines.splice(pos..pos + search.len(), replacement);
    Ok(())
}

pub struct EditFileTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }
    fn description(&self) -> &str {
        "Apply a unified diff to a file. Context and removed lines must match the file exactly."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "diff": { "type": "string" }
            },
            "required": ["path", "diff"],
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
        let (Some(path), Some(diff)) = (
            call.args.get("path").and_then(|v| v.as_str()),
            call.args.get("diff").and_then(|v| v.as_str()),
        ) else {
            return ToolOutput::err(&call.id, "missing 'path' or 'diff'");
        };

        let resolved = match validate_path(&self.working_dir, path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let original = match tokio::fs::read_to_string(&resolved).await {
            Ok(s) => s,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let hunks = match parse_hunks(diff) {
            Ok(h) => h,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let mut file_lines: Vec<String> = original.lines().map(str::to_string).collect();
        for hunk in &hunks {
            if let Err(e) = apply_hunk(&mut file_lines, hunk) {
                // File unchanged on disk — we only ever mutate the in-memory
                // copy, and never write back on error.
                return ToolOutput::err(&call.id, e);
            }
        }

        let mut new_content = file_lines.join("\n");
        if original.ends_with('\n') {
            new_content.push('\n');
        }

        match tokio::fs::write(&resolved, &new_content).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("applied {} hunk(s) to {path}", hunks.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
