// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-call extraction from an assistant turn that didn't use the
//! structured `tool_calls` field. Tried in order when the caller has no
//! structured calls to work with:
//!
//! 1. Fenced code blocks, each parsed as one call statement.
//! 2. A single-line plain-text call whose head matches an allowed tool name.
//!
//! Both tiers parse the same Python-ish call syntax: `name(arg=value, ...)`,
//! with values read as JSON literals where possible and falling back to bare
//! strings otherwise.

use std::collections::HashSet;

use orkestra_model::ToolCall;
use serde_json::Value;

/// `print` (and its common aliases) is bound as a no-op everywhere in this
/// system — a model narrating its own output in a fenced block shouldn't
/// surface as an `unknown tool` error in the conversation.
fn is_suppressed_call(name: &str) -> bool {
    matches!(name, "print" | "println")
}

/// Extract calls from fenced code blocks; empty if `text` has none or no
/// block parses as a call statement.
pub fn extract_fenced_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after_open = &rest[start + 3..];
        let Some(end) = after_open.find("```") else { break };
        let mut block = &after_open[..end];
        // Skip a language tag on the fence's first line (```python\n...).
        if let Some(nl) = block.find('\n') {
            if !block[..nl].trim().is_empty() && !block[..nl].contains('(') {
                block = &block[nl + 1..];
            }
        }
        if let Some((name, args)) = parse_call_statement(block.trim()) {
            if !is_suppressed_call(&name) {
                calls.push(ToolCall { id: format!("fenced-{}", calls.len()), function_name: name, arguments: args });
            }
        }
        rest = &after_open[end + 3..];
    }
    calls
}

/// Extract a call from a single line of plain text, only when its head
/// matches a name in `allowed_names` — prevents ordinary prose that happens
/// to contain parentheses from being misread as a tool invocation.
pub fn extract_plain_text_calls(text: &str, allowed_names: &HashSet<String>) -> Vec<ToolCall> {
    for line in text.lines() {
        let line = line.trim();
        if let Some((name, args)) = parse_call_statement(line) {
            if is_suppressed_call(&name) {
                continue;
            }
            if allowed_names.contains(&name) {
                return vec![ToolCall { id: "plain-0".to_string(), function_name: name, arguments: args }];
            }
        }
    }
    Vec::new()
}

/// Parse one `name(arg1=val1, arg2=val2, ...)` statement into
/// `(function_name, arguments_object)`. Returns `None` if `stmt` doesn't look
/// like a call (no matching `name(...)` shape).
fn parse_call_statement(stmt: &str) -> Option<(String, Value)> {
    let stmt = stmt.trim().trim_end_matches(';').trim();
    let open = stmt.find('(')?;
    if !stmt.ends_with(')') {
        return None;
    }
    let name = stmt[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        return None;
    }

    let inner = &stmt[open + 1..stmt.len() - 1];
    let mut map = serde_json::Map::new();
    let mut positional: Vec<Value> = Vec::new();
    for part in split_top_level_commas(inner) {
        if part.is_empty() {
            continue;
        }
        match find_top_level_eq(&part) {
            Some(eq) => {
                let key = part[..eq].trim().to_string();
                let val = parse_value(part[eq + 1..].trim());
                map.insert(key, val);
            }
            None => positional.push(parse_value(&part)),
        }
    }
    // A single positional argument that is itself an object is treated as
    // the full arguments payload (covers `tool_name({"path": "a.txt"})`).
    if map.is_empty() && positional.len() == 1 {
        if let Value::Object(o) = positional.into_iter().next().unwrap() {
            return Some((name.to_string(), Value::Object(o)));
        }
    }
    Some((name.to_string(), Value::Object(map)))
}

/// Split on commas that aren't nested inside brackets/parens or a quoted string.
fn split_top_level_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(q) = in_str {
            current.push(c);
            if c == '\\' {
                if let Some(n) = chars.next() {
                    current.push(n);
                }
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                in_str = Some(c);
                current.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Find the first top-level `=` (not `==`, not inside a quoted string).
fn find_top_level_eq(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_str: Option<char> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match in_str {
            Some(q) => {
                if c == q {
                    in_str = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    in_str = Some(c);
                } else if c == '=' && bytes.get(i + 1).map(|&b| b as char) != Some('=') && i > 0 && bytes[i - 1] != b'=' {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

fn parse_value(token: &str) -> Value {
    let t = token.trim();
    if let Ok(v) = serde_json::from_str::<Value>(t) {
        return v;
    }
    if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
        let inner = &t[1..t.len() - 1];
        return Value::String(inner.replace("\\'", "'"));
    }
    match t {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::Null,
        _ => Value::String(t.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
