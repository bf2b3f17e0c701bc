// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::policy::ApprovalPolicy;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// Every tool in this crate produces text — shelling out, editing files,
/// running git commands. `parts` stays a `Vec` of a single-variant enum
/// rather than collapsing into a bare `String` because the agentic loop's
/// truncation pass (see [`OutputCategory`]) walks `parts`, not `content`,
/// when a result needs to be shortened.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
}

/// The result of executing one [`ToolCall`].
///
/// `content` is the flattened text view (every part joined); `parts` is
/// what the truncation pass actually walks. They're kept in sync by
/// [`ToolOutput::ok`]/[`ToolOutput::err`]/[`ToolOutput::with_parts`] rather
/// than left for each tool to assemble by hand.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    /// `true` when the tool itself reported failure (a missing file, a
    /// nonzero exit code) — distinct from an allowlist rejection, which
    /// never reaches a tool's `execute` at all.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        let call_id = call_id.into();
        Self {
            call_id,
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        let call_id = call_id.into();
        Self {
            call_id,
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: true,
        }
    }

    /// Result with arbitrary parts (text and/or images).
    ///
    /// `content` is set to the concatenation of all Text parts.
    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .map(|p| match p {
                ToolOutputPart::Text(t) => t.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            call_id: call_id.into(),
            content: text,
            parts,
            is_error: false,
        }
    }
}

/// How a tool's text should be cut down once it blows past the per-result
/// token cap. Picking the wrong strategy loses the part of the output that
/// actually mattered — a truncated `git diff` that keeps only the head is
/// useless if the interesting hunk was at the bottom, so each tool owns its
/// own category instead of the truncation pass guessing from the tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Keep the first 60 and last 40 lines. Process output (`run_shell`,
    /// test runners, build logs) tends to front-load the command being run
    /// and back-load the actual result.
    HeadTail,
    /// Keep the leading entries. `grep`/`search_codebase` already rank by
    /// relevance, so the tail is the least useful part to keep.
    MatchList,
    /// Keep a head/tail window around a separator. File reads need both the
    /// top (imports, declarations) and the bottom (where edits usually
    /// land) more than the middle.
    FileContent,
    /// Hard character-boundary cut. The fallback for everything without a
    /// more specific shape.
    #[default]
    Generic,
}

/// Implemented by every tool the registry can hold, built-in or custom.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn default_policy(&self) -> ApprovalPolicy;
    /// Whether this tool can be called while the dispatcher is restricting
    /// an iteration to reads only (see
    /// [`orkestra_core`](../orkestra_core/index.html)'s write-only-subset
    /// rule: after an iteration that only touched read-only tools, the next
    /// one is narrowed to push the model toward acting instead of reading
    /// forever). Most built-in tools are reads or listings, so the default
    /// is read-only; tools that touch the filesystem, a subprocess, or git
    /// state override it to `false`.
    fn is_read_only(&self) -> bool {
        true
    }
    /// Default is [`OutputCategory::Generic`]; override when a smarter cut
    /// exists for this tool's output shape.
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::policy::ApprovalPolicy;

    #[test]
    fn output_category_default_is_generic() {
        assert_eq!(OutputCategory::default(), OutputCategory::Generic);
    }

    /// A tool that declares neither `is_read_only` nor `output_category` —
    /// exercises the defaults a bare-minimum tool gets for free.
    struct UndeclaredTool;

    #[async_trait]
    impl Tool for UndeclaredTool {
        fn name(&self) -> &str {
            "undeclared"
        }
        fn description(&self) -> &str {
            "declares nothing beyond the required methods"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn undeclared_tool_defaults_to_read_only_and_generic() {
        assert!(UndeclaredTool.is_read_only());
        assert_eq!(UndeclaredTool.output_category(), OutputCategory::Generic);
    }

    /// A tool that mutates the filesystem and produces a file-shaped result
    /// — exercises both overrides together, since a real write tool (e.g.
    /// `edit_file`) needs both at once.
    struct WriteFileLikeTool;

    #[async_trait]
    impl Tool for WriteFileLikeTool {
        fn name(&self) -> &str {
            "write_file_like"
        }
        fn description(&self) -> &str {
            "writes a file and returns its new contents"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        fn is_read_only(&self) -> bool {
            false
        }
        fn output_category(&self) -> OutputCategory {
            OutputCategory::FileContent
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "wrote it")
        }
    }

    #[test]
    fn write_tool_overrides_both_read_only_and_category() {
        assert!(!WriteFileLikeTool.is_read_only());
        assert_eq!(WriteFileLikeTool.output_category(), OutputCategory::FileContent);
    }

    #[test]
    fn read_only_default_and_override_disagree() {
        assert_ne!(UndeclaredTool.is_read_only(), WriteFileLikeTool.is_read_only());
    }

    #[test]
    fn tool_output_ok_is_not_an_error() {
        let out = ToolOutput::ok("c1", "done");
        assert!(!out.is_error);
        assert_eq!(out.content, "done");
    }

    #[test]
    fn tool_output_err_flags_is_error() {
        let out = ToolOutput::err("c1", "boom");
        assert!(out.is_error);
        assert_eq!(out.content, "boom");
    }

    #[test]
    fn tool_output_with_parts_joins_text_parts() {
        let out = ToolOutput::with_parts("c1", vec![ToolOutputPart::Text("a".into()), ToolOutputPart::Text("b".into())]);
        assert_eq!(out.content, "a\nb");
        assert!(!out.is_error);
    }
}
