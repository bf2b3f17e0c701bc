// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `run_python` and `run_tests`: sandboxed one-shot process execution for
//! the developer/auditor agents. Commands run under the tool's working
//! directory; output is captured and truncated, never streamed.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::policy::ApprovalPolicy;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const OUTPUT_LIMIT: usize = 100_000;

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        format!("{}...[truncated {} bytes]", &s[..limit], s.len() - limit)
    }
}

async fn run_captured(
    mut cmd: Command,
    timeout_secs: u64,
    call_id: &str,
) -> ToolOutput {
    let result =
        tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), cmd.output()).await;
    match result {
        Ok(Ok(output)) => {
            let stdout = truncate(&String::from_utf8_lossy(&output.stdout), OUTPUT_LIMIT);
            let stderr = truncate(&String::from_utf8_lossy(&output.stderr), OUTPUT_LIMIT);
            let exit_code = output.status.code().unwrap_or(-1);
            let body = json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": exit_code,
                "timed_out": false,
            })
            .to_string();
            if output.status.success() {
                ToolOutput::ok(call_id, body)
            } else {
                ToolOutput::err(call_id, body)
            }
        }
        Ok(Err(e)) => ToolOutput::err(call_id, format!("spawn error: {e}")),
        Err(_) => ToolOutput::err(
            call_id,
            json!({ "timed_out": true, "exit_code": Option::<i32>::None }).to_string(),
        ),
    }
}

/// Writes `code` to a temp `.py` file beneath `working_dir` so stack traces
/// reference a real path, then runs it with the active `python3` interpreter.
pub struct RunPythonTool {
    pub working_dir: PathBuf,
    pub default_timeout_secs: u64,
}

impl Default for RunPythonTool {
    fn default() -> Self {
        Self { working_dir: PathBuf::from("."), default_timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        "run_python"
    }
    fn description(&self) -> &str {
        "Run Python code in the working directory and return stdout, stderr, and exit code."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string" },
                "timeout": { "type": "integer" }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(code) = call.args.get("code").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'code'");
        };
        let timeout = call.args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_secs);

        let script_path = self.working_dir.join(format!(".orkestra_run_{}.py", call.id));
        let mut f = match tokio::fs::File::create(&script_path).await {
            Ok(f) => f,
            Err(e) => return ToolOutput::err(&call.id, format!("failed to stage script: {e}")),
        };
        if let Err(e) = f.write_all(code.as_bytes()).await {
            return ToolOutput::err(&call.id, format!("failed to stage script: {e}"));
        }
        drop(f);

        debug!(path = %script_path.display(), "run_python tool");
        let mut cmd = Command::new("python3");
        cmd.arg(&script_path).current_dir(&self.working_dir);
        let out = run_captured(cmd, timeout, &call.id).await;
        let _ = tokio::fs::remove_file(&script_path).await;
        out
    }
}

/// Runs the project's test suite with `pytest` or `unittest`.
pub struct RunTestsTool {
    pub working_dir: PathBuf,
    pub default_timeout_secs: u64,
}

impl Default for RunTestsTool {
    fn default() -> Self {
        Self { working_dir: PathBuf::from("."), default_timeout_secs: 300 }
    }
}

#[async_trait]
impl Tool for RunTestsTool {
    fn name(&self) -> &str {
        "run_tests"
    }
    fn description(&self) -> &str {
        "Run the project's test suite with pytest or unittest."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "framework": { "type": "string", "enum": ["pytest", "unittest"] },
                "args": { "type": "array", "items": { "type": "string" } },
                "timeout": { "type": "integer" }
            },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }
    fn is_read_only(&self) -> bool {
        false
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let framework = call.args.get("framework").and_then(|v| v.as_str()).unwrap_or("pytest");
        if framework != "pytest" && framework != "unittest" {
            return ToolOutput::err(&call.id, format!("unsupported test framework: {framework}"));
        }
        let extra_args: Vec<String> = call
            .args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let timeout = call.args.get("timeout").and_then(|v| v.as_u64()).unwrap_or(self.default_timeout_secs);

        let mut cmd = Command::new("python3");
        cmd.arg("-m").arg(framework).args(&extra_args).current_dir(&self.working_dir);
        run_captured(cmd, timeout, &call.id).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
