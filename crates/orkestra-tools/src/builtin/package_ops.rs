// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Package tools: `search_package`, `install_package`, `check_package_installed`,
//! `list_installed_packages`. Each dispatches to a pip or npm backend by
//! `language`; package names are validated before ever reaching a shell arg.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Rejects path separators and shell metacharacters; otherwise requires
/// `[\w.-]+`. Mirrors the containment rationale of `path_guard` — a package
/// name is never trusted to become part of a spawned argv unchecked.
fn validate_package_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.chars().any(|c| matches!(c, '/' | '\\' | ';' | '|' | '&' | '`' | '$')) {
        return false;
    }
    name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Python,
    Npm,
}

fn parse_lang(s: &str) -> Option<Lang> {
    match s.to_lowercase().as_str() {
        "python" => Some(Lang::Python),
        "javascript" | "js" | "node" => Some(Lang::Npm),
        _ => None,
    }
}

async fn run(cmd: &str, args: &[&str], cwd: &std::path::Path) -> Result<(bool, String, String), String> {
    let output = Command::new(cmd)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| format!("{cmd} spawn error: {e}"))?;
    Ok((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    ))
}

pub struct SearchPackageTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for SearchPackageTool {
    fn name(&self) -> &str {
        "search_package"
    }
    fn description(&self) -> &str {
        "Search PyPI or the npm registry for a package by name."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "language": { "type": "string", "enum": ["python", "javascript"] }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(name) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name'");
        };
        let lang_str = call.args.get("language").and_then(|v| v.as_str()).unwrap_or("python");
        let Some(lang) = parse_lang(lang_str) else {
            return ToolOutput::err(&call.id, format!("unsupported language: {lang_str}"));
        };
        if !validate_package_name(name) {
            return ToolOutput::err(&call.id, format!("invalid package name: {name}"));
        }

        let url = match lang {
            Lang::Python => format!("https://pypi.org/pypi/{name}/json"),
            Lang::Npm => format!("https://registry.npmjs.org/{name}"),
        };
        match reqwest::get(&url).await {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(body) => ToolOutput::ok(&call.id, summarize_search(lang, name, &body)),
                Err(e) => ToolOutput::err(&call.id, format!("failed to parse registry response: {e}")),
            },
            Ok(resp) => ToolOutput::err(&call.id, format!("package '{name}' not found (status {})", resp.status())),
            Err(e) => ToolOutput::err(&call.id, format!("registry request failed: {e}")),
        }
    }
}

fn summarize_search(lang: Lang, name: &str, body: &Value) -> String {
    match lang {
        Lang::Python => {
            let info = &body["info"];
            let mut versions: Vec<&str> =
                body["releases"].as_object().map(|m| m.keys().map(String::as_str).collect()).unwrap_or_default();
            versions.sort_unstable_by(|a, b| b.cmp(a));
            versions.truncate(10);
            json!({
                "language": "python",
                "name": info["name"].as_str().unwrap_or(name),
                "version": info["version"],
                "summary": info["summary"],
                "available_versions": versions,
                "found": true,
            })
            .to_string()
        }
        Lang::Npm => {
            let latest = body["dist-tags"]["latest"].as_str().unwrap_or("unknown");
            let mut versions: Vec<&str> =
                body["versions"].as_object().map(|m| m.keys().map(String::as_str).collect()).unwrap_or_default();
            versions.sort_unstable_by(|a, b| b.cmp(a));
            versions.truncate(10);
            json!({
                "language": "javascript",
                "name": body["name"].as_str().unwrap_or(name),
                "version": latest,
                "description": body["description"],
                "available_versions": versions,
                "found": true,
            })
            .to_string()
        }
    }
}

pub struct InstallPackageTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for InstallPackageTool {
    fn name(&self) -> &str {
        "install_package"
    }
    fn description(&self) -> &str {
        "Install a Python (pip) or JavaScript (npm) package."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "version": { "type": "string" },
                "language": { "type": "string", "enum": ["python", "javascript"] }
            },
            "required": ["name"],
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
        let Some(name) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name'");
        };
        if !validate_package_name(name) {
            return ToolOutput::err(&call.id, format!("invalid package name: {name}"));
        }
        let version = call.args.get("version").and_then(|v| v.as_str());
        let lang_str = call.args.get("language").and_then(|v| v.as_str()).unwrap_or("python");
        let Some(lang) = parse_lang(lang_str) else {
            return ToolOutput::err(&call.id, format!("unsupported language: {lang_str}"));
        };

        let (cmd, args): (&str, Vec<String>) = match lang {
            Lang::Python => {
                let spec = match version {
                    Some(v) if v.chars().any(|c| "=!<>~".contains(c)) => format!("{name}{v}"),
                    Some(v) => format!("{name}=={v}"),
                    None => name.to_string(),
                };
                ("python3", vec!["-m".into(), "pip".into(), "install".into(), "--quiet".into(), spec])
            }
            Lang::Npm => {
                let spec = match version {
                    Some(v) => format!("{name}@{v}"),
                    None => name.to_string(),
                };
                ("npm", vec!["install".into(), "--silent".into(), "--save".into(), spec])
            }
        };
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match run(cmd, &arg_refs, &self.working_dir).await {
            Ok((true, _, _)) => ToolOutput::ok(&call.id, json!({ "name": name, "installed": true }).to_string()),
            Ok((false, _, stderr)) => ToolOutput::err(&call.id, format!("install failed: {stderr}")),
            Err(e) => ToolOutput::err(&call.id, e),
        }
    }
}

pub struct CheckPackageInstalledTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for CheckPackageInstalledTool {
    fn name(&self) -> &str {
        "check_package_installed"
    }
    fn description(&self) -> &str {
        "Check whether a package is installed and report its version."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "language": { "type": "string", "enum": ["python", "javascript"] }
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let Some(name) = call.args.get("name").and_then(|v| v.as_str()) else {
            return ToolOutput::err(&call.id, "missing 'name'");
        };
        let lang_str = call.args.get("language").and_then(|v| v.as_str()).unwrap_or("python");
        let Some(lang) = parse_lang(lang_str) else {
            return ToolOutput::err(&call.id, format!("unsupported language: {lang_str}"));
        };

        match lang {
            Lang::Python => match run("python3", &["-m", "pip", "show", name], &self.working_dir).await {
                Ok((true, stdout, _)) => {
                    let version = stdout
                        .lines()
                        .find_map(|l| l.strip_prefix("Version: ").map(str::trim))
                        .unwrap_or("unknown");
                    ToolOutput::ok(
                        &call.id,
                        json!({ "name": name, "language": "python", "installed": true, "installed_version": version })
                            .to_string(),
                    )
                }
                Ok((false, _, _)) => {
                    ToolOutput::ok(&call.id, json!({ "name": name, "language": "python", "installed": false }).to_string())
                }
                Err(e) => ToolOutput::err(&call.id, e),
            },
            Lang::Npm => match run("npm", &["ls", name, "--depth=0"], &self.working_dir).await {
                Ok((true, stdout, _)) if stdout.contains(&format!("{name}@")) => {
                    let version = stdout
                        .lines()
                        .find(|l| l.contains(name) && l.contains('@'))
                        .and_then(|l| l.rsplit('@').next())
                        .unwrap_or("unknown")
                        .trim();
                    ToolOutput::ok(
                        &call.id,
                        json!({ "name": name, "language": "javascript", "installed": true, "installed_version": version })
                            .to_string(),
                    )
                }
                Ok(_) => ToolOutput::ok(
                    &call.id,
                    json!({ "name": name, "language": "javascript", "installed": false }).to_string(),
                ),
                Err(e) => ToolOutput::err(&call.id, e),
            },
        }
    }
}

pub struct ListInstalledPackagesTool {
    pub working_dir: PathBuf,
}

#[async_trait]
impl Tool for ListInstalledPackagesTool {
    fn name(&self) -> &str {
        "list_installed_packages"
    }
    fn description(&self) -> &str {
        "List every installed package for a language."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "language": { "type": "string", "enum": ["python", "javascript"] } },
            "additionalProperties": false
        })
    }
    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let lang_str = call.args.get("language").and_then(|v| v.as_str()).unwrap_or("python");
        let Some(lang) = parse_lang(lang_str) else {
            return ToolOutput::err(&call.id, format!("unsupported language: {lang_str}"));
        };
        match lang {
            Lang::Python => match run("python3", &["-m", "pip", "list", "--format=json"], &self.working_dir).await {
                Ok((true, stdout, _)) => match serde_json::from_str::<Value>(&stdout) {
                    Ok(packages) => ToolOutput::ok(
                        &call.id,
                        json!({ "language": "python", "packages": packages }).to_string(),
                    ),
                    Err(e) => ToolOutput::err(&call.id, format!("failed to parse pip list output: {e}")),
                },
                Ok((false, _, stderr)) => ToolOutput::err(&call.id, format!("pip list failed: {stderr}")),
                Err(e) => ToolOutput::err(&call.id, e),
            },
            Lang::Npm => match run("npm", &["ls", "--depth=0", "--json"], &self.working_dir).await {
                Ok((_, stdout, _)) => match serde_json::from_str::<Value>(&stdout) {
                    Ok(tree) => ToolOutput::ok(
                        &call.id,
                        json!({ "language": "javascript", "packages": tree["dependencies"] }).to_string(),
                    ),
                    Err(e) => ToolOutput::err(&call.id, format!("failed to parse npm ls output: {e}")),
                },
                Err(e) => ToolOutput::err(&call.id, e),
            },
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
    fn validate_package_name_rejects_shell_metacharacters() {
        assert!(!validate_package_name("foo;rm -rf /"));
        assert!(!validate_package_name("../escape"));
        assert!(validate_package_name("requests"));
        assert!(validate_package_name("left-pad"));
        assert!(validate_package_name("my.package_name"));
    }

    #[test]
    fn validate_package_name_rejects_empty() {
        assert!(!validate_package_name(""));
    }

    #[tokio::test]
    async fn install_rejects_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let tool = InstallPackageTool { working_dir: dir.path().to_path_buf() };
        let out = tool.execute(&call("install_package", json!({"name": "foo;bar"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid package name"));
    }

    #[tokio::test]
    async fn search_rejects_unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let tool = SearchPackageTool { working_dir: dir.path().to_path_buf() };
        let out = tool.execute(&call("search_package", json!({"name": "x", "language": "ruby"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("unsupported language"));
    }

    #[tokio::test]
    async fn list_installed_rejects_unsupported_language() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ListInstalledPackagesTool { working_dir: dir.path().to_path_buf() };
        let out = tool.execute(&call("list_installed_packages", json!({"language": "ruby"}))).await;
        assert!(out.is_error);
    }
}
