// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::{validate_roles_config, RolesConfig};

/// Default search locations for the roles-config document, lowest to highest
/// priority. Only consulted when `--config` is not given explicitly.
/// `base` is the directory the cwd-relative candidates resolve against — the
/// real current directory in production, an injectable test directory in
/// tests, so resolving this list never has to touch the process-wide cwd.
fn default_search_paths(base: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("orkestra/roles.yaml"));
        paths.push(cfg.join("orkestra/roles.json"));
    }
    paths.push(base.join("orkestra.roles.yaml"));
    paths.push(base.join("orkestra.roles.yml"));
    paths.push(base.join("orkestra.roles.json"));
    paths
}

/// Parse a roles-config document as YAML or JSON, auto-detected from the
/// file extension (`.json` parses as JSON; anything else as YAML — JSON is
/// itself valid YAML so this never rejects a `.yaml`-suffixed JSON file).
fn parse_roles_config(path: &Path, text: &str) -> anyhow::Result<RolesConfig> {
    let cfg: RolesConfig = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        serde_json::from_str(text).with_context(|| format!("parsing {}", path.display()))?
    } else {
        serde_yaml::from_str(text).with_context(|| format!("parsing {}", path.display()))?
    };
    Ok(cfg)
}

/// Load and validate the roles-config document.
///
/// `explicit` is the `--config PATH` CLI override; when absent, the default
/// search paths are tried in order and the first existing file wins. Errors
/// if no file is found, the file fails to parse, or validation rejects it.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<RolesConfig> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    load_from(explicit, &cwd)
}

/// [`load`], but with the cwd-relative search base passed in explicitly
/// instead of read from the process environment — lets tests exercise
/// "no default file present" without touching the real current directory.
fn load_from(explicit: Option<&Path>, base: &Path) -> anyhow::Result<RolesConfig> {
    let path: PathBuf = match explicit {
        Some(p) => p.to_path_buf(),
        None => default_search_paths(base)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no roles config found; pass --config PATH or create orkestra.roles.yaml"
                )
            })?,
    };

    debug!(path = %path.display(), "loading roles config");
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading roles config {}", path.display()))?;
    let cfg = parse_roles_config(&path, &text)?;
    validate_roles_config(&cfg)?;
    Ok(cfg)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_JSON: &str = r#"{
        "manager": {
            "role": "manager",
            "system_prompt": "decompose requests",
            "model_endpoints": [{"model": "gpt-4o", "endpoint": "http://localhost"}]
        },
        "developer": {
            "role": "developer",
            "system_prompt": "write code",
            "model_endpoints": [{"model": "gpt-4o", "endpoint": "http://localhost"}],
            "allowed_tools": ["read_file", "write_file"]
        }
    }"#;

    #[test]
    fn load_explicit_json_file() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(f, "{SAMPLE_JSON}").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.len(), 2);
        assert!(cfg.contains_key("manager"));
        assert!(cfg["developer"].allows_tool("read_file"));
        assert!(!cfg["developer"].allows_tool("delete_file"));
    }

    #[test]
    fn load_explicit_yaml_file() {
        let yaml = "manager:\n  role: manager\n  system_prompt: decompose\n  model_endpoints:\n    - model: gpt-4o\n      endpoint: http://x\n";
        let mut f = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(f, "{yaml}").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg["manager"].role, "manager");
    }

    #[test]
    fn load_missing_explicit_path_errors() {
        assert!(load(Some(Path::new("/tmp/orkestra_missing_roles_xyz.json"))).is_err());
    }

    #[test]
    fn load_invalid_document_errors_on_validation() {
        let bad = r#"{"manager": {"role": "wrong_key", "system_prompt": "x", "model_endpoints": []}}"#;
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(f, "{bad}").unwrap();
        assert!(load(Some(f.path())).is_err());
    }

    #[test]
    fn no_explicit_path_and_no_default_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from(None, dir.path()).is_err());
    }

    #[test]
    fn no_explicit_path_finds_default_file_in_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orkestra.roles.json"), SAMPLE_JSON).unwrap();
        let cfg = load_from(None, dir.path()).unwrap();
        assert!(cfg.contains_key("manager"));
    }
}
