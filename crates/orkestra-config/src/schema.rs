// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> i64 {
    -1
}
fn default_timeout_seconds() -> u64 {
    120
}

/// One `(model, endpoint)` failover candidate. Attempts consume the list
/// left-to-right; the agent never picks a later entry before exhausting the
/// retry budget on an earlier one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEndpoint {
    pub model: String,
    pub endpoint: String,
}

/// Configuration for a single role, keyed by role name in [`RolesConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Must match the map key this config was loaded under.
    pub role: String,
    pub system_prompt: String,
    /// Ordered failover list; the first entry is tried first on every attempt.
    pub model_endpoints: Vec<ModelEndpoint>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// `-1` means "no explicit cap"; forwarded to the endpoint as-is.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
    #[serde(default = "default_timeout_seconds", rename = "timeout")]
    pub timeout_seconds: u64,
    /// Absent means every registered tool is allowed.
    #[serde(default)]
    pub allowed_tools: Option<HashSet<String>>,
    /// Substituted into `clone_repo`/`checkout_branch` calls that omit a branch.
    #[serde(default)]
    pub default_git_branch: Option<String>,
}

impl RoleConfig {
    /// `true` when `tool_name` is present in `allowed_tools`, or when no
    /// allowlist was configured for this role (everything allowed).
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        match &self.allowed_tools {
            None => true,
            Some(set) => set.contains(tool_name),
        }
    }
}

/// The roles-config document: a map of role name to [`RoleConfig`].
///
/// `manager`, `developer`, and `auditor` are the roles the coordinator
/// assigns to by default, but any role declared here is callable via
/// `assign_task`.
pub type RolesConfig = HashMap<String, RoleConfig>;

/// Validate that a just-parsed [`RolesConfig`] document is well-formed:
/// every entry's `role` field must match its map key, and every entry must
/// declare a non-empty `system_prompt` and at least one model endpoint.
pub fn validate_roles_config(cfg: &RolesConfig) -> anyhow::Result<()> {
    for (key, role) in cfg {
        if &role.role != key {
            anyhow::bail!(
                "roles config entry '{key}' declares role '{}' (must match its map key)",
                role.role
            );
        }
        if role.system_prompt.trim().is_empty() {
            anyhow::bail!("role '{key}' has an empty system_prompt");
        }
        if role.model_endpoints.is_empty() {
            anyhow::bail!("role '{key}' declares no model_endpoints");
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_role(role: &str) -> RoleConfig {
        RoleConfig {
            role: role.to_string(),
            system_prompt: "be helpful".into(),
            model_endpoints: vec![ModelEndpoint {
                model: "gpt-4o".into(),
                endpoint: "http://localhost:8080".into(),
            }],
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout_seconds(),
            allowed_tools: None,
            default_git_branch: None,
        }
    }

    #[test]
    fn allows_tool_defaults_to_true_with_no_allowlist() {
        let r = sample_role("developer");
        assert!(r.allows_tool("read_file"));
    }

    #[test]
    fn allows_tool_respects_explicit_allowlist() {
        let mut r = sample_role("developer");
        r.allowed_tools = Some(["read_file".to_string()].into_iter().collect());
        assert!(r.allows_tool("read_file"));
        assert!(!r.allows_tool("write_file"));
    }

    #[test]
    fn validate_rejects_mismatched_role_key() {
        let mut cfg = RolesConfig::new();
        cfg.insert("developer".into(), sample_role("auditor"));
        assert!(validate_roles_config(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_empty_system_prompt() {
        let mut cfg = RolesConfig::new();
        let mut r = sample_role("developer");
        r.system_prompt = "   ".into();
        cfg.insert("developer".into(), r);
        assert!(validate_roles_config(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_no_endpoints() {
        let mut cfg = RolesConfig::new();
        let mut r = sample_role("developer");
        r.model_endpoints.clear();
        cfg.insert("developer".into(), r);
        assert!(validate_roles_config(&cfg).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        let mut cfg = RolesConfig::new();
        cfg.insert("developer".into(), sample_role("developer"));
        cfg.insert("auditor".into(), sample_role("auditor"));
        assert!(validate_roles_config(&cfg).is_ok());
    }

    #[test]
    fn max_tokens_default_is_unbounded_sentinel() {
        assert_eq!(default_max_tokens(), -1);
    }

    #[test]
    fn role_config_json_round_trip() {
        let r = sample_role("manager");
        let json = serde_json::to_string(&r).unwrap();
        let back: RoleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, "manager");
        assert_eq!(back.model_endpoints, r.model_endpoints);
    }

    #[test]
    fn role_config_yaml_omits_optional_defaults() {
        let yaml = "role: auditor\nsystem_prompt: audit things\nmodel_endpoints:\n  - model: gpt-4o\n    endpoint: http://x\n";
        let r: RoleConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(r.temperature, 0.7);
        assert_eq!(r.max_tokens, -1);
        assert_eq!(r.timeout_seconds, 120);
        assert!(r.allowed_tools.is_none());
    }
}
