// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs;

/// Tracks which files an agent has edited and which a subsequent auditor has
/// reviewed. A task is only complete once every edited file has been audited
/// strictly after its last edit — an audit with an equal timestamp does not
/// count, since it can't have observed the edit.
#[derive(Debug, Default, Clone)]
pub struct AuditLedger {
    edit_log: HashMap<String, DateTime<Utc>>,
    audit_log: HashMap<String, DateTime<Utc>>,
}

impl AuditLedger {
    pub async fn load(edit_log_path: &Path, audit_log_path: &Path) -> Result<Self> {
        Ok(Self {
            edit_log: load_map(edit_log_path).await?,
            audit_log: load_map(audit_log_path).await?,
        })
    }

    pub fn edit_log(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.edit_log
    }

    pub fn audit_log(&self) -> &HashMap<String, DateTime<Utc>> {
        &self.audit_log
    }

    pub async fn record_edit(&mut self, path: impl Into<String>, edit_log_path: &Path) -> Result<()> {
        self.edit_log.insert(path.into(), Utc::now());
        save_map(edit_log_path, &self.edit_log).await
    }

    pub async fn record_audit(&mut self, path: impl Into<String>, audit_log_path: &Path) -> Result<()> {
        self.audit_log.insert(path.into(), Utc::now());
        save_map(audit_log_path, &self.audit_log).await
    }

    /// True iff every edited file has been audited strictly after its last edit.
    pub fn is_task_complete(&self) -> bool {
        self.edit_log
            .iter()
            .all(|(path, edited_at)| self.audit_log.get(path).is_some_and(|audited_at| audited_at > edited_at))
    }

    /// Edited files with no audit, or whose most recent audit is not strictly
    /// newer than the edit — sorted for deterministic output.
    pub fn unaudited_files(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .edit_log
            .iter()
            .filter(|(path, edited_at)| {
                self.audit_log.get(path.as_str()).map_or(true, |audited_at| audited_at <= *edited_at)
            })
            .map(|(path, _)| path.clone())
            .collect();
        out.sort();
        out
    }
}

async fn load_map(path: &Path) -> Result<HashMap<String, DateTime<Utc>>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let text = fs::read_to_string(path).await.with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn save_map(path: &Path, map: &HashMap<String, DateTime<Utc>>) -> Result<()> {
    let text = serde_json::to_string_pretty(map)?;
    fs::write(path, text).await.with_context(|| format!("writing {}", path.display()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
