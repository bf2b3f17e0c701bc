// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::event_log::EventRecord;

fn format_session_id(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S%3f").to_string()
}

/// One end-to-end run: a timestamped directory under a shared root holding
/// the append-only event log and every per-query trace file produced by the
/// agents that took part.
///
/// A session opened via [`Session::latest_session`] is read-only: every
/// mutating method becomes a no-op, matching replay mode where the
/// filesystem must not be touched.
pub struct Session {
    pub id: String,
    pub dir: PathBuf,
    read_only: bool,
}

impl Session {
    /// Create a fresh session directory under `shared_dir`, named from the
    /// current wall-clock time. Never overwrites an existing directory —
    /// collisions (two sessions created in the same millisecond) surface as
    /// an error rather than silently merging.
    pub async fn new_session(shared_dir: &Path) -> Result<Self> {
        fs::create_dir_all(shared_dir)
            .await
            .with_context(|| format!("creating {}", shared_dir.display()))?;
        let id = format_session_id(Utc::now());
        let dir = shared_dir.join(&id);
        fs::create_dir(&dir)
            .await
            .with_context(|| format!("creating session dir {}", dir.display()))?;
        debug!(session = %id, "created session");
        Ok(Self { id, dir, read_only: false })
    }

    /// Open the lexicographically greatest existing session subdirectory —
    /// the fixed-width timestamp format makes lexicographic order match
    /// chronological order — in read-only mode, for replay.
    pub async fn latest_session(shared_dir: &Path) -> Result<Self> {
        let mut entries = fs::read_dir(shared_dir)
            .await
            .with_context(|| format!("reading {}", shared_dir.display()))?;
        let mut best: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if best.as_deref().map_or(true, |b| name > b) {
                        best = Some(name.to_string());
                    }
                }
            }
        }
        let id = best.ok_or_else(|| {
            anyhow::anyhow!("no sessions found under {}", shared_dir.display())
        })?;
        let dir = shared_dir.join(&id);
        Ok(Self { id, dir, read_only: true })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join("_events.jsonl")
    }

    pub fn edit_log_path(&self) -> PathBuf {
        self.dir.join("edit_log.json")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.dir.join("audit_log.json")
    }

    fn query_file_path(&self, agent: &str, ticks: u64) -> PathBuf {
        self.dir.join(format!("{agent}_{ticks}.txt"))
    }

    /// Append one event to `_events.jsonl`. No-op in read-only (replay) mode.
    pub async fn record_event(&self, event_type: &str, data: Value) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let record = EventRecord { timestamp: Utc::now(), event_type: event_type.to_string(), data };
        let line = serde_json::to_string(&record)?;
        let mut f = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.events_path())
            .await?;
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        Ok(())
    }

    /// Read every event, optionally filtered by type. Tolerates a crashed
    /// writer's partial trailing line and unrecognised `type` values.
    pub async fn get_events(&self, event_type: Option<&str>) -> Result<Vec<EventRecord>> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&path).await?;
        let mut out = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_str::<EventRecord>(line) else { continue };
            if event_type.map_or(true, |t| record.event_type == t) {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Write the query half of a per-query trace file. A retry of the same
    /// query reuses the same `ticks` and calls this exactly once; only
    /// [`Session::append_response_file`] may run more than once per `ticks`
    /// in that case (never — the file ends up with one response block, the
    /// final successful one).
    pub async fn create_query_file(
        &self,
        agent: &str,
        ticks: u64,
        ts: DateTime<Utc>,
        payload: &Value,
    ) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let indented = indent_json(payload)?;
        let block = format!("QUERY_TIMESTAMP: {}\nPAYLOAD:\n{indented}\n", ts.to_rfc3339());
        fs::write(self.query_file_path(agent, ticks), block).await?;
        Ok(())
    }

    /// Append the response half. `raw_message` is the full wire response,
    /// serialized verbatim so a later replay run can reconstruct it exactly;
    /// `parsed_result` is the extracted text shown in the human-readable trace.
    pub async fn append_response_file(
        &self,
        agent: &str,
        ticks: u64,
        ts: DateTime<Utc>,
        raw_message: &Value,
        parsed_result: &str,
    ) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let indented = indent_json(raw_message)?;
        let block = format!(
            "\nRESPONSE_TIMESTAMP: {}\nRESPONSE:\nRAW_MESSAGE:\n{indented}\n\nPARSED_RESULT:\n{parsed_result}\n",
            ts.to_rfc3339()
        );
        let path = self.query_file_path(agent, ticks);
        let mut f = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("response for {agent}_{ticks} has no query file at {}", path.display()))?;
        f.write_all(block.as_bytes()).await?;
        Ok(())
    }

    /// Every recorded response for `agent`, in the order they were produced
    /// (ticks order), as `(response_timestamp, raw_message)` pairs — the
    /// shape a replay data loader consumes to serve completions back in
    /// sequence. Files with no response block (a crash mid-call) are skipped.
    pub async fn get_recorded_outputs_in_order(&self, agent: &str) -> Result<Vec<(DateTime<Utc>, Value)>> {
        let prefix = format!("{agent}_");
        let mut files: Vec<(u64, PathBuf)> = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(rest) = name.strip_prefix(&prefix).and_then(|r| r.strip_suffix(".txt")) {
                if let Ok(ticks) = rest.parse::<u64>() {
                    files.push((ticks, entry.path()));
                }
            }
        }
        files.sort_by_key(|(t, _)| *t);
        let mut out = Vec::new();
        for (_, path) in files {
            let text = fs::read_to_string(&path).await?;
            if let Some(parsed) = parse_response_block(&text) {
                out.push(parsed);
            }
        }
        Ok(out)
    }
}

fn indent_json(value: &Value) -> Result<String> {
    let pretty = serde_json::to_string_pretty(value)?;
    Ok(pretty.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n"))
}

fn dedent(block: &str) -> String {
    block.lines().map(|l| l.strip_prefix("  ").unwrap_or(l)).collect::<Vec<_>>().join("\n")
}

/// Parse the response half of a per-query trace file back into
/// `(timestamp, raw_message)`. Returns `None` for a file that only has a
/// query block.
fn parse_response_block(text: &str) -> Option<(DateTime<Utc>, Value)> {
    let ts_line = text.lines().find(|l| l.starts_with("RESPONSE_TIMESTAMP: "))?;
    let ts = DateTime::parse_from_rfc3339(ts_line.trim_start_matches("RESPONSE_TIMESTAMP: ").trim())
        .ok()?
        .with_timezone(&Utc);
    let after_raw = text.split("RAW_MESSAGE:\n").nth(1)?;
    let json_block = after_raw.split("\n\nPARSED_RESULT:").next()?;
    let value: Value = serde_json::from_str(&dedent(json_block)).ok()?;
    Some((ts, value))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
