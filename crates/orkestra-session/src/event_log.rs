// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the append-only event log. `data` is an arbitrary JSON object;
/// readers must tolerate `event_type` values they don't recognise, since a
/// replay session may have been recorded by a newer build of this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
