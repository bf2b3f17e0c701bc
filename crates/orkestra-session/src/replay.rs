// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use orkestra_model::{CompletionResponse, ReplaySource};

use crate::fs_session::Session;

/// Feeds a replay [`Channel`](orkestra_model::Channel) from a session's
/// recorded per-query trace files: every agent's recorded outputs are
/// pre-loaded once at construction, then served back one at a time through
/// a per-agent cursor, in the order they were originally produced.
pub struct SessionReplaySource {
    responses: HashMap<String, Vec<CompletionResponse>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl SessionReplaySource {
    /// Pre-load every named agent's recorded outputs from `session`'s
    /// per-query trace files. Agents with no recorded files simply replay
    /// nothing (their `next_response` always returns `None`).
    pub async fn load(session: &Session, agent_names: &[String]) -> anyhow::Result<Self> {
        let mut responses = HashMap::new();
        for name in agent_names {
            let recorded = session.get_recorded_outputs_in_order(name).await?;
            let parsed = recorded
                .into_iter()
                .filter_map(|(_, raw)| serde_json::from_value::<CompletionResponse>(raw).ok())
                .collect();
            responses.insert(name.clone(), parsed);
        }
        Ok(Self { responses, cursors: Mutex::new(HashMap::new()) })
    }
}

impl ReplaySource for SessionReplaySource {
    fn next_response(&self, agent_name: &str) -> Option<CompletionResponse> {
        let list = self.responses.get(agent_name)?;
        let mut cursors = self.cursors.lock().expect("replay cursor lock poisoned");
        let idx = cursors.entry(agent_name.to_string()).or_insert(0);
        let item = list.get(*idx)?.clone();
        *idx += 1;
        Some(item)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn serves_recorded_responses_in_order_per_agent() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new_session(root.path()).await.unwrap();
        for (ticks, text) in [(1u64, "first"), (2, "second")] {
            let raw = json!({"choices": [{"message": {"content": text}}]});
            session.create_query_file("developer01", ticks, Utc::now(), &json!({})).await.unwrap();
            session.append_response_file("developer01", ticks, Utc::now(), &raw, text).await.unwrap();
        }

        let source = SessionReplaySource::load(&session, &["developer01".to_string()]).await.unwrap();
        let r1 = source.next_response("developer01").unwrap();
        assert_eq!(r1.extract().0, "first");
        let r2 = source.next_response("developer01").unwrap();
        assert_eq!(r2.extract().0, "second");
        assert!(source.next_response("developer01").is_none());
    }

    #[tokio::test]
    async fn unknown_agent_has_no_recorded_output() {
        let root = tempfile::tempdir().unwrap();
        let session = Session::new_session(root.path()).await.unwrap();
        let source = SessionReplaySource::load(&session, &[]).await.unwrap();
        assert!(source.next_response("nobody").is_none());
    }
}
