// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The single-shot agent: one `(system, user)` call through a channel, with
//! failover across the role's configured `(model, endpoint)` list and
//! retries on timeout. Does not parse or execute tool calls — that is the
//! agentic loop's job, built on top of [`Agent::execute_task`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orkestra_config::{ModelEndpoint, RoleConfig};
use orkestra_model::channel::{Channel, ChannelFactory, Ticks};
use orkestra_model::resilience::CorrelationId;
use orkestra_model::{CompletionRequest, Message};
use orkestra_session::Session;
use orkestra_tools::ToolSchema;

use crate::dispatch::adapt_schemas;
use crate::prompts::augmented_system_prompt;

const MAX_RETRIES: u32 = 3;
const INITIAL_TIMEOUT_MULTIPLIER: f64 = 1.5;
const BACKOFF_MULTIPLIER: f64 = 2.0;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

fn session_ticks() -> Ticks {
    Utc::now().timestamp_millis().max(0) as u64
}

/// One configured agent binding: name, failover channel list, assembled
/// system prompt, and the session it records its query/response files into.
pub struct Agent {
    pub name: String,
    pub role: String,
    channels: Vec<(ModelEndpoint, Arc<dyn Channel>)>,
    system_prompt: String,
    temperature: f32,
    max_tokens: i64,
    timeout_seconds: u64,
    session: Arc<Session>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        role_config: &RoleConfig,
        channel_factory: &ChannelFactory,
        tool_schemas: &[ToolSchema],
        in_git_repo: bool,
        session: Arc<Session>,
    ) -> Self {
        let name = name.into();
        let channels = role_config
            .model_endpoints
            .iter()
            .map(|me| (me.clone(), channel_factory.build(&name, &me.endpoint)))
            .collect();
        let system_prompt = augmented_system_prompt(&role_config.system_prompt, tool_schemas, &role_config.role, in_git_repo);
        Self {
            name,
            role: role_config.role.clone(),
            channels,
            system_prompt,
            temperature: role_config.temperature,
            max_tokens: role_config.max_tokens,
            timeout_seconds: role_config.timeout_seconds,
            session,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Runs one `(system, user)` call with retry/failover, recording exactly
    /// one query file and one response block under the same `ticks` no
    /// matter how many attempts it took. Returns the extracted response text.
    pub async fn execute_task(&self, user_prompt: &str) -> anyhow::Result<String> {
        let messages = vec![Message::system(self.system_prompt.clone()), Message::user(user_prompt.to_string())];
        let response = self.complete_with_retry(&messages, Vec::new(), None).await?;
        Ok(response.extract().0)
    }

    /// The agentic loop's lower-level entry point: a single call carrying
    /// the full running history plus a tool schema list and tool-choice
    /// override, with the same retry/failover/trace-recording behavior as
    /// [`Self::execute_task`].
    pub async fn complete_with_retry(
        &self,
        messages: &[Message],
        tools: Vec<ToolSchema>,
        tool_choice: Option<orkestra_model::ToolChoice>,
    ) -> anyhow::Result<orkestra_model::CompletionResponse> {
        anyhow::ensure!(!self.channels.is_empty(), "agent '{}' has no configured model_endpoints", self.name);

        let ticks = session_ticks();
        let query_ts = Utc::now();
        let query_payload = serde_json::json!({
            "messages": messages,
            "model_endpoints": self.channels.iter().map(|(e, _)| e).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        self.session.create_query_file(&self.name, ticks, query_ts, &query_payload).await?;

        let mut timeout = Duration::from_secs(self.timeout_seconds.max(1));
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff = backoff.mul_f64(BACKOFF_MULTIPLIER);
            }

            let (endpoint, channel) = &self.channels[(attempt as usize).min(self.channels.len() - 1)];
            let request = CompletionRequest {
                messages: messages.to_vec(),
                model: endpoint.model.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: adapt_schemas(&tools),
                tool_choice,
            };

            let attempt_result = tokio::time::timeout(timeout, self.send_and_receive(channel.as_ref(), request)).await;
            match attempt_result {
                Ok(Ok(response)) => {
                    let (text, _) = response.extract();
                    let raw = serde_json::to_value(&response)?;
                    self.session.append_response_file(&self.name, ticks, Utc::now(), &raw, &text).await?;
                    return Ok(response);
                }
                Ok(Err(e)) => last_err = Some(e),
                Err(_) => last_err = Some(anyhow::anyhow!("timed out after {:?} on attempt {attempt}", timeout)),
            }
            timeout = timeout.mul_f64(INITIAL_TIMEOUT_MULTIPLIER);
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("execute_task exhausted retries for agent '{}'", self.name)))
    }

    async fn send_and_receive(
        &self,
        channel: &dyn Channel,
        request: CompletionRequest,
    ) -> anyhow::Result<orkestra_model::CompletionResponse> {
        let correlation = CorrelationId::new();
        let ticks = channel.send(request).await?;
        channel.receive(ticks, correlation).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
