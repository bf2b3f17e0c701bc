// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The [`Channel`] abstraction every agent holds: a live HTTP channel backed
//! by the resilience primitives, and a replay channel that serves
//! pre-recorded responses in place of a real endpoint.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::resilience::{CircuitBreaker, ConnectionPool, CorrelationId, Metrics, RateLimiter, RetryPolicy};
use crate::types::CompletionRequest;
use crate::CompletionResponse;

/// A per-query identifier derived from wall-clock milliseconds, correlating
/// a request with its eventual response record.
pub type Ticks = u64;

fn now_ticks() -> Ticks {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Transport an agent uses to reach a language-model endpoint. `send` queues
/// the outgoing payload and returns its `ticks`; `receive` blocks until the
/// matching response is available.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, request: CompletionRequest) -> anyhow::Result<Ticks>;
    async fn receive(&self, ticks: Ticks, correlation: CorrelationId) -> anyhow::Result<CompletionResponse>;
}

/// Supplies pre-recorded completions for replay mode, one agent at a time,
/// in the order they were originally recorded. Implemented by the session
/// crate's replay-data loader; kept as a trait here so this crate has no
/// dependency on session filesystem layout.
pub trait ReplaySource: Send + Sync {
    fn next_response(&self, agent_name: &str) -> Option<CompletionResponse>;
}

// ── Live channel ──────────────────────────────────────────────────────────────

/// Shared resilience state a [`ChannelFactory`] may hand out to every live
/// channel it builds, or construct fresh per channel.
pub struct SharedResilience {
    pub pool: Arc<ConnectionPool>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub metrics: Arc<Metrics>,
    pub retry: RetryPolicy,
}

pub struct LiveChannel {
    endpoint: String,
    queue: Mutex<VecDeque<(Ticks, CompletionRequest)>>,
    shared: Arc<SharedResilience>,
}

impl LiveChannel {
    pub fn new(endpoint: impl Into<String>, shared: Arc<SharedResilience>) -> Self {
        Self { endpoint: endpoint.into(), queue: Mutex::new(VecDeque::new()), shared }
    }
}

#[async_trait]
impl Channel for LiveChannel {
    async fn send(&self, request: CompletionRequest) -> anyhow::Result<Ticks> {
        let ticks = now_ticks();
        self.queue.lock().await.push_back((ticks, request));
        Ok(ticks)
    }

    #[instrument(skip(self), fields(correlation = %correlation, endpoint = %self.endpoint))]
    async fn receive(&self, ticks: Ticks, correlation: CorrelationId) -> anyhow::Result<CompletionResponse> {
        let request = {
            let mut queue = self.queue.lock().await;
            let idx = queue
                .iter()
                .position(|(t, _)| *t == ticks)
                .ok_or_else(|| anyhow::anyhow!("no queued request for ticks {ticks}"))?;
            queue.remove(idx).map(|(_, r)| r).expect("index just located")
        };

        if self.shared.breaker.is_open().await {
            anyhow::bail!("circuit breaker open for endpoint {}", self.endpoint);
        }
        self.shared.rate_limiter.acquire(1.0).await?;

        let client = self.shared.pool.client().await?;
        let endpoint = self.endpoint.clone();
        let start = std::time::Instant::now();

        let result = crate::resilience::retry_with_backoff(&self.shared.retry, || {
            let client = client.clone();
            let endpoint = endpoint.clone();
            let request = &request;
            async move { client.post(&endpoint).json(request).send().await }
        })
        .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.shared.breaker.record_failure().await;
                self.shared.metrics.record_failure("transport", start.elapsed()).await;
                warn!(error = %e, "channel request failed");
                return Err(e);
            }
        };

        let status = response.status();
        let parsed = match response.error_for_status_ref() {
            Ok(_) => response.json::<CompletionResponse>().await,
            Err(e) => {
                self.shared.breaker.record_failure().await;
                self.shared.metrics.record_failure("http_status", start.elapsed()).await;
                return Err(e.into());
            }
        };

        match parsed {
            Ok(completion) => {
                self.shared.breaker.record_success().await;
                self.shared.metrics.record_success(status.as_u16(), start.elapsed()).await;
                Ok(completion)
            }
            Err(e) => {
                self.shared.breaker.record_failure().await;
                self.shared.metrics.record_failure("parse", start.elapsed()).await;
                Err(e.into())
            }
        }
    }
}

// ── Replay channel ────────────────────────────────────────────────────────────

/// Serves pre-recorded responses for one agent. `send` just records a
/// `ticks`; `receive` pulls the next recorded output regardless of what was
/// "sent", matching the teacher's record-and-replay intent rather than a
/// real request/response pairing.
pub struct ReplayChannel {
    agent_name: String,
    source: Arc<dyn ReplaySource>,
    pending: Mutex<VecDeque<Ticks>>,
}

impl ReplayChannel {
    pub fn new(agent_name: impl Into<String>, source: Arc<dyn ReplaySource>) -> Self {
        Self { agent_name: agent_name.into(), source, pending: Mutex::new(VecDeque::new()) }
    }
}

#[async_trait]
impl Channel for ReplayChannel {
    async fn send(&self, _request: CompletionRequest) -> anyhow::Result<Ticks> {
        let ticks = now_ticks();
        self.pending.lock().await.push_back(ticks);
        Ok(ticks)
    }

    async fn receive(&self, ticks: Ticks, _correlation: CorrelationId) -> anyhow::Result<CompletionResponse> {
        {
            let mut pending = self.pending.lock().await;
            let idx = pending
                .iter()
                .position(|t| *t == ticks)
                .ok_or_else(|| anyhow::anyhow!("no pending replay entry for ticks {ticks}"))?;
            pending.remove(idx);
        }
        self.source
            .next_response(&self.agent_name)
            .ok_or_else(|| anyhow::anyhow!("replay source exhausted for agent {}", self.agent_name))
    }
}

// ── Factory ───────────────────────────────────────────────────────────────────

pub enum ChannelFactory {
    Live { shared: Arc<SharedResilience> },
    Replay { source: Arc<dyn ReplaySource> },
}

impl ChannelFactory {
    pub fn live(shared: Arc<SharedResilience>) -> Self {
        ChannelFactory::Live { shared }
    }

    pub fn replay(source: Arc<dyn ReplaySource>) -> Self {
        ChannelFactory::Replay { source }
    }

    /// Builds the channel a single agent will hold for its lifetime.
    pub fn build(&self, agent_name: &str, endpoint: &str) -> Arc<dyn Channel> {
        match self {
            ChannelFactory::Live { shared } => Arc::new(LiveChannel::new(endpoint, shared.clone())),
            ChannelFactory::Replay { source } => Arc::new(ReplayChannel::new(agent_name, source.clone())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Choice, AssistantMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        responses: Vec<CompletionResponse>,
        cursor: AtomicUsize,
    }

    impl ReplaySource for FixedSource {
        fn next_response(&self, _agent_name: &str) -> Option<CompletionResponse> {
            let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.responses.get(idx).cloned()
        }
    }

    fn text_response(s: &str) -> CompletionResponse {
        CompletionResponse::ChatCompletions {
            choices: vec![Choice { message: AssistantMessage { content: Some(s.to_string()), tool_calls: None } }],
        }
    }

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![],
            model: "gpt-4o".into(),
            temperature: 0.2,
            max_tokens: -1,
            tools: vec![],
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn replay_channel_serves_responses_in_order() {
        let source = Arc::new(FixedSource {
            responses: vec![text_response("first"), text_response("second")],
            cursor: AtomicUsize::new(0),
        });
        let channel = ReplayChannel::new("developer", source);
        let t1 = channel.send(sample_request()).await.unwrap();
        let r1 = channel.receive(t1, CorrelationId::new()).await.unwrap();
        assert_eq!(r1.extract().0, "first");

        let t2 = channel.send(sample_request()).await.unwrap();
        let r2 = channel.receive(t2, CorrelationId::new()).await.unwrap();
        assert_eq!(r2.extract().0, "second");
    }

    #[tokio::test]
    async fn replay_channel_errors_when_exhausted() {
        let source = Arc::new(FixedSource { responses: vec![], cursor: AtomicUsize::new(0) });
        let channel = ReplayChannel::new("developer", source);
        let t1 = channel.send(sample_request()).await.unwrap();
        assert!(channel.receive(t1, CorrelationId::new()).await.is_err());
    }

    #[tokio::test]
    async fn replay_channel_rejects_unknown_ticks() {
        let source = Arc::new(FixedSource { responses: vec![], cursor: AtomicUsize::new(0) });
        let channel = ReplayChannel::new("developer", source);
        assert!(channel.receive(999, CorrelationId::new()).await.is_err());
    }

    #[tokio::test]
    async fn live_channel_fails_fast_when_breaker_open() {
        let shared = Arc::new(SharedResilience {
            pool: Arc::new(ConnectionPool::default()),
            rate_limiter: Arc::new(RateLimiter::new(10.0)),
            breaker: Arc::new(CircuitBreaker::new(1, std::time::Duration::from_secs(60))),
            metrics: Arc::new(Metrics::new()),
            retry: RetryPolicy::default(),
        });
        shared.breaker.record_failure().await;
        let channel = LiveChannel::new("http://127.0.0.1:1", shared);
        let ticks = channel.send(sample_request()).await.unwrap();
        let result = channel.receive(ticks, CorrelationId::new()).await;
        assert!(result.is_err());
    }
}
