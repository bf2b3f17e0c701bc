// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Communications core: the channel abstraction, resilience primitives, and
//! the endpoint wire format shared by every agent.

pub mod channel;
pub mod resilience;
pub mod sanitize;
mod types;

pub use channel::{Channel, ChannelFactory, ReplaySource, SharedResilience, Ticks};
pub use resilience::{
    CircuitBreaker, CircuitBreakerState, ConnectionPool, CorrelationId, MessageBus, Metrics,
    MetricsSummary, RateLimiter, RetryPolicy,
};
pub use sanitize::{sanitize_input, sanitize_output, strip_reasoning_blocks};
pub use types::{
    AssistantMessage, Choice, CompletionRequest, CompletionResponse, EventData, Message,
    RawFunctionCall, RawToolCall, ResponseItem, Role, ToolCall, ToolChoice, ToolSchema,
};
