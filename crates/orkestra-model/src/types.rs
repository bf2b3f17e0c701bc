// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a conversation. `role` covers the classic chat-completions
/// shape; `FunctionCallOutput` covers the alternate response-style API.
/// An assistant message carrying `tool_calls` must keep that list unchanged
/// until every entry has a matching reply appended after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Chat {
        role: Role,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
    FunctionCallOutput {
        #[serde(rename = "type")]
        kind: FunctionCallOutputTag,
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCallOutputTag {
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::Chat { role: Role::System, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Message::Chat { role: Role::User, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Chat { role: Role::Assistant, content: content.into(), tool_calls: None, tool_call_id: None }
    }
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Message::Chat { role: Role::Assistant, content: content.into(), tool_calls: Some(calls), tool_call_id: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Chat {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Message::FunctionCallOutput {
            kind: FunctionCallOutputTag::FunctionCallOutput,
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    pub fn content_len(&self) -> usize {
        match self {
            Message::Chat { content, .. } => content.len(),
            Message::FunctionCallOutput { output, .. } => output.len(),
        }
    }

    pub fn tool_calls(&self) -> Option<&[ToolCall]> {
        match self {
            Message::Chat { tool_calls: Some(tc), .. } => Some(tc),
            _ => None,
        }
    }

    pub fn is_assistant_with_tool_calls(&self) -> bool {
        matches!(self, Message::Chat { role: Role::Assistant, tool_calls: Some(tc), .. } if !tc.is_empty())
    }
}

/// A function/tool invocation as returned inline on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments: Value,
}

/// A JSON-schema tool descriptor sent to the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// The request payload POSTed to an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// The two response shapes an endpoint may answer with.
///
/// `Serialize` is derived alongside `Deserialize` so a received response can
/// be written back out verbatim into a session's per-query trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionResponse {
    ChatCompletions { choices: Vec<Choice> },
    ResponseStyle { output: Vec<ResponseItem> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawToolCall {
    pub id: String,
    pub function: RawFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFunctionCall {
    pub name: String,
    /// Arguments arrive as a JSON-encoded string in the classic wire format.
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message { content: String },
    FunctionCall { call_id: String, name: String, arguments: String },
}

impl CompletionResponse {
    /// Extract `(text, tool_calls)` uniformly across both response shapes.
    pub fn extract(&self) -> (String, Vec<ToolCall>) {
        match self {
            CompletionResponse::ChatCompletions { choices } => {
                let Some(choice) = choices.first() else {
                    return (String::new(), Vec::new());
                };
                let text = choice.message.content.clone().unwrap_or_default();
                let calls = choice
                    .message
                    .tool_calls
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| ToolCall {
                        id: c.id,
                        function_name: c.function.name,
                        arguments: serde_json::from_str(&c.function.arguments)
                            .unwrap_or(Value::Object(Default::default())),
                    })
                    .collect();
                (text, calls)
            }
            CompletionResponse::ResponseStyle { output } => {
                let mut text = String::new();
                let mut calls = Vec::new();
                for item in output {
                    match item {
                        ResponseItem::Message { content } => text.push_str(content),
                        ResponseItem::FunctionCall { call_id, name, arguments } => {
                            calls.push(ToolCall {
                                id: call_id.clone(),
                                function_name: name.clone(),
                                arguments: serde_json::from_str(arguments)
                                    .unwrap_or(Value::Object(Default::default())),
                            });
                        }
                    }
                }
                (text, calls)
            }
        }
    }
}

/// Arbitrary key/value payload forwarded into event-log `data` maps.
pub type EventData = HashMap<String, Value>;

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_chat_completions_text_only() {
        let resp = CompletionResponse::ChatCompletions {
            choices: vec![Choice {
                message: AssistantMessage { content: Some("hi".into()), tool_calls: None },
            }],
        };
        let (text, calls) = resp.extract();
        assert_eq!(text, "hi");
        assert!(calls.is_empty());
    }

    #[test]
    fn extract_chat_completions_with_tool_call() {
        let resp = CompletionResponse::ChatCompletions {
            choices: vec![Choice {
                message: AssistantMessage {
                    content: None,
                    tool_calls: Some(vec![RawToolCall {
                        id: "1".into(),
                        function: RawFunctionCall { name: "read_file".into(), arguments: "{\"path\":\"a.txt\"}".into() },
                    }]),
                },
            }],
        };
        let (text, calls) = resp.extract();
        assert_eq!(text, "");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "read_file");
        assert_eq!(calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn extract_response_style_mixes_text_and_calls() {
        let resp = CompletionResponse::ResponseStyle {
            output: vec![
                ResponseItem::Message { content: "thinking...".into() },
                ResponseItem::FunctionCall {
                    call_id: "c1".into(),
                    name: "write_file".into(),
                    arguments: "{}".into(),
                },
            ],
        };
        let (text, calls) = resp.extract();
        assert_eq!(text, "thinking...");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
    }

    #[test]
    fn assistant_with_tool_calls_is_detected() {
        let m = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall { id: "1".into(), function_name: "read_file".into(), arguments: Value::Null }],
        );
        assert!(m.is_assistant_with_tool_calls());
        assert!(!Message::assistant("plain").is_assistant_with_tool_calls());
    }

    #[test]
    fn content_len_covers_both_message_variants() {
        assert_eq!(Message::user("abcd").content_len(), 4);
        assert_eq!(Message::function_call_output("c1", "abc").content_len(), 3);
    }
}
