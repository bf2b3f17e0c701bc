// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Response sanitization: message-shape validation and truncation on the
//! way into an endpoint, truncation and cleanup on the way back out.

use crate::types::Message;

/// Outbound messages are capped at this many characters of content; longer
/// content is truncated before the request is ever serialized.
pub const MAX_INPUT_CHARS: usize = 10_000;

/// Inbound completion text is capped at this many characters.
pub const MAX_OUTPUT_CHARS: usize = 50_000;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Validates shape (role + content both present, which the [`Message`] type
/// already guarantees at the type level) and truncates oversized content to
/// [`MAX_INPUT_CHARS`]. Returns the same message, content truncated in place.
pub fn sanitize_input(message: Message) -> Message {
    match message {
        Message::Chat { role, content, tool_calls, tool_call_id } => Message::Chat {
            role,
            content: truncate_chars(&content, MAX_INPUT_CHARS),
            tool_calls,
            tool_call_id,
        },
        Message::FunctionCallOutput { kind, call_id, output } => {
            Message::FunctionCallOutput { kind, call_id, output: truncate_chars(&output, MAX_INPUT_CHARS) }
        }
    }
}

/// Truncates to [`MAX_OUTPUT_CHARS`] and strips embedded null bytes, then
/// trims leading/trailing whitespace, mirroring `str.strip()`.
pub fn sanitize_output(text: &str) -> String {
    let truncated = truncate_chars(text, MAX_OUTPUT_CHARS);
    let no_nulls: String = truncated.chars().filter(|&c| c != '\0').collect();
    no_nulls.trim().to_string()
}

/// Optional post-processing strategy: removes every `<think>...</think>`
/// block (reasoning the model was not asked to surface) before the text
/// reaches the session transcript. Unterminated blocks are dropped to end
/// of string rather than left dangling.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find(THINK_OPEN) {
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + THINK_OPEN.len()..];
                match after_open.find(THINK_CLOSE) {
                    Some(end) => rest = &after_open[end + THINK_CLOSE.len()..],
                    None => return out,
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_input_truncates_long_content() {
        let long = "a".repeat(MAX_INPUT_CHARS + 500);
        let msg = sanitize_input(Message::user(long));
        assert_eq!(msg.content_len(), MAX_INPUT_CHARS);
    }

    #[test]
    fn sanitize_input_leaves_short_content_untouched() {
        let msg = sanitize_input(Message::user("hello"));
        assert_eq!(msg.content_len(), 5);
    }

    #[test]
    fn sanitize_output_truncates_and_trims() {
        let long = format!("  {}  ", "b".repeat(MAX_OUTPUT_CHARS + 10));
        let out = sanitize_output(&long);
        assert_eq!(out.chars().count(), MAX_OUTPUT_CHARS);
    }

    #[test]
    fn sanitize_output_strips_null_bytes() {
        let out = sanitize_output("hello\0world");
        assert_eq!(out, "helloworld");
    }

    #[test]
    fn sanitize_output_trims_whitespace() {
        assert_eq!(sanitize_output("  hi there  \n"), "hi there");
    }

    #[test]
    fn strip_reasoning_blocks_removes_single_block() {
        let text = "before<think>secret reasoning</think>after";
        assert_eq!(strip_reasoning_blocks(text), "beforeafter");
    }

    #[test]
    fn strip_reasoning_blocks_removes_multiple_blocks() {
        let text = "a<think>x</think>b<think>y</think>c";
        assert_eq!(strip_reasoning_blocks(text), "abc");
    }

    #[test]
    fn strip_reasoning_blocks_drops_unterminated_block_to_end() {
        let text = "keep this<think>never closes";
        assert_eq!(strip_reasoning_blocks(text), "keep this");
    }

    #[test]
    fn strip_reasoning_blocks_noop_without_markers() {
        assert_eq!(strip_reasoning_blocks("plain text"), "plain text");
    }
}
