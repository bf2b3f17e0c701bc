// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Context management for the agentic loop: deterministic, content-aware
//! tool-result truncation and history trimming when the running transcript
//! grows past its character budget.

use orkestra_model::Message;
use orkestra_tools::OutputCategory;

/// Total character budget for one agentic loop's conversation history.
/// Crossing this triggers [`trim_history`] before the next model call.
pub const MAX_CONTEXT_CHARS: usize = 40_000;

/// Deterministic, content-aware tool-result truncation.
///
/// Returns `content` unchanged when it fits within `cap_chars`. Otherwise
/// applies a category-specific extraction strategy that preserves the most
/// useful portion of the output, dispatching on [`OutputCategory`] (not tool
/// names) so this stays independent of the concrete tool list.
///
/// - [`OutputCategory::HeadTail`]: keep the first 60 + last 40 lines so both
///   the command preamble and the final result are visible.
/// - [`OutputCategory::MatchList`]: keep leading matches (highest relevance
///   first); the tail isn't preserved since later matches rank lower.
/// - [`OutputCategory::FileContent`]: balanced head + tail with a separator,
///   preserving both the top of the file and its most recent lines.
/// - [`OutputCategory::Generic`]: hard-truncate at the nearest line boundary.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_chars: usize) -> String {
    if cap_chars == 0 || content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                 use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                 use read_file with an offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

/// Total character footprint of a message list (sum of each message's
/// content length) — the quantity [`MAX_CONTEXT_CHARS`] bounds.
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::content_len).sum()
}

/// Trim `messages` in place when [`total_chars`] exceeds [`MAX_CONTEXT_CHARS`].
///
/// Preserves the first two messages (system prompt, initial user turn) and
/// the most recent messages that fit the budget, scanning from the end and
/// never splitting an assistant `tool_calls` message from its paired tool
/// replies. A synthetic system message is inserted reporting how many
/// messages were dropped and which files, if any, are already cached (so the
/// agent doesn't lose track of work done earlier in the loop).
///
/// Returns the number of messages dropped (0 if no trim was necessary).
pub fn trim_history(messages: &mut Vec<Message>, cached_files: &[String]) -> usize {
    if messages.len() <= 2 || total_chars(messages) <= MAX_CONTEXT_CHARS {
        return 0;
    }

    let preserved_head: Vec<Message> = messages.iter().take(2).cloned().collect();
    let body: Vec<Message> = messages[2..].to_vec();

    // Walk backwards accumulating whole messages until the budget is spent.
    let mut budget = MAX_CONTEXT_CHARS.saturating_sub(total_chars(&preserved_head));
    let mut kept_from = body.len();
    while kept_from > 0 {
        let cost = body[kept_from - 1].content_len();
        if cost > budget {
            break;
        }
        budget -= cost;
        kept_from -= 1;
    }

    // Never start the kept window on a tool reply whose parent tool_calls
    // message just got dropped — pull it back in along with its reply/replies.
    while kept_from > 0 && is_tool_reply(&body[kept_from]) {
        kept_from -= 1;
    }

    let dropped = kept_from;
    if dropped == 0 {
        return 0;
    }

    let mut notice = format!(
        "[Context trimmed: {dropped} earlier message(s) were dropped to stay within the context budget.]"
    );
    if !cached_files.is_empty() {
        notice.push_str(&format!(" Already-read files still cached: {}.", cached_files.join(", ")));
    }

    let mut trimmed = preserved_head;
    trimmed.push(Message::system(notice));
    trimmed.extend(body[kept_from..].iter().cloned());
    *messages = trimmed;
    dropped
}

fn is_tool_reply(m: &Message) -> bool {
    matches!(m, Message::Chat { tool_call_id: Some(_), .. }) || matches!(m, Message::FunctionCallOutput { .. })
}

// ─── Private helpers ──────────────────────────────────────────────────────────

/// Keep only the leading lines that fit within `cap_chars`.
fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

/// Keep `max_head` leading lines and `max_tail` trailing lines, inserting a
/// notice between them. Pass `usize::MAX` to split evenly by character budget.
fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
