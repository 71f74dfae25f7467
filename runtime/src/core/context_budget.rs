//! Conversation context budgeting.
//!
//! Token cost is approximated as `ceil(chars / 4)`. Downstream budget
//! thresholds are tuned against this heuristic, so it must not be swapped for a
//! real tokenizer without retuning them.

use std::borrow::Cow;

use tracing::debug;

use crate::core::types::{Message, MessageContent};

/// Content of the synthetic message marking dropped history.
pub const TRUNCATION_NOTICE: &str =
    "[Earlier conversation messages have been truncated to fit context window]";

/// Histories this short are never truncated.
pub const MIN_TRUNCATABLE_MESSAGES: usize = 5;

const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a message sequence.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages.iter().map(content_chars).sum();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Derive a token budget from a model context window.
pub fn budget_for_context_window(context_window: usize, ratio: f64) -> usize {
    (context_window as f64 * ratio).floor() as usize
}

/// The placeholder inserted after the first message when history is dropped.
pub fn truncation_marker() -> Message {
    Message::user(TRUNCATION_NOTICE)
}

/// Truncate `messages` so their estimated size fits `budget`.
///
/// Returns `Cow::Borrowed` when nothing was dropped. Otherwise the output is
/// `[first, marker, ...tail]` where `tail` is the longest suffix that fits
/// alongside the first message and the marker, and never shorter than the
/// newest message.
pub fn apply_context_limit(messages: &[Message], budget: usize) -> Cow<'_, [Message]> {
    if messages.len() < MIN_TRUNCATABLE_MESSAGES || estimate_tokens(messages) <= budget {
        return Cow::Borrowed(messages);
    }

    let marker = truncation_marker();
    let last = messages.len() - 1;
    let mut chars =
        content_chars(&messages[0]) + content_chars(&marker) + content_chars(&messages[last]);
    let mut start = last;

    while start > 1 {
        let candidate = chars + content_chars(&messages[start - 1]);
        if candidate.div_ceil(CHARS_PER_TOKEN) > budget {
            break;
        }
        chars = candidate;
        start -= 1;
    }

    debug!(
        total = messages.len(),
        dropped = start - 1,
        kept_tail = messages.len() - start,
        budget,
        "context truncated"
    );

    let mut out = Vec::with_capacity(messages.len() - start + 2);
    out.push(messages[0].clone());
    out.push(marker);
    out.extend_from_slice(&messages[start..]);
    Cow::Owned(out)
}

fn content_chars(message: &Message) -> usize {
    match &message.content {
        MessageContent::Text(text) => text.chars().count(),
        // Serializing a Vec<Value> cannot fail.
        MessageContent::Parts(parts) => serde_json::to_string(parts)
            .map(|json| json.chars().count())
            .unwrap_or(0),
    }
}
