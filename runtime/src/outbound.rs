//! Preparing conversation history for a model request.

use std::borrow::Cow;

use tracing::debug;

use crate::core::context_budget::{apply_context_limit, budget_for_context_window, estimate_tokens};
use crate::core::types::Message;
use crate::io::config::RuntimeConfig;

/// Fit `messages` into the share of `context_window` the config allows.
///
/// Called before every model invocation. Borrowed output means the history
/// went out unchanged.
pub fn prepare_outbound<'a>(
    messages: &'a [Message],
    context_window: usize,
    cfg: &RuntimeConfig,
) -> Cow<'a, [Message]> {
    let budget = budget_for_context_window(context_window, cfg.context_window_ratio);
    let out = apply_context_limit(messages, budget);
    if let Cow::Owned(kept) = &out {
        debug!(
            context_window,
            budget,
            before = estimate_tokens(messages),
            after = estimate_tokens(kept),
            "outbound history truncated"
        );
    }
    out
}
