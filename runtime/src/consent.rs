//! Human-in-the-loop approval for native tool calls.
//!
//! The gate is fail-closed: a timeout, a dropped transport or a missing
//! listener all resolve to [`ConsentDecision::Decline`]. `accept-always`
//! decisions are persisted per tool name and turn later calls into silent
//! `accept-once` approvals.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::core::types::{ConsentDecision, ConsentRecord, ConsentRequest, RiskLevel};
use crate::io::config::RuntimeConfig;
use crate::io::consent_store::ConsentStore;
use crate::io::consent_transport::ConsentTransport;

/// Default wait before an unanswered prompt is declined.
pub const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A tool call awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentParams {
    pub tool_name: String,
    pub risk_level: RiskLevel,
    pub input_preview: Option<String>,
    pub chat_id: i64,
}

pub struct ConsentGate<S, T> {
    store: Arc<S>,
    transport: T,
    timeout: Duration,
}

/// Removes a pending request from the transport when dropped.
///
/// Covers every way the wait can end, including the caller dropping the
/// future. Cancelling an already answered request is a no-op.
struct PendingRequest<'a, T: ConsentTransport> {
    transport: &'a T,
    request_id: &'a str,
}

impl<T: ConsentTransport> Drop for PendingRequest<'_, T> {
    fn drop(&mut self) {
        self.transport.cancel(self.request_id);
    }
}

impl<S: ConsentStore + 'static, T: ConsentTransport> ConsentGate<S, T> {
    pub fn new(store: Arc<S>, transport: T) -> Self {
        Self {
            store,
            transport,
            timeout: DEFAULT_CONSENT_TIMEOUT,
        }
    }

    /// Gate with the configured consent timeout.
    pub fn from_config(store: Arc<S>, transport: T, cfg: &RuntimeConfig) -> Self {
        Self::new(store, transport).with_timeout(cfg.consent_timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Decide whether a native tool call may run.
    ///
    /// Never returns an error: every failure path declines. Concurrent calls
    /// get independent request ids and do not wait on each other.
    #[instrument(skip_all, fields(tool = %params.tool_name, chat_id = params.chat_id))]
    pub async fn request_consent(&self, params: ConsentParams) -> ConsentDecision {
        match self.lookup(&params.tool_name).await {
            Ok(Some(record)) if record.consent == ConsentDecision::AcceptAlways => {
                debug!("stored accept-always, auto-approving");
                return ConsentDecision::AcceptOnce;
            }
            Ok(_) => {}
            // Fall through to prompting; a broken store never approves on its own.
            Err(err) => warn!(err = %format!("{err:#}"), "consent lookup failed"),
        }

        let request_id = Uuid::new_v4().to_string();
        let request = ConsentRequest {
            request_id: request_id.clone(),
            tool_name: params.tool_name.clone(),
            risk_level: params.risk_level,
            input_preview: params.input_preview,
            chat_id: params.chat_id,
        };

        let rx = match self.transport.send_request(request) {
            Ok(rx) => rx,
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    err = %format!("{err:#}"),
                    "consent request not delivered, declining"
                );
                return ConsentDecision::Decline;
            }
        };

        let pending = PendingRequest {
            transport: &self.transport,
            request_id: &request_id,
        };
        let decision = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => {
                warn!(request_id = %request_id, "consent channel closed, declining");
                return ConsentDecision::Decline;
            }
            Err(_) => {
                info!(
                    request_id = %request_id,
                    timeout_secs = self.timeout.as_secs(),
                    "consent timed out, declining"
                );
                return ConsentDecision::Decline;
            }
        };

        drop(pending);

        if decision == ConsentDecision::AcceptAlways
            && let Err(err) = self.persist_always(&params.tool_name).await
        {
            // The user approved this call; only the memory of it is lost.
            error!(err = %format!("{err:#}"), "failed to persist accept-always");
        }

        debug!(request_id = %request_id, ?decision, "consent resolved");
        decision
    }

    // Store I/O is blocking; keep it off the async worker threads.
    async fn lookup(&self, tool_name: &str) -> Result<Option<ConsentRecord>> {
        let store = Arc::clone(&self.store);
        let tool_name = tool_name.to_string();
        tokio::task::spawn_blocking(move || store.get(&tool_name))
            .await
            .context("join consent lookup")?
    }

    async fn persist_always(&self, tool_name: &str) -> Result<()> {
        let store = Arc::clone(&self.store);
        let tool_name = tool_name.to_string();
        tokio::task::spawn_blocking(move || {
            store.upsert(&tool_name, ConsentDecision::AcceptAlways)
        })
        .await
        .context("join consent upsert")?
    }

    /// Forget a stored accept-always. Returns whether one existed.
    pub fn revoke(&self, tool_name: &str) -> Result<bool> {
        self.store.remove(tool_name)
    }
}
