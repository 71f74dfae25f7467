//! Consent request transport between the agent loop and the front-end.
//!
//! Outbound requests are broadcast as `tool:consent-request` events. Each
//! request registers a oneshot keyed by `request_id`; the front-end answers
//! through [`ConsentBridge::respond`], which correlates purely by id so
//! prompts may be answered in any order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::core::types::{ConsentDecision, ConsentRequest};

/// Event name the front-end listens on.
pub const CONSENT_REQUEST_EVENT: &str = "tool:consent-request";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Outbound event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentEvent {
    pub event: &'static str,
    pub payload: ConsentRequest,
}

/// Pending decision for one request.
pub type DecisionReceiver = oneshot::Receiver<ConsentDecision>;

/// Request/response channel to whatever surface asks the user.
pub trait ConsentTransport: Send + Sync {
    /// Emit `request` and return the receiver its decision arrives on.
    ///
    /// A dropped sender means the transport failed; callers treat it as decline.
    fn send_request(&self, request: ConsentRequest) -> Result<DecisionReceiver>;

    /// Forget a pending request (timeout or caller gave up).
    fn cancel(&self, request_id: &str);
}

/// In-process transport: broadcast events out, registry of pending replies in.
#[derive(Clone)]
pub struct ConsentBridge {
    event_tx: Arc<broadcast::Sender<ConsentEvent>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ConsentDecision>>>>,
}

impl Default for ConsentBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsentBridge {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            event_tx: Arc::new(event_tx),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe a front-end to consent request events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsentEvent> {
        self.event_tx.subscribe()
    }

    /// Deliver the user's decision. Returns false for unknown or expired ids.
    pub fn respond(&self, request_id: &str, decision: ConsentDecision) -> bool {
        let Some(tx) = self.pending().remove(request_id) else {
            debug!(request_id, "consent response for unknown request");
            return false;
        };
        tx.send(decision).is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<ConsentDecision>>> {
        // The map stays consistent even if a holder panicked.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConsentTransport for ConsentBridge {
    fn send_request(&self, request: ConsentRequest) -> Result<DecisionReceiver> {
        let (tx, rx) = oneshot::channel();
        let request_id = request.request_id.clone();
        self.pending().insert(request_id.clone(), tx);

        let event = ConsentEvent {
            event: CONSENT_REQUEST_EVENT,
            payload: request,
        };
        if self.event_tx.send(event).is_err() {
            self.pending().remove(&request_id);
            warn!(request_id = %request_id, "no consent listener attached");
            return Err(anyhow!("no consent listener for request {request_id}"));
        }
        Ok(rx)
    }

    fn cancel(&self, request_id: &str) {
        if self.pending().remove(request_id).is_some() {
            debug!(request_id, "consent request cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RiskLevel;

    fn request(id: &str) -> ConsentRequest {
        ConsentRequest {
            request_id: id.to_string(),
            tool_name: "run_shell".to_string(),
            risk_level: RiskLevel::Dangerous,
            input_preview: Some("rm -rf build".to_string()),
            chat_id: 1,
        }
    }

    #[tokio::test]
    async fn responses_correlate_by_request_id() {
        let bridge = ConsentBridge::new();
        let mut events = bridge.subscribe();

        let first = bridge.send_request(request("r1")).expect("send r1");
        let second = bridge.send_request(request("r2")).expect("send r2");
        assert_eq!(events.recv().await.expect("event").payload.request_id, "r1");
        assert_eq!(events.recv().await.expect("event").payload.request_id, "r2");

        assert!(bridge.respond("r2", ConsentDecision::Decline));
        assert!(bridge.respond("r1", ConsentDecision::AcceptOnce));

        assert_eq!(first.await.expect("r1"), ConsentDecision::AcceptOnce);
        assert_eq!(second.await.expect("r2"), ConsentDecision::Decline);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn event_envelope_names_the_channel() {
        let bridge = ConsentBridge::new();
        let mut events = bridge.subscribe();
        let _rx = bridge.send_request(request("r1")).expect("send");
        let event = events.recv().await.expect("event");
        assert_eq!(event.event, "tool:consent-request");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["payload"]["toolName"], "run_shell");
    }

    #[test]
    fn send_without_listener_fails_and_cleans_up() {
        let bridge = ConsentBridge::new();
        assert!(bridge.send_request(request("r1")).is_err());
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_request_rejects_late_response() {
        let bridge = ConsentBridge::new();
        let _events = bridge.subscribe();
        let rx = bridge.send_request(request("r1")).expect("send");

        bridge.cancel("r1");
        assert!(!bridge.respond("r1", ConsentDecision::AcceptAlways));
        assert!(rx.await.is_err());
    }
}
