//! Delegation bookkeeping: correlating fan-out requests with their replies.
//!
//! Every delegated request registers a pending entry keyed by the request
//! envelope id. Replies are matched strictly by that id; anything arriving
//! after the entry was discarded (deadline expiry) is logged and dropped so
//! a completed turn is never corrupted.

use crate::intent::display_name_for;
use cartmate_core::protocol::{Envelope, Payload};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// What came back for one delegated request.
#[derive(Debug)]
pub enum DelegationReply {
    /// A response envelope, success or error
    Response(Envelope),
    /// The bus reported the request undeliverable
    DeliveryFailed,
}

/// Correlation map from request envelope id to the waiting turn.
#[derive(Clone, Default)]
pub struct PendingDelegations {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<DelegationReply>>>>,
}

impl PendingDelegations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request and returns the receiving half.
    pub async fn register(&self, request_id: impl Into<String>) -> oneshot::Receiver<DelegationReply> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(request_id.into(), tx);
        rx
    }

    /// Resolves a pending request. Returns false for unknown ids (late or
    /// duplicate replies), which the caller discards.
    pub async fn resolve(&self, request_id: &str, reply: DelegationReply) -> bool {
        let sender = self.inner.lock().await.remove(request_id);
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!(request_id, "late reply discarded: no pending delegation");
                false
            }
        }
    }

    /// Drops a pending entry so later replies are discarded.
    pub async fn discard(&self, request_id: &str) -> bool {
        self.inner.lock().await.remove(request_id).is_some()
    }
}

/// One in-flight delegation awaited by the active turn.
pub struct ActiveDelegation {
    pub request_id: String,
    pub agent_type: String,
    pub deadline: Duration,
    pub rx: oneshot::Receiver<DelegationReply>,
}

/// Outcome of one delegation after fan-in.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegationOutcome {
    /// The agent answered successfully
    Success { agent_type: String, body: Value },
    /// The agent answered with an error, or delivery failed
    Failed { agent_type: String, error: String },
    /// No response arrived within the deadline
    TimedOut { agent_type: String },
    /// No active agent existed for the capability (no request sent)
    Unavailable { agent_type: String },
}

impl DelegationOutcome {
    pub fn agent_type(&self) -> &str {
        match self {
            DelegationOutcome::Success { agent_type, .. }
            | DelegationOutcome::Failed { agent_type, .. }
            | DelegationOutcome::TimedOut { agent_type }
            | DelegationOutcome::Unavailable { agent_type } => agent_type,
        }
    }

    pub fn display_name(&self) -> String {
        display_name_for(self.agent_type())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DelegationOutcome::Success { .. })
    }
}

/// Waits concurrently for every in-flight delegation up to its own
/// deadline. Partial completion is expected: responses that arrive in time
/// are used, the rest become timeouts. Total wait is bounded by the
/// slowest single deadline, not the sum.
pub async fn await_responses(
    pending: &PendingDelegations,
    active: Vec<ActiveDelegation>,
) -> Vec<DelegationOutcome> {
    let waits = active.into_iter().map(|delegation| {
        let pending = pending.clone();
        async move {
            match tokio::time::timeout(delegation.deadline, delegation.rx).await {
                Ok(Ok(DelegationReply::Response(envelope))) => outcome_from_response(
                    delegation.agent_type,
                    envelope,
                ),
                Ok(Ok(DelegationReply::DeliveryFailed)) => DelegationOutcome::Failed {
                    agent_type: delegation.agent_type,
                    error: "request could not be delivered".into(),
                },
                Ok(Err(_)) => DelegationOutcome::Failed {
                    agent_type: delegation.agent_type,
                    error: "delegation channel closed".into(),
                },
                Err(_) => {
                    pending.discard(&delegation.request_id).await;
                    warn!(
                        request_id = %delegation.request_id,
                        agent_type = %delegation.agent_type,
                        "delegation deadline elapsed"
                    );
                    DelegationOutcome::TimedOut {
                        agent_type: delegation.agent_type,
                    }
                }
            }
        }
    });
    futures::future::join_all(waits).await
}

fn outcome_from_response(agent_type: String, envelope: Envelope) -> DelegationOutcome {
    match envelope.payload {
        Payload::Response {
            success: true,
            body,
            ..
        } => DelegationOutcome::Success { agent_type, body },
        Payload::Response {
            success: false,
            error,
            ..
        } => DelegationOutcome::Failed {
            agent_type,
            error: error.unwrap_or_else(|| "agent reported an error".into()),
        },
        other => DelegationOutcome::Failed {
            agent_type,
            error: format!("unexpected reply payload: {:?}", other.message_type()),
        },
    }
}
