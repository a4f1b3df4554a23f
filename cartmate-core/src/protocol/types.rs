//! Protocol types module containing envelope and payload definitions.
//!
//! This module defines the typed message envelope exchanged between agents
//! and the closed payload variants carried inside it.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default priority hint for newly constructed envelopes.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Represents the different kinds of messages in the protocol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Request messages expect exactly one response
    Request,
    /// Response messages answer a request, success or error
    Response,
    /// Notification messages are fire-and-forget between agents
    Notification,
    /// Acknowledgment messages retire a tracked delivery
    Acknowledgment,
    /// Frontend notifications are broadcast for human-facing display
    FrontendNotification,
}

/// Closed vocabulary of delegated request actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    SearchProducts,
    GetProductDetails,
    ComparePrices,
    AddToCart,
    GetCart,
    ProcessCheckout,
    AnalyzeStyle,
}

/// Kinds of frontend visibility notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AgentThinking,
    AgentAction,
    AgentDelegation,
    AgentResponse,
}

/// Recipient of an envelope: a single agent or every active subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// Deliver to exactly one agent by id
    Agent(String),
    /// Fan out to all active subscribers
    Broadcast,
}

impl Recipient {
    /// Returns the target agent id for a unicast recipient.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Recipient::Agent(id) => Some(id),
            Recipient::Broadcast => None,
        }
    }
}

/// Typed payload carried by an envelope. The variant determines the
/// envelope's message type, so the two can never disagree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Request {
        action: RequestKind,
        params: Value,
    },
    Response {
        /// Id of the request this answers
        request_id: String,
        success: bool,
        body: Value,
        error: Option<String>,
    },
    Notification {
        event: String,
        body: Value,
    },
    Acknowledgment {
        /// Id of the message being acknowledged
        message_id: String,
    },
    FrontendNotification {
        kind: NotificationKind,
        agent_name: String,
        text: String,
    },
}

impl Payload {
    /// The message type implied by this payload variant.
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Request { .. } => MessageType::Request,
            Payload::Response { .. } => MessageType::Response,
            Payload::Notification { .. } => MessageType::Notification,
            Payload::Acknowledgment { .. } => MessageType::Acknowledgment,
            Payload::FrontendNotification { .. } => MessageType::FrontendNotification,
        }
    }
}

/// Session and conversation correlation data carried alongside a payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessageContext {
    /// User session this message belongs to, if any
    pub session_id: Option<String>,
    /// Conversation identifier shared by all messages of an exchange
    pub conversation_id: String,
    /// Id of the causally preceding message, if any
    pub in_reply_to: Option<String>,
}

impl MessageContext {
    /// Creates a context for a fresh conversation.
    pub fn new() -> Self {
        Self {
            session_id: None,
            conversation_id: Uuid::new_v4().to_string(),
            in_reply_to: None,
        }
    }

    /// Creates a context bound to a user session. The session id doubles as
    /// the conversation id, matching how turns are correlated upstream.
    pub fn for_session(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            conversation_id: session_id.clone(),
            session_id: Some(session_id),
            in_reply_to: None,
        }
    }
}

/// The unit of communication between agents.
///
/// Envelopes are immutable after construction: created by a sender,
/// transmitted by the bus, consumed once by the addressed handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique message identifier, generated at creation
    pub id: String,
    /// Sender agent id
    pub from_agent: String,
    /// Recipient agent id or broadcast marker
    pub to_agent: Recipient,
    /// Typed payload
    pub payload: Payload,
    /// Correlation data
    pub context: MessageContext,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Ordering hint within a queue; not a hard guarantee
    pub priority: u8,
}

impl Envelope {
    /// Constructs and validates an envelope.
    ///
    /// Fails with a validation error if the recipient is inconsistent with
    /// the payload variant (see [`Envelope::validate`]).
    pub fn construct(
        from_agent: impl Into<String>,
        to_agent: Recipient,
        payload: Payload,
        context: MessageContext,
    ) -> Result<Self> {
        let envelope = Self {
            id: Uuid::new_v4().to_string(),
            from_agent: from_agent.into(),
            to_agent,
            payload,
            context,
            timestamp: Utc::now(),
            priority: DEFAULT_PRIORITY,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Builds a request envelope addressed to a single agent.
    pub fn request(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        action: RequestKind,
        params: Value,
        context: MessageContext,
    ) -> Result<Self> {
        Self::construct(
            from_agent,
            Recipient::Agent(to_agent.into()),
            Payload::Request { action, params },
            context,
        )
    }

    /// Builds a success response correlated to the given request.
    pub fn response_to(request: &Envelope, from_agent: impl Into<String>, body: Value) -> Result<Self> {
        let mut context = request.context.clone();
        context.in_reply_to = Some(request.id.clone());
        Self::construct(
            from_agent,
            Recipient::Agent(request.from_agent.clone()),
            Payload::Response {
                request_id: request.id.clone(),
                success: true,
                body,
                error: None,
            },
            context,
        )
    }

    /// Builds an error response correlated to the given request.
    pub fn error_response_to(
        request: &Envelope,
        from_agent: impl Into<String>,
        error: impl Into<String>,
    ) -> Result<Self> {
        let mut context = request.context.clone();
        context.in_reply_to = Some(request.id.clone());
        let error = error.into();
        Self::construct(
            from_agent,
            Recipient::Agent(request.from_agent.clone()),
            Payload::Response {
                request_id: request.id.clone(),
                success: false,
                body: serde_json::json!({ "error": error }),
                error: Some(error),
            },
            context,
        )
    }

    /// Builds a fire-and-forget notification.
    pub fn notification(
        from_agent: impl Into<String>,
        to_agent: Recipient,
        event: impl Into<String>,
        body: Value,
        context: MessageContext,
    ) -> Result<Self> {
        Self::construct(
            from_agent,
            to_agent,
            Payload::Notification {
                event: event.into(),
                body,
            },
            context,
        )
    }

    /// Builds an acknowledgment for a received message.
    pub fn acknowledgment(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Result<Self> {
        Self::construct(
            from_agent,
            Recipient::Agent(to_agent.into()),
            Payload::Acknowledgment {
                message_id: message_id.into(),
            },
            MessageContext::new(),
        )
    }

    /// Builds a broadcast frontend visibility notification.
    pub fn frontend_notification(
        from_agent: impl Into<String>,
        kind: NotificationKind,
        agent_name: impl Into<String>,
        text: impl Into<String>,
        context: MessageContext,
    ) -> Result<Self> {
        Self::construct(
            from_agent,
            Recipient::Broadcast,
            Payload::FrontendNotification {
                kind,
                agent_name: agent_name.into(),
                text: text.into(),
            },
            context,
        )
    }

    /// Overrides the priority hint.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// The message type implied by the payload.
    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    /// Validates required fields and recipient/payload consistency.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("envelope id must not be empty"));
        }
        if self.from_agent.trim().is_empty() {
            return Err(Error::validation("from_agent must not be empty"));
        }
        if self.context.conversation_id.trim().is_empty() {
            return Err(Error::validation("conversation_id must not be empty"));
        }

        match (&self.payload, &self.to_agent) {
            (Payload::Request { .. }, Recipient::Broadcast)
            | (Payload::Response { .. }, Recipient::Broadcast)
            | (Payload::Acknowledgment { .. }, Recipient::Broadcast) => {
                return Err(Error::validation(format!(
                    "{:?} messages require a unicast recipient",
                    self.message_type()
                )));
            }
            (Payload::FrontendNotification { .. }, Recipient::Agent(_)) => {
                return Err(Error::validation(
                    "frontend notifications must be broadcast",
                ));
            }
            (_, Recipient::Agent(id)) if id.trim().is_empty() => {
                return Err(Error::validation("to_agent must not be empty"));
            }
            _ => {}
        }

        match &self.payload {
            Payload::Response { request_id, .. } => {
                if request_id.trim().is_empty() {
                    return Err(Error::validation("response requires the originating request id"));
                }
            }
            Payload::Acknowledgment { message_id } => {
                if message_id.trim().is_empty() {
                    return Err(Error::validation("acknowledgment requires a message id"));
                }
            }
            Payload::Notification { event, .. } => {
                if event.trim().is_empty() {
                    return Err(Error::validation("notification requires an event name"));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_construction() {
        let env = Envelope::request(
            "orchestrator",
            "product-discovery-1",
            RequestKind::SearchProducts,
            json!({"query": "red jacket"}),
            MessageContext::for_session("session-1"),
        )
        .unwrap();

        assert_eq!(env.from_agent, "orchestrator");
        assert_eq!(env.to_agent, Recipient::Agent("product-discovery-1".into()));
        assert_eq!(env.message_type(), MessageType::Request);
        assert_eq!(env.priority, DEFAULT_PRIORITY);
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_unicast_requires_target() {
        let result = Envelope::construct(
            "orchestrator",
            Recipient::Broadcast,
            Payload::Request {
                action: RequestKind::SearchProducts,
                params: json!({}),
            },
            MessageContext::new(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = Envelope::request(
            "orchestrator",
            "",
            RequestKind::SearchProducts,
            json!({}),
            MessageContext::new(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_response_correlation() {
        let request = Envelope::request(
            "orchestrator",
            "price-comparison-1",
            RequestKind::ComparePrices,
            json!({"product": "watch"}),
            MessageContext::for_session("session-2"),
        )
        .unwrap();

        let response =
            Envelope::response_to(&request, "price-comparison-1", json!({"offers": []})).unwrap();

        assert_eq!(response.to_agent, Recipient::Agent("orchestrator".into()));
        assert_eq!(response.context.in_reply_to.as_deref(), Some(request.id.as_str()));
        match &response.payload {
            Payload::Response {
                request_id,
                success,
                ..
            } => {
                assert_eq!(request_id, &request.id);
                assert!(success);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_error_response_carries_structured_error() {
        let request = Envelope::request(
            "orchestrator",
            "cart-1",
            RequestKind::AddToCart,
            json!({}),
            MessageContext::new(),
        )
        .unwrap();

        let response =
            Envelope::error_response_to(&request, "cart-1", "catalog unreachable").unwrap();
        match &response.payload {
            Payload::Response { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.as_deref(), Some("catalog unreachable"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_frontend_notification_must_broadcast() {
        let result = Envelope::construct(
            "product-discovery-1",
            Recipient::Agent("orchestrator".into()),
            Payload::FrontendNotification {
                kind: NotificationKind::AgentAction,
                agent_name: "Product Discovery Agent".into(),
                text: "Searching the catalog".into(),
            },
            MessageContext::new(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_priority_is_a_hint_with_default() {
        let env = Envelope::acknowledgment("agent-a", "agent-b", "msg-1")
            .unwrap()
            .with_priority(9);
        assert_eq!(env.priority, 9);
    }

    #[test]
    fn test_json_roundtrip_keeps_payload_shape() {
        let env = Envelope::request(
            "orchestrator",
            "product-discovery-1",
            RequestKind::SearchProducts,
            json!({"query": "sunglasses", "limit": 5}),
            MessageContext::for_session("session-3"),
        )
        .unwrap();

        let encoded = serde_json::to_string(&env).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(decoded.message_type(), MessageType::Request);
    }
}
