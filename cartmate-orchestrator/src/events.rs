//! Typed progress events streamed toward the human-facing channel.
//!
//! The orchestrator never talks to the transport directly; it pushes a
//! finite sequence of events per turn into an [`EventSink`], terminated by
//! a final `Text` event. The transport layer forwards them as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Visibility step kinds shown while a delegation is in flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Calling,
    Processing,
    Success,
    Error,
}

/// One step in the delegation visibility panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub agent_name: String,
    pub message: String,
}

impl AgentStep {
    pub fn new(
        id: impl Into<String>,
        step_type: StepType,
        agent_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            step_type,
            agent_name: agent_name.into(),
            message: message.into(),
        }
    }
}

/// Body of a `text` event: a plain message, optionally carrying products.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<Value>>,
}

impl TextContent {
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            products: None,
        }
    }

    pub fn with_products(message: impl Into<String>, products: Vec<Value>) -> Self {
        Self {
            message: message.into(),
            products: Some(products),
        }
    }
}

/// Events emitted toward the human-facing channel for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrontendEvent {
    /// Once, at channel open
    ConnectionEstablished {
        session_id: String,
        user_id: String,
        message: String,
    },
    /// Progress signal
    TypingIndicator { is_typing: bool },
    /// Visibility into delegation
    AgentCommunication { steps: Vec<AgentStep> },
    /// Replaces the previous visibility panel
    AgentCommunicationUpdate { steps: Vec<AgentStep> },
    /// A normal or product-bearing answer
    Text { content: TextContent },
    /// Session context cleared
    ChatReset,
}

impl FrontendEvent {
    pub fn connection_established(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        FrontendEvent::ConnectionEstablished {
            session_id: session_id.into(),
            user_id: user_id.into(),
            message: "Connected successfully".into(),
        }
    }

    /// True for the events that terminate a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrontendEvent::Text { .. })
    }
}

/// Sending half of a turn's event stream. Sends are best-effort: a
/// disconnected consumer drops events without failing the turn.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<FrontendEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<FrontendEvent>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: FrontendEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event dropped: consumer disconnected");
        }
    }

    pub async fn typing(&self, is_typing: bool) {
        self.send(FrontendEvent::TypingIndicator { is_typing }).await;
    }

    pub async fn steps(&self, steps: Vec<AgentStep>) {
        self.send(FrontendEvent::AgentCommunication { steps }).await;
    }

    pub async fn update_steps(&self, steps: Vec<AgentStep>) {
        self.send(FrontendEvent::AgentCommunicationUpdate { steps })
            .await;
    }

    pub async fn text(&self, content: TextContent) {
        self.send(FrontendEvent::Text { content }).await;
    }
}
