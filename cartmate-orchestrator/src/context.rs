//! Session-scoped conversation context.
//!
//! Owned by the orchestrator and persisted to the session store between
//! turns. Only the turn currently processing a session mutates its context.

use cartmate_core::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// Who produced a turn entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnSender {
    User,
    Assistant,
    Agent,
}

/// One prior exchange in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub sender: TurnSender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// In-flight delegation bookkeeping, never persisted.
#[derive(Debug, Clone)]
pub struct PendingDelegation {
    pub agent_type: String,
    pub deadline: DateTime<Utc>,
}

/// Correlation state carried across the turns of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub conversation_id: String,
    turns: VecDeque<Turn>,
    recent_products: Vec<Value>,
    /// Delegations awaited by the active turn, keyed by request envelope id
    #[serde(skip)]
    pub pending_delegations: HashMap<String, PendingDelegation>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        Self {
            conversation_id: session_id.clone(),
            session_id,
            turns: VecDeque::new(),
            recent_products: Vec::new(),
            pending_delegations: HashMap::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Session(format!("bad stored context: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Session(format!("context encode: {e}")))
    }

    /// Appends a turn, dropping the oldest beyond `max_history`.
    pub fn push_turn(&mut self, sender: TurnSender, content: impl Into<String>, max_history: usize) {
        self.turns.push_back(Turn {
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        });
        while self.turns.len() > max_history {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Records products shown to the user, keeping the most recent
    /// `max_recent` across turns.
    pub fn record_products(&mut self, products: &[Value], max_recent: usize) {
        self.recent_products.extend(products.iter().cloned());
        if self.recent_products.len() > max_recent {
            let excess = self.recent_products.len() - max_recent;
            self.recent_products.drain(..excess);
        }
    }

    pub fn recent_products(&self) -> &[Value] {
        &self.recent_products
    }

    /// Names of recently shown products, newest last.
    pub fn recent_product_names(&self) -> Vec<String> {
        self.recent_products
            .iter()
            .filter_map(|p| p.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// The most recent product entry, if any.
    pub fn last_product(&self) -> Option<&Value> {
        self.recent_products.last()
    }

    /// Compact plain-text rendering of the history for prompts.
    pub fn summary(&self, max_turns: usize) -> String {
        self.turns
            .iter()
            .rev()
            .take(max_turns)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|turn| {
                let who = match turn.sender {
                    TurnSender::User => "User",
                    TurnSender::Assistant => "Assistant",
                    TurnSender::Agent => "Agent",
                };
                format!("{who}: {}", turn.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
