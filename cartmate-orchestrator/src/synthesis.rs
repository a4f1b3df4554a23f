//! Answer synthesis: folding delegation outcomes into one coherent reply.
//!
//! Synthesis must produce a useful answer even with zero successful
//! delegations. When two agents report the same product, the capability
//! priority table decides whose fields win.

use crate::context::ConversationContext;
use crate::delegation::DelegationOutcome;
use cartmate_llm::{prompt, ChatCompletion};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Configurable ranking of capabilities for conflict resolution. Higher
/// rank wins when two agents report conflicting data for the same entity.
#[derive(Debug, Clone)]
pub struct CapabilityPriority {
    ranks: HashMap<String, u8>,
}

impl Default for CapabilityPriority {
    fn default() -> Self {
        let mut ranks = HashMap::new();
        ranks.insert("price_comparison".to_string(), 20);
        ranks.insert("checkout".to_string(), 15);
        ranks.insert("cart_management".to_string(), 12);
        ranks.insert("product_discovery".to_string(), 10);
        ranks.insert("style_analysis".to_string(), 5);
        Self { ranks }
    }
}

impl CapabilityPriority {
    pub fn rank(&self, agent_type: &str) -> u8 {
        self.ranks.get(agent_type).copied().unwrap_or(0)
    }

    pub fn set_rank(&mut self, agent_type: impl Into<String>, rank: u8) {
        self.ranks.insert(agent_type.into(), rank);
    }
}

/// Final synthesized answer for a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub message: String,
    pub products: Option<Vec<Value>>,
}

/// Combines whatever outcomes exist into a final answer. Uses the chat
/// endpoint for phrasing when available; a deterministic template
/// otherwise, and also whenever the chat call fails.
pub async fn synthesize(
    message: &str,
    outcomes: &[DelegationOutcome],
    _context: &ConversationContext,
    chat: Option<&Arc<dyn ChatCompletion>>,
    priorities: &CapabilityPriority,
) -> SynthesisResult {
    let products = merge_products(outcomes, priorities);
    let template = template_reply(outcomes);

    let text = match chat {
        Some(chat) => {
            let summary = outcome_summary(outcomes);
            match chat.complete(&prompt::synthesis_prompt(message, &summary)).await {
                Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                Ok(_) => template,
                Err(err) => {
                    warn!(%err, "synthesis call failed, using template reply");
                    template
                }
            }
        }
        None => template,
    };

    SynthesisResult {
        message: text,
        products: if products.is_empty() {
            None
        } else {
            Some(products)
        },
    }
}

/// Merges product entries from successful outcomes. Entries sharing a key
/// (id, falling back to name) are overlaid in ascending priority order so
/// the most specialized capability's fields win.
pub fn merge_products(
    outcomes: &[DelegationOutcome],
    priorities: &CapabilityPriority,
) -> Vec<Value> {
    let mut ranked: Vec<&DelegationOutcome> =
        outcomes.iter().filter(|o| o.is_success()).collect();
    ranked.sort_by_key(|o| priorities.rank(o.agent_type()));

    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Map<String, Value>> = HashMap::new();

    for outcome in ranked {
        let DelegationOutcome::Success { body, .. } = outcome else {
            continue;
        };
        let Some(products) = body.get("products").and_then(Value::as_array) else {
            continue;
        };
        for product in products {
            let Some(fields) = product.as_object() else {
                continue;
            };
            let key = product_key(fields);
            match merged.get_mut(&key) {
                Some(existing) => {
                    for (field, value) in fields {
                        existing.insert(field.clone(), value.clone());
                    }
                }
                None => {
                    order.push(key.clone());
                    merged.insert(key, fields.clone());
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key).map(Value::Object))
        .collect()
}

fn product_key(fields: &Map<String, Value>) -> String {
    fields
        .get("id")
        .or_else(|| fields.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Value::Object(fields.clone()).to_string())
}

/// Plain-text summary of outcomes for the synthesis prompt.
pub fn outcome_summary(outcomes: &[DelegationOutcome]) -> String {
    if outcomes.is_empty() {
        return "No specialist agents were involved.".to_string();
    }
    outcomes
        .iter()
        .map(|outcome| match outcome {
            DelegationOutcome::Success { body, .. } => {
                format!("- {}: {}", outcome.display_name(), body)
            }
            DelegationOutcome::Failed { error, .. } => {
                format!("- {}: failed ({error})", outcome.display_name())
            }
            DelegationOutcome::TimedOut { .. } => {
                format!("- {}: did not answer in time", outcome.display_name())
            }
            DelegationOutcome::Unavailable { .. } => {
                format!("- {}: currently unavailable", outcome.display_name())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Deterministic reply used without a reasoning endpoint. Every capability
/// gap becomes a plain-language notice folded into the answer.
pub fn template_reply(outcomes: &[DelegationOutcome]) -> String {
    let successes: Vec<&DelegationOutcome> =
        outcomes.iter().filter(|o| o.is_success()).collect();
    let mut lines = Vec::new();

    for outcome in &successes {
        if let DelegationOutcome::Success { body, .. } = outcome {
            if let Some(products) = body.get("products").and_then(Value::as_array) {
                lines.push(format!(
                    "I found {} matching item{} for you.",
                    products.len(),
                    if products.len() == 1 { "" } else { "s" }
                ));
            } else if let Some(summary) = body.get("summary").and_then(Value::as_str) {
                lines.push(summary.to_string());
            } else {
                lines.push(format!("{} finished its task.", outcome.display_name()));
            }
        }
    }

    for outcome in outcomes {
        match outcome {
            DelegationOutcome::Failed { .. } | DelegationOutcome::TimedOut { .. } => {
                lines.push(format!(
                    "{} could not complete the request right now.",
                    outcome.display_name()
                ));
            }
            DelegationOutcome::Unavailable { .. } => {
                lines.push(format!(
                    "{} is currently unavailable.",
                    outcome.display_name()
                ));
            }
            DelegationOutcome::Success { .. } => {}
        }
    }

    if successes.is_empty() {
        if outcomes.is_empty() {
            "I'm here to help with your shopping needs! What can I assist you with today?"
                .to_string()
        } else {
            format!(
                "I couldn't look that up right now, but I'm happy to help another way. {}",
                lines.join(" ")
            )
        }
    } else {
        lines.join(" ")
    }
}
