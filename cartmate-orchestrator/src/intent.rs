//! Intent analysis: deciding which capabilities a user message needs.
//!
//! Two implementations share the [`IntentAnalyzer`] seam: a
//! chat-completion-backed analyzer and a keyword analyzer that keeps the
//! system usable when no reasoning endpoint is configured. Analyzer
//! failure is never fatal — the orchestrator degrades to general
//! conversation.

use crate::context::ConversationContext;
use async_trait::async_trait;
use cartmate_core::error::Result;
use cartmate_core::protocol::RequestKind;
use cartmate_llm::{parse_intent_signals, prompt, ChatCompletion, IntentSignals};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Agent type handling product search requests.
pub const PRODUCT_DISCOVERY: &str = "product_discovery";
/// Agent type handling price comparison requests.
pub const PRICE_COMPARISON: &str = "price_comparison";
/// Agent type handling cart mutations.
pub const CART_MANAGEMENT: &str = "cart_management";
/// Agent type handling checkout.
pub const CHECKOUT: &str = "checkout";

/// One capability the orchestrator should delegate to.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationSpec {
    pub agent_type: String,
    pub display_name: String,
    pub action: RequestKind,
    pub params: Value,
}

impl DelegationSpec {
    pub fn new(agent_type: &str, action: RequestKind, params: Value) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            display_name: display_name_for(agent_type),
            action,
            params,
        }
    }
}

/// Display name used in visibility steps for a given agent type.
pub fn display_name_for(agent_type: &str) -> String {
    match agent_type {
        PRODUCT_DISCOVERY => "Product Discovery Agent".to_string(),
        PRICE_COMPARISON => "Price Comparison Agent".to_string(),
        CART_MANAGEMENT => "Cart Management Agent".to_string(),
        CHECKOUT => "Checkout Agent".to_string(),
        other => other.to_string(),
    }
}

/// Result of intent analysis: the capabilities to involve, possibly none.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Intent {
    pub delegations: Vec<DelegationSpec>,
}

impl Intent {
    /// The degenerate intent: answer directly, delegate nothing.
    pub fn general() -> Self {
        Self::default()
    }

    pub fn is_direct(&self) -> bool {
        self.delegations.is_empty()
    }
}

/// Classifies a user utterance into an [`Intent`].
#[async_trait]
pub trait IntentAnalyzer: Send + Sync {
    async fn analyze(&self, message: &str, context: &ConversationContext) -> Result<Intent>;
}

/// Chat-completion-backed analyzer.
pub struct LlmIntentAnalyzer {
    chat: Arc<dyn ChatCompletion>,
}

impl LlmIntentAnalyzer {
    pub fn new(chat: Arc<dyn ChatCompletion>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl IntentAnalyzer for LlmIntentAnalyzer {
    async fn analyze(&self, message: &str, context: &ConversationContext) -> Result<Intent> {
        let prompt = prompt::intent_prompt(
            message,
            &context.summary(8),
            &context.recent_product_names(),
        );
        let reply = self.chat.complete(&prompt).await.map_err(cartmate_core::Error::from)?;
        let signals = parse_intent_signals(&reply).map_err(cartmate_core::Error::from)?;
        debug!(?signals, "intent signals parsed");
        Ok(signals_to_intent(&signals, message, context))
    }
}

/// Maps parsed intent signals onto delegation specs. Pure so it can be
/// tested without a model.
pub fn signals_to_intent(
    signals: &IntentSignals,
    message: &str,
    context: &ConversationContext,
) -> Intent {
    let mut delegations = Vec::new();

    if signals.needs_product_search {
        let query = signals
            .search_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(message);
        delegations.push(DelegationSpec::new(
            PRODUCT_DISCOVERY,
            RequestKind::SearchProducts,
            json!({ "query": query }),
        ));
    }

    if signals.needs_price_comparison {
        let product = signals
            .product_reference
            .clone()
            .map(Value::from)
            .or_else(|| context.last_product().cloned());
        if let Some(product) = product {
            delegations.push(DelegationSpec::new(
                PRICE_COMPARISON,
                RequestKind::ComparePrices,
                json!({ "product": product }),
            ));
        }
    }

    if signals.needs_cart_management && !context.recent_products().is_empty() {
        delegations.push(DelegationSpec::new(
            CART_MANAGEMENT,
            RequestKind::AddToCart,
            json!({ "products": context.recent_products() }),
        ));
    }

    if signals.needs_checkout {
        delegations.push(DelegationSpec::new(
            CHECKOUT,
            RequestKind::ProcessCheckout,
            json!({}),
        ));
    }

    Intent { delegations }
}

/// Keyword analyzer used when no reasoning endpoint is configured.
#[derive(Default)]
pub struct RuleBasedIntentAnalyzer;

impl RuleBasedIntentAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntentAnalyzer for RuleBasedIntentAnalyzer {
    async fn analyze(&self, message: &str, context: &ConversationContext) -> Result<Intent> {
        let lowered = message.to_lowercase();
        let mut signals = IntentSignals::default();

        if ["price", "cheaper", "deal", "cost", "how much"]
            .iter()
            .any(|kw| lowered.contains(kw))
            && context.last_product().is_some()
        {
            signals.needs_price_comparison = true;
        } else if ["add to cart", "add it", "put it in"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            signals.needs_cart_management = true;
        } else if lowered.contains("checkout") || lowered.contains("check out") {
            signals.needs_checkout = true;
        } else if ["find", "show me", "search", "looking for", "buy", "need a", "need some"]
            .iter()
            .any(|kw| lowered.contains(kw))
        {
            signals.needs_product_search = true;
            signals.search_query = Some(strip_search_verbs(&lowered));
        }

        Ok(signals_to_intent(&signals, message, context))
    }
}

fn strip_search_verbs(message: &str) -> String {
    let mut query = message.to_string();
    for prefix in [
        "find me", "find", "show me", "search for", "search", "i am looking for",
        "i'm looking for", "looking for", "i want to buy", "buy", "i need a", "i need some",
    ] {
        if let Some(rest) = query.strip_prefix(prefix) {
            query = rest.to_string();
            break;
        }
    }
    query.trim().trim_end_matches(['.', '!', '?']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_to_intent_maps_search() {
        let signals = IntentSignals {
            needs_product_search: true,
            search_query: Some("red jacket".into()),
            ..Default::default()
        };
        let intent = signals_to_intent(&signals, "find me a red jacket", &ConversationContext::new("s"));
        assert_eq!(intent.delegations.len(), 1);
        assert_eq!(intent.delegations[0].agent_type, PRODUCT_DISCOVERY);
        assert_eq!(intent.delegations[0].action, RequestKind::SearchProducts);
        assert_eq!(intent.delegations[0].params["query"], "red jacket");
    }

    #[test]
    fn test_price_comparison_falls_back_to_recent_product() {
        let mut context = ConversationContext::new("s");
        context.record_products(&[json!({"name": "Leather Boots", "price": 120})], 10);
        let signals = IntentSignals {
            needs_price_comparison: true,
            ..Default::default()
        };
        let intent = signals_to_intent(&signals, "is there a better deal?", &context);
        assert_eq!(intent.delegations.len(), 1);
        assert_eq!(intent.delegations[0].agent_type, PRICE_COMPARISON);
        assert_eq!(intent.delegations[0].params["product"]["name"], "Leather Boots");
    }

    #[test]
    fn test_price_comparison_without_any_product_is_skipped() {
        let signals = IntentSignals {
            needs_price_comparison: true,
            ..Default::default()
        };
        let intent = signals_to_intent(&signals, "compare prices", &ConversationContext::new("s"));
        assert!(intent.is_direct());
    }

    #[tokio::test]
    async fn test_rule_based_search_intent() {
        let analyzer = RuleBasedIntentAnalyzer::new();
        let intent = analyzer
            .analyze("find me a red jacket", &ConversationContext::new("s"))
            .await
            .unwrap();
        assert_eq!(intent.delegations.len(), 1);
        assert_eq!(intent.delegations[0].params["query"], "a red jacket");
    }

    #[tokio::test]
    async fn test_rule_based_small_talk_is_direct() {
        let analyzer = RuleBasedIntentAnalyzer::new();
        let intent = analyzer
            .analyze("hello there!", &ConversationContext::new("s"))
            .await
            .unwrap();
        assert!(intent.is_direct());
    }
}
