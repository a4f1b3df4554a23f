//! Prompt construction for the orchestrator's reasoning calls.

/// Builds the intent-analysis prompt. The model is asked for a strict JSON
/// object so the reply can be parsed into [`crate::IntentSignals`].
pub fn intent_prompt(message: &str, conversation_summary: &str, recent_products: &[String]) -> String {
    let products_line = if recent_products.is_empty() {
        "None".to_string()
    } else {
        recent_products.join(", ")
    };

    format!(
        r#"You are an intent analyzer for a shopping assistant. Analyze this user message: "{message}"

Conversation so far:
{conversation_summary}

Recently shown products: {products_line}

Reply with ONLY a JSON object, no prose:
{{
  "needs_product_search": bool,
  "search_query": string or null,
  "needs_price_comparison": bool,
  "product_reference": string or null,
  "needs_cart_management": bool,
  "needs_checkout": bool
}}"#
    )
}

/// Builds the answer-synthesis prompt from delegated outcomes.
pub fn synthesis_prompt(message: &str, outcome_summary: &str) -> String {
    format!(
        r#"You are CartMate, a friendly AI shopping assistant. The user said: "{message}"

Specialist agents reported:
{outcome_summary}

Write one short, helpful reply that weaves the agent findings together.
If a capability was unavailable, mention it plainly and still be useful.
Reply with plain text only."#
    )
}

/// Builds the direct conversational prompt used when no delegation is needed.
pub fn conversation_prompt(message: &str, conversation_summary: &str) -> String {
    format!(
        r#"You are CartMate, a friendly AI shopping assistant. Respond naturally to: "{message}"

Conversation so far:
{conversation_summary}

Guidelines:
- Be helpful and conversational, keep it concise
- Offer shopping advice when relevant
- If they want to search for specific products, let them know you can help with that"#
    )
}
