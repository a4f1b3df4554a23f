//! Parsing of model replies into typed intent signals.

use crate::{LlmError, Result};
use serde::{Deserialize, Serialize};

/// Which capabilities the user's message calls for, as reported by the
/// intent-analysis call. All flags default to false, which reads as
/// "general conversation".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntentSignals {
    pub needs_product_search: bool,
    pub search_query: Option<String>,
    pub needs_price_comparison: bool,
    pub product_reference: Option<String>,
    pub needs_cart_management: bool,
    pub needs_checkout: bool,
}

/// Extracts intent signals from a raw model reply. Models frequently wrap
/// JSON in markdown code fences or surrounding prose, so the first
/// top-level JSON object is located before parsing.
pub fn parse_intent_signals(raw: &str) -> Result<IntentSignals> {
    let json = extract_json_object(raw)
        .ok_or_else(|| LlmError::Parse("no JSON object in intent reply".into()))?;
    serde_json::from_str(json).map_err(|e| LlmError::Parse(format!("bad intent JSON: {e}")))
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let signals = parse_intent_signals(
            r#"{"needs_product_search": true, "search_query": "red jacket"}"#,
        )
        .unwrap();
        assert!(signals.needs_product_search);
        assert_eq!(signals.search_query.as_deref(), Some("red jacket"));
        assert!(!signals.needs_price_comparison);
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "Here is the analysis:\n```json\n{\"needs_price_comparison\": true, \"product_reference\": \"watch\"}\n```";
        let signals = parse_intent_signals(raw).unwrap();
        assert!(signals.needs_price_comparison);
        assert_eq!(signals.product_reference.as_deref(), Some("watch"));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let result = parse_intent_signals("I could not decide.");
        assert!(matches!(result, Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_missing_fields_default_to_general_conversation() {
        let signals = parse_intent_signals("{}").unwrap();
        assert_eq!(signals, IntentSignals::default());
    }
}
