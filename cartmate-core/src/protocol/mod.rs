//! Message protocol for agent-to-agent communication.
//!
//! Defines the envelope format, its closed payload variants, and the
//! validation rules applied both at construction and on receipt. The
//! protocol layer is purely structural: no delivery or handler behavior
//! lives here.

mod types;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn test_validate_accepts_constructed_envelopes() {
        let env = Envelope::notification(
            "bus",
            Recipient::Agent("orchestrator".into()),
            "delivery_failure",
            json!({"message_id": "abc"}),
            MessageContext::new(),
        )
        .unwrap();
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tampered_envelope() {
        let mut env = Envelope::acknowledgment("agent-a", "agent-b", "msg-1").unwrap();
        env.from_agent = String::new();
        assert!(matches!(env.validate(), Err(Error::Validation(_))));
    }
}
