//! Error types for the chat-completion integration
//! Provides custom error handling for remote reasoning failures

use cartmate_core::error::Error as CoreError;
use thiserror::Error;

/// Custom error types for chat-completion operations
#[derive(Error, Debug)]
pub enum LlmError {
    /// API authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The request exceeded its time budget
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection/network errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Response parsing errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// API-reported errors
    #[error("API error: {0}")]
    Api(String),
}

impl From<LlmError> for CoreError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(msg) => CoreError::Timeout(msg),
            LlmError::Parse(msg) => CoreError::Serialization(msg),
            LlmError::Auth(msg)
            | LlmError::RateLimit(msg)
            | LlmError::Connection(msg)
            | LlmError::Api(msg) => CoreError::ExternalService(msg),
        }
    }
}

/// Convenience Result type for chat-completion operations
pub type Result<T> = std::result::Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let llm_err = LlmError::Timeout("budget elapsed".into());
        let core_err: CoreError = llm_err.into();
        match core_err {
            CoreError::Timeout(msg) => assert_eq!(msg, "budget elapsed"),
            _ => panic!("wrong error conversion"),
        }

        let llm_err = LlmError::RateLimit("too many requests".into());
        let core_err: CoreError = llm_err.into();
        assert!(matches!(core_err, CoreError::ExternalService(_)));
    }

    #[test]
    fn test_error_display() {
        let err = LlmError::Auth("invalid key".into());
        assert_eq!(err.to_string(), "Authentication failed: invalid key");
    }
}
