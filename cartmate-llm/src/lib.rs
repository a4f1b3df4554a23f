//! Chat-completion integration for CartMate
//! Provides the bounded, timeout-guarded remote reasoning calls used for
//! intent analysis and response synthesis

mod client;
mod error;
pub mod prompt;
mod response;

pub use client::{ChatClient, ChatCompletion};
pub use error::{LlmError, Result};
pub use response::{parse_intent_signals, IntentSignals};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the chat-completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Base URL of the chat-completion API
    pub api_url: String,
    /// API key for authentication
    pub api_key: String,
    /// Model identifier to request
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: usize,
    /// Temperature for generation
    pub temperature: f32,
    /// Whole-request time budget
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl ChatConfig {
    /// Reads endpoint settings from `CARTMATE_LLM_URL`, `CARTMATE_LLM_KEY`,
    /// and `CARTMATE_LLM_MODEL`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CARTMATE_LLM_URL") {
            config.api_url = url;
        }
        if let Ok(key) = std::env::var("CARTMATE_LLM_KEY") {
            config.api_key = key;
        }
        if let Ok(model) = std::env::var("CARTMATE_LLM_MODEL") {
            config.model = model;
        }
        config
    }
}

/// Seconds-based serde representation for durations in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
