//! Chat-completion API client implementation
//! Handles direct communication with the configured reasoning endpoint

use crate::{ChatConfig, LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Minimal chat-completion surface the orchestrator reasons through.
/// Implemented by [`ChatClient`] for the real endpoint and by test fakes.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Sends one prompt and returns the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// Client for making chat-completion API calls
pub struct ChatClient {
    config: ChatConfig,
    http_client: reqwest::Client,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn map_send_error(err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl ChatCompletion for ChatClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!(model = %self.config.model, "sending chat completion request");
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("chat completion request failed: {e}");
                Self::map_send_error(e)
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::Auth(format!("endpoint rejected credentials ({status})")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimit("endpoint throttled the request".into()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, "chat completion API error: {detail}");
            return Err(LlmError::Api(format!("{status}: {detail}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("malformed completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Parse("completion response had no choices".into()))
    }
}
