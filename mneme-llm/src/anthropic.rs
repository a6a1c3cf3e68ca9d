//! Anthropic messages API client. Completions only.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{COMPLETION_TIMEOUT, CompletionOptions, LlmClient};
use crate::context::CallContext;
use crate::error::LlmError;
use crate::retry::RetryTransport;
use crate::tokens::TokenCounter;

/// Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
/// Value of the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Output token limit when the caller sets none. The messages API requires one.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;

/// Client for the Anthropic messages API.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    transport: RetryTransport,
    counter: TokenCounter,
}

impl AnthropicClient {
    /// Create a client for `model`.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        transport: RetryTransport,
        counter: TokenCounter,
    ) -> Self {
        Self {
            base_url: ANTHROPIC_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: 0.0,
            transport,
            counter,
        }
    }

    /// Send requests to a different base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Default sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        ctx: &CallContext,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let ctx = ctx.with_timeout(COMPLETION_TIMEOUT);

        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            "messages": [
                { "role": "user", "content": prompt },
            ],
            "temperature": options.temperature.unwrap_or(self.temperature),
        });
        if !options.stop.is_empty() {
            body["stop_sequences"] = json!(options.stop);
        }

        debug!(
            model = %self.model,
            prompt_tokens = self.counter.count(prompt),
            "dispatching messages request"
        );
        let request = self
            .transport
            .http()
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .build()?;
        let json: Value = self.transport.send(&ctx, request).await?.json()?;

        let blocks = json["content"]
            .as_array()
            .ok_or_else(|| LlmError::Parse("missing content blocks".into()))?;
        let text: String = blocks
            .iter()
            .filter(|b| b["type"] == "text")
            .filter_map(|b| b["text"].as_str())
            .collect();

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text.to_string())
    }

    async fn embed(
        &self,
        _ctx: &CallContext,
        _texts: &[String],
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        Err(LlmError::config(
            "service",
            "anthropic does not provide embeddings",
        ))
    }

    fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
