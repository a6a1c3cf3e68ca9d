//! Provider-neutral client capability.
//!
//! A client is bound to one resolved provider and model. It owns one
//! [`RetryTransport`](crate::retry::RetryTransport) and one
//! [`TokenCounter`], and is shared as `Arc<dyn LlmClient>`.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::LlmError;
use crate::tokens::TokenCounter;

/// Upper bound on a whole `complete` call, retries included.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(90);
/// Upper bound on a whole `embed` call, retries included.
pub const EMBEDDING_TIMEOUT: Duration = Duration::from_secs(90);

/// Per-call completion settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    /// Sampling temperature. The client's configured default when `None`.
    pub temperature: Option<f32>,
    /// Output token limit.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl CompletionOptions {
    /// Override the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Limit output tokens.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Add a stop sequence.
    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Completion and embedding calls against one provider/model.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate text for `prompt`.
    ///
    /// # Errors
    /// Transport, cancellation, parse errors, or
    /// [`LlmError::EmptyCompletion`] when the provider returns no text.
    async fn complete(
        &self,
        ctx: &CallContext,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;

    /// Embed `texts`, one vector per text in input order.
    ///
    /// # Errors
    /// [`LlmError::Validation`] for empty input, transport and cancellation
    /// errors, or [`LlmError::Configuration`] if the provider cannot embed.
    async fn embed(&self, ctx: &CallContext, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Tokenizer for the bound model.
    fn token_counter(&self) -> &TokenCounter;

    /// Tokens in `text` for the bound model.
    fn count_tokens(&self, text: &str) -> usize {
        self.token_counter().count(text)
    }

    /// Context window of the bound model.
    fn max_tokens(&self) -> usize {
        self.token_counter().max_tokens()
    }

    /// Model or deployment name.
    fn model_name(&self) -> &str;
}
