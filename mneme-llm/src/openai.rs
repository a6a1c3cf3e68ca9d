//! OpenAI-compatible client: public OpenAI, Azure OpenAI and custom
//! self-hosted endpoints.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{COMPLETION_TIMEOUT, CompletionOptions, EMBEDDING_TIMEOUT, LlmClient};
use crate::context::CallContext;
use crate::error::LlmError;
use crate::retry::{Reply, RetryTransport};
use crate::tokens::TokenCounter;

/// Public OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Azure OpenAI REST API version.
pub const AZURE_API_VERSION: &str = "2023-05-15";

/// Where an [`OpenAiClient`] sends its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenAiTarget {
    /// The public OpenAI API.
    Public {
        /// Base URL, normally [`OPENAI_BASE_URL`].
        base_url: String,
        /// Sent as `OpenAI-Organization` when set.
        organization_id: Option<String>,
    },
    /// An Azure OpenAI resource.
    Azure {
        /// Resource endpoint.
        endpoint: String,
        /// Completion deployment.
        deployment: String,
        /// Embeddings deployment.
        embedding_deployment: Option<String>,
    },
    /// A self-hosted OpenAI-compatible endpoint.
    Custom {
        /// Base URL of the endpoint.
        base_url: String,
    },
}

impl OpenAiTarget {
    /// The public API, optionally scoped to an organization.
    #[must_use]
    pub fn public(organization_id: Option<String>) -> Self {
        Self::Public {
            base_url: OPENAI_BASE_URL.to_string(),
            organization_id,
        }
    }

    fn chat_url(&self) -> String {
        match self {
            Self::Public { base_url, .. } | Self::Custom { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Self::Azure {
                endpoint, deployment, ..
            } => azure_url(endpoint, deployment, "chat/completions"),
        }
    }

    fn embeddings_url(&self) -> Result<String, LlmError> {
        match self {
            Self::Public { base_url, .. } | Self::Custom { base_url } => {
                Ok(format!("{}/embeddings", base_url.trim_end_matches('/')))
            }
            Self::Azure {
                endpoint,
                embedding_deployment,
                ..
            } => embedding_deployment
                .as_deref()
                .map(|deployment| azure_url(endpoint, deployment, "embeddings"))
                .ok_or_else(|| {
                    LlmError::config(
                        "azure_embedding_deployment",
                        "embeddings deployment name is required for Azure OpenAI embeddings",
                    )
                }),
        }
    }
}

fn azure_url(endpoint: &str, deployment: &str, operation: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment}/{operation}?api-version={AZURE_API_VERSION}",
        endpoint.trim_end_matches('/')
    )
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for OpenAI-compatible chat-completions and embeddings APIs.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    target: OpenAiTarget,
    model: String,
    embedding_model: String,
    api_key: String,
    temperature: f32,
    transport: RetryTransport,
    counter: TokenCounter,
}

impl OpenAiClient {
    /// Create a client for `model` at `target`.
    #[must_use]
    pub fn new(
        target: OpenAiTarget,
        model: impl Into<String>,
        api_key: impl Into<String>,
        transport: RetryTransport,
        counter: TokenCounter,
    ) -> Self {
        Self {
            target,
            model: model.into(),
            embedding_model: "text-embedding-ada-002".to_string(),
            api_key: api_key.into(),
            temperature: 0.0,
            transport,
            counter,
        }
    }

    /// Embedding model for non-Azure targets.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Default sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Where requests go.
    #[must_use]
    pub fn target(&self) -> &OpenAiTarget {
        &self.target
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.target {
            OpenAiTarget::Azure { .. } => builder.header("api-key", &self.api_key),
            OpenAiTarget::Public {
                organization_id: Some(org),
                ..
            } => builder
                .bearer_auth(&self.api_key)
                .header("OpenAI-Organization", org),
            OpenAiTarget::Public { .. } | OpenAiTarget::Custom { .. } => {
                builder.bearer_auth(&self.api_key)
            }
        }
    }

    async fn post_json(
        &self,
        ctx: &CallContext,
        url: &str,
        body: &Value,
    ) -> Result<Reply, LlmError> {
        let request = self
            .authorize(self.transport.http().post(url))
            .json(body)
            .build()?;
        self.transport.send(ctx, request).await
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        ctx: &CallContext,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let ctx = ctx.with_timeout(COMPLETION_TIMEOUT);

        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt },
            ],
            "temperature": options.temperature.unwrap_or(self.temperature),
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !options.stop.is_empty() {
            body["stop"] = json!(options.stop);
        }

        debug!(
            model = %self.model,
            prompt_tokens = self.counter.count(prompt),
            "dispatching chat completion"
        );
        let json: Value = self
            .post_json(&ctx, &self.target.chat_url(), &body)
            .await?
            .json()?;

        let text = json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".into()))?
            .trim();
        if text.is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text.to_string())
    }

    async fn embed(&self, ctx: &CallContext, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Err(LlmError::Validation("no texts to embed".into()));
        }
        let url = self.target.embeddings_url()?;
        let ctx = ctx.with_timeout(EMBEDDING_TIMEOUT);

        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });
        debug!(
            model = %self.embedding_model,
            count = texts.len(),
            "dispatching embeddings request"
        );
        let mut parsed: EmbeddingResponse = self.post_json(&ctx, &url, &body).await?.json()?;

        if parsed.data.len() != texts.len() {
            return Err(LlmError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn token_counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
