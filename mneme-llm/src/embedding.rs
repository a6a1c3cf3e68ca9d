//! Embedding routing.
//!
//! Picks the remote embeddings client or the in-process
//! [`LocalEmbedder`] from the embedding model configured for each document
//! type, and checks the returned batch.

use std::sync::Arc;

use tracing::debug;

use mneme_core::config::ExtractorsConfig;
use mneme_core::embedding::{LocalEmbedder, check_batch};
use mneme_core::{DocumentType, EmbeddingModel, EmbeddingService};

use crate::client::LlmClient;
use crate::context::CallContext;
use crate::error::LlmError;

/// Routes embedding requests to the configured provider.
#[derive(Clone)]
pub struct EmbeddingRouter {
    extractors: ExtractorsConfig,
    remote: Option<Arc<dyn LlmClient>>,
    local: Option<Arc<dyn LocalEmbedder>>,
}

impl std::fmt::Debug for EmbeddingRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRouter")
            .field("remote", &self.remote.as_ref().map(|c| c.model_name().to_string()))
            .field("local", &self.local.as_ref().map(|e| e.model_name().to_string()))
            .finish_non_exhaustive()
    }
}

impl EmbeddingRouter {
    /// A router with no embedders attached.
    #[must_use]
    pub fn new(extractors: ExtractorsConfig) -> Self {
        Self {
            extractors,
            remote: None,
            local: None,
        }
    }

    /// Attach the remote embeddings client.
    #[must_use]
    pub fn with_remote(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.remote = Some(client);
        self
    }

    /// Attach the local embedder.
    #[must_use]
    pub fn with_local(mut self, embedder: Arc<dyn LocalEmbedder>) -> Self {
        self.local = Some(embedder);
        self
    }

    /// The embedding model configured for `document_type`.
    #[must_use]
    pub fn embedding_model(&self, document_type: DocumentType) -> EmbeddingModel {
        self.extractors.embedding_model(document_type)
    }

    /// Like [`EmbeddingRouter::embedding_model`], parsing the document type.
    ///
    /// # Errors
    /// [`LlmError::Validation`] for anything but `message` or `document`.
    pub fn embedding_model_for(&self, document_type: &str) -> Result<EmbeddingModel, LlmError> {
        let document_type: DocumentType = document_type.parse()?;
        Ok(self.embedding_model(document_type))
    }

    /// Embed `texts` with `model`.
    ///
    /// # Errors
    /// - [`LlmError::Validation`] when `texts` is empty.
    /// - [`LlmError::Configuration`] when the needed embedder is not attached.
    /// - [`LlmError::Embedding`] when the batch has the wrong count or
    ///   dimensions.
    /// - Transport and cancellation errors from the remote client.
    pub async fn embed_texts(
        &self,
        ctx: &CallContext,
        model: &EmbeddingModel,
        document_type: DocumentType,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Err(LlmError::Validation("no texts to embed".into()));
        }

        let vectors = match model.service {
            EmbeddingService::Local => {
                let embedder = self
                    .local
                    .clone()
                    .ok_or_else(|| LlmError::config("service", "no local embedder configured"))?;
                debug!(
                    %document_type,
                    count = texts.len(),
                    model = embedder.model_name(),
                    "embedding locally"
                );
                let batch = texts.to_vec();
                let task = tokio::task::spawn_blocking(move || {
                    embedder.embed_local(document_type, &batch)
                });
                ctx.run(task).await?.map_err(|e| {
                    LlmError::Embedding(format!("local embedding task failed: {e}"))
                })??
            }
            EmbeddingService::OpenAi => {
                let client = self
                    .remote
                    .as_ref()
                    .ok_or_else(|| {
                        LlmError::config(
                            "embeddings_client",
                            "no remote embeddings client configured",
                        )
                    })?;
                debug!(
                    %document_type,
                    count = texts.len(),
                    model = client.model_name(),
                    "embedding remotely"
                );
                client.embed(ctx, texts).await?
            }
        };

        check_batch(&vectors, texts.len(), model.dimensions)?;
        Ok(vectors)
    }
}
