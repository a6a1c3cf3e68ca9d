//! Local embedding capability.
//!
//! Documents and messages whose embedding service is `local` are embedded
//! in-process through a [`LocalEmbedder`]. The production implementation uses
//! ONNX Runtime (via `fastembed-rs`, behind the `onnx` feature) with the
//! `all-MiniLM-L6-v2` model. A stub implementation is provided for tests
//! and for deployments that only need the remote path.

use crate::error::{MnemeError, Result};
use crate::types::DocumentType;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings in-process.
///
/// Implementations are CPU-bound and synchronous; async callers should run
/// them on a blocking thread. Must be `Send + Sync` for shared use.
pub trait LocalEmbedder: Send + Sync {
    /// Embed a batch of texts of the given document type.
    ///
    /// Returns one vector of `dimensions()` floats per text, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`MnemeError::Embedding`] if the model fails to produce an
    /// embedding.
    fn embed_local(
        &self,
        document_type: DocumentType,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of embeddings produced by this embedder.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the model (e.g. `"all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Stub / Zero-cost embedder
// ---------------------------------------------------------------------------

/// A stub embedder that returns zero-vectors.
pub struct StubEmbedder {
    dims: usize,
}

impl StubEmbedder {
    /// Create a new stub embedder with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl LocalEmbedder for StubEmbedder {
    fn embed_local(
        &self,
        _document_type: DocumentType,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; self.dims]).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// ONNX embedder
// ---------------------------------------------------------------------------

/// ONNX-backed local embedder using `all-MiniLM-L6-v2` (384 dimensions).
///
/// The model (~80 MB) is downloaded to the `fastembed` cache on first use.
#[cfg(feature = "onnx")]
pub struct OnnxEmbedder {
    model: fastembed::TextEmbedding,
}

#[cfg(feature = "onnx")]
impl OnnxEmbedder {
    /// Load the default model.
    ///
    /// # Errors
    ///
    /// Returns [`MnemeError::Embedding`] if the ONNX model cannot be loaded.
    pub fn new() -> Result<Self> {
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| MnemeError::Embedding(e.to_string()))?;
        tracing::info!(model = "all-MiniLM-L6-v2", "loaded local embedding model");
        Ok(Self { model })
    }
}

#[cfg(feature = "onnx")]
impl LocalEmbedder for OnnxEmbedder {
    fn embed_local(&self, _document_type: DocumentType, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| MnemeError::Embedding(e.to_string()))
    }

    fn dimensions(&self) -> usize {
        384
    }

    fn model_name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}

/// Check that an embedder returned one vector of the expected size per text.
///
/// # Errors
///
/// Returns [`MnemeError::Embedding`] on a count or dimension mismatch.
pub fn check_batch(vectors: &[Vec<f32>], expected_count: usize, dimensions: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(MnemeError::Embedding(format!(
            "expected {expected_count} embeddings, got {}",
            vectors.len()
        )));
    }
    if dimensions > 0 {
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(MnemeError::Embedding(format!(
                "expected {dimensions} dimensions, got {}",
                bad.len()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
