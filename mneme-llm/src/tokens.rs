//! Token counting against provider context limits.
//!
//! Counts use a byte-pair encoding from `tiktoken-rs`: the model's own
//! encoding when it is known to `tiktoken`, `cl100k_base` for the other
//! registry models and for OpenAI-hosted deployments. Unknown custom models
//! fall back to a character heuristic and report [`TokenCounter::is_approximate`].

use std::fmt;
use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::LlmError;
use crate::registry::{DEFAULT_MAX_TOKENS, ModelRegistry, ProviderFamily};

/// Characters per token for the heuristic estimate.
const CHARS_PER_TOKEN: f64 = 4.0;
/// Safety margin applied to the heuristic estimate.
const ESTIMATE_MARGIN: f64 = 1.1;

#[derive(Clone)]
enum Encoding {
    Bpe(Arc<CoreBPE>),
    Estimate,
}

/// Token counter bound to one model.
#[derive(Clone)]
pub struct TokenCounter {
    encoding: Encoding,
    max_tokens: usize,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("approximate", &self.is_approximate())
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl TokenCounter {
    /// Build the counter for `model` of `family`.
    ///
    /// # Errors
    /// Returns [`LlmError::Tokenizer`] if the BPE tables cannot be loaded.
    pub fn for_model(
        registry: &ModelRegistry,
        family: ProviderFamily,
        model: &str,
    ) -> Result<Self, LlmError> {
        let max_tokens = registry.max_tokens(model).unwrap_or(DEFAULT_MAX_TOKENS);

        let encoding = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => Encoding::Bpe(Arc::new(bpe)),
            Err(_) if family == ProviderFamily::OpenAi || registry.contains(model) => {
                let bpe = tiktoken_rs::cl100k_base()
                    .map_err(|e| LlmError::Tokenizer(e.to_string()))?;
                Encoding::Bpe(Arc::new(bpe))
            }
            Err(_) => {
                tracing::debug!(model, "no tokenizer for model, estimating token counts");
                Encoding::Estimate
            }
        };

        Ok(Self { encoding, max_tokens })
    }

    /// A heuristic counter with the given context window.
    #[must_use]
    pub fn estimating(max_tokens: usize) -> Self {
        Self {
            encoding: Encoding::Estimate,
            max_tokens,
        }
    }

    /// Number of tokens in `text`.
    #[must_use]
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match &self.encoding {
            Encoding::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
            Encoding::Estimate => estimate(text),
        }
    }

    /// The model's context window.
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// True when counts are heuristic estimates.
    #[must_use]
    pub fn is_approximate(&self) -> bool {
        matches!(self.encoding, Encoding::Estimate)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn estimate(text: &str) -> usize {
    let chars = text.chars().count() as f64;
    (chars / CHARS_PER_TOKEN * ESTIMATE_MARGIN).ceil() as usize
}
