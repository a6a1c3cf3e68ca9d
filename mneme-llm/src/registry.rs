//! Known-model registry.
//!
//! Maps each provider family to the model names it accepts and their
//! context-window sizes. Built once at startup, frozen behind an `Arc`, and
//! passed to every component that validates models or counts tokens.

use std::collections::HashMap;
use std::fmt;

/// Context window assumed for models the registry does not know.
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Provider family a model belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    /// OpenAI models, also served by Azure OpenAI. The embedding-capable set.
    OpenAi,
    /// Self-hosted open-source models.
    OpenSource,
    /// Anthropic models.
    Anthropic,
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => f.write_str("openai"),
            Self::OpenSource => f.write_str("open-source"),
            Self::Anthropic => f.write_str("anthropic"),
        }
    }
}

/// Read-only provider → model → max-token map.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<ProviderFamily, HashMap<String, usize>>,
}

impl ModelRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in model table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new()
            .with_model(ProviderFamily::OpenAi, "gpt-3.5-turbo", 4096)
            .with_model(ProviderFamily::OpenAi, "gpt-3.5-turbo-16k", 16_384)
            .with_model(ProviderFamily::OpenAi, "gpt-4", 8192)
            .with_model(ProviderFamily::OpenAi, "gpt-4-32k", 32_768)
            .with_model(ProviderFamily::OpenSource, "meta-llama/Llama-2-7b-chat-hf", 4096)
            .with_model(ProviderFamily::OpenSource, "meta-llama/Llama-2-13b-chat-hf", 4096)
            .with_model(ProviderFamily::OpenSource, "meta-llama/Llama-2-70b-chat-hf", 4096)
            .with_model(ProviderFamily::Anthropic, "claude-instant-1", 100_000)
            .with_model(ProviderFamily::Anthropic, "claude-2", 100_000)
    }

    /// Add a model. Use while building the registry, before sharing it.
    #[must_use]
    pub fn with_model(
        mut self,
        family: ProviderFamily,
        name: impl Into<String>,
        max_tokens: usize,
    ) -> Self {
        self.models
            .entry(family)
            .or_default()
            .insert(name.into(), max_tokens);
        self
    }

    /// Whether `model` is a known model of `family`.
    #[must_use]
    pub fn is_valid(&self, family: ProviderFamily, model: &str) -> bool {
        self.models
            .get(&family)
            .is_some_and(|models| models.contains_key(model))
    }

    /// Whether any family knows `model`.
    #[must_use]
    pub fn contains(&self, model: &str) -> bool {
        self.models.values().any(|models| models.contains_key(model))
    }

    /// Context window of `model` in any family.
    #[must_use]
    pub fn max_tokens(&self, model: &str) -> Option<usize> {
        self.models
            .values()
            .find_map(|models| models.get(model).copied())
    }

    /// Known model names of `family`, sorted.
    #[must_use]
    pub fn models(&self, family: ProviderFamily) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .models
            .get(&family)
            .map(|models| models.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }
}
