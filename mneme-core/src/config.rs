//! Configuration for the MNEME LLM layer.
//!
//! Maps directly to `mneme.toml`. Every field has a serde default, so an
//! empty file is a valid configuration. [`MnemeConfig::load`] layers the
//! file under `MNEME_`-prefixed environment variables.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{DocumentType, EmbeddingModel, EmbeddingService};

/// Environment variable prefix for layered configuration.
pub const ENV_PREFIX: &str = "MNEME";

/// Shortcut environment variable for `llm.api_key`.
pub const API_KEY_ENV: &str = "MNEME_OPENAI_API_KEY";

/// Top-level MNEME configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemeConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Completion provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Separate provider settings for the embeddings client.
    /// Falls back to `llm` when absent.
    #[serde(default)]
    pub embeddings_client: Option<LlmConfig>,
    /// Conversation memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Per-document-type extractor settings.
    #[serde(default)]
    pub extractors: ExtractorsConfig,
}

impl MnemeConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MnemeError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MnemeError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from an optional TOML file overlaid with the
    /// process environment (`MNEME_LLM__MODEL=gpt-4`, …).
    ///
    /// # Errors
    /// Returns `MnemeError::Config` if a source cannot be parsed.
    pub fn load(path: Option<&Path>) -> crate::error::Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`MnemeConfig::load`], reading variables from `env` instead of
    /// the process environment when given.
    ///
    /// # Errors
    /// Returns `MnemeError::Config` if a source cannot be parsed.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let api_key = match &env {
            Some(vars) => vars.get(API_KEY_ENV).cloned(),
            None => std::env::var(API_KEY_ENV).ok(),
        }
        .filter(|key| !key.is_empty());
        tracing::debug!(path = ?path, from_process_env = env.is_none(), "loading configuration");

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .source(env.map(|vars| vars.into_iter().collect()));

        let settings = builder
            .add_source(environment)
            .set_override_option("llm.api_key", api_key)?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Provider settings used for the embeddings client.
    #[must_use]
    pub fn embeddings_llm(&self) -> &LlmConfig {
        self.embeddings_client.as_ref().unwrap_or(&self.llm)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Which LLM service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LlmService {
    /// OpenAI, or Azure OpenAI when `azure_endpoint` is set.
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure-hosted OpenAI deployment.
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
    /// Anthropic messages API.
    #[serde(rename = "anthropic")]
    Anthropic,
    /// Self-hosted model behind an OpenAI-compatible endpoint.
    #[serde(rename = "open-source")]
    OpenSource,
    /// Not configured; treated as OpenAI for backward compatibility.
    #[default]
    #[serde(rename = "")]
    Unset,
}

impl std::fmt::Display for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure-openai",
            Self::Anthropic => "anthropic",
            Self::OpenSource => "open-source",
            Self::Unset => "unset",
        };
        f.write_str(name)
    }
}

/// Declarative provider configuration. Validated by the provider factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider service.
    #[serde(default)]
    pub service: LlmService,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    #[serde(default)]
    pub api_key: String,
    /// Base URL of a custom OpenAI-compatible endpoint.
    #[serde(default)]
    pub custom_endpoint: Option<String>,
    /// Azure OpenAI resource endpoint.
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    /// Azure completion deployment; overrides `model` when set.
    #[serde(default)]
    pub azure_deployment: Option<String>,
    /// Azure embeddings deployment.
    #[serde(default)]
    pub azure_embedding_deployment: Option<String>,
    /// OpenAI organization ID.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Embedding model for non-Azure OpenAI-compatible endpoints.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Per-attempt HTTP timeout in milliseconds.
    #[serde(default = "default_90000")]
    pub request_timeout_ms: u64,
    /// Total HTTP attempts per call, including the first.
    #[serde(default = "default_5")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds.
    #[serde(default = "default_1000")]
    pub initial_backoff_ms: u64,
    /// Upper bound on retry delays in milliseconds.
    #[serde(default = "default_30000")]
    pub max_backoff_ms: u64,
    /// Default sampling temperature.
    #[serde(default)]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            service: LlmService::Unset,
            model: default_model(),
            api_key: String::new(),
            custom_endpoint: None,
            azure_endpoint: None,
            azure_deployment: None,
            azure_embedding_deployment: None,
            organization_id: None,
            embedding_model: default_embedding_model(),
            request_timeout_ms: 90_000,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    /// Custom endpoint, ignoring blank values.
    #[must_use]
    pub fn custom_endpoint(&self) -> Option<&str> {
        non_blank(self.custom_endpoint.as_deref())
    }

    /// Azure endpoint, ignoring blank values.
    #[must_use]
    pub fn azure_endpoint(&self) -> Option<&str> {
        non_blank(self.azure_endpoint.as_deref())
    }

    /// Azure completion deployment, ignoring blank values.
    #[must_use]
    pub fn azure_deployment(&self) -> Option<&str> {
        non_blank(self.azure_deployment.as_deref())
    }

    /// Azure embeddings deployment, ignoring blank values.
    #[must_use]
    pub fn azure_embedding_deployment(&self) -> Option<&str> {
        non_blank(self.azure_embedding_deployment.as_deref())
    }

    /// Organization ID, ignoring blank values.
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        non_blank(self.organization_id.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Conversation memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Messages kept in the window before summarization kicks in.
    #[serde(default = "default_12")]
    pub message_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { message_window: 12 }
    }
}

/// Embedding settings for one document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    /// Whether texts of this type are embedded at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where the vectors are computed.
    #[serde(default)]
    pub service: EmbeddingService,
    /// Vector size.
    #[serde(default = "default_384")]
    pub dimensions: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service: EmbeddingService::Local,
            dimensions: 384,
        }
    }
}

impl EmbeddingsConfig {
    /// Whether this extractor relies on the OpenAI embeddings path.
    #[must_use]
    pub fn uses_openai(&self) -> bool {
        self.enabled && self.service == EmbeddingService::OpenAi
    }
}

/// Summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Whether conversations are summarized.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Newest messages always left out of the summary, on top of half the
    /// window.
    #[serde(default)]
    pub min_pending_messages: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pending_messages: 0,
        }
    }
}

/// Extractors applied to conversation messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageExtractorsConfig {
    /// Message embeddings.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    /// Rolling summaries.
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

/// Extractors applied to ingested documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentExtractorsConfig {
    /// Document embeddings.
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

/// Per-document-type extractor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractorsConfig {
    /// Message extractors.
    #[serde(default)]
    pub messages: MessageExtractorsConfig,
    /// Document extractors.
    #[serde(default)]
    pub documents: DocumentExtractorsConfig,
}

impl ExtractorsConfig {
    /// Embedding settings for a document type.
    #[must_use]
    pub fn embeddings(&self, document_type: DocumentType) -> &EmbeddingsConfig {
        match document_type {
            DocumentType::Message => &self.messages.embeddings,
            DocumentType::Document => &self.documents.embeddings,
        }
    }

    /// The embedding model configured for a document type.
    #[must_use]
    pub fn embedding_model(&self, document_type: DocumentType) -> EmbeddingModel {
        let cfg = self.embeddings(document_type);
        EmbeddingModel {
            service: cfg.service,
            dimensions: cfg.dimensions,
        }
    }

    /// True if any enabled extractor embeds through OpenAI.
    #[must_use]
    pub fn uses_openai_embeddings(&self) -> bool {
        self.messages.embeddings.uses_openai() || self.documents.embeddings.uses_openai()
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_embedding_model() -> String { "text-embedding-ada-002".to_string() }
fn default_5() -> u32 { 5 }
fn default_12() -> usize { 12 }
fn default_384() -> usize { 384 }
fn default_1000() -> u64 { 1000 }
fn default_30000() -> u64 { 30_000 }
fn default_90000() -> u64 { 90_000 }
