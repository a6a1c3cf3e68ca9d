//! Provider factory.
//!
//! Validates a provider/model/endpoint combination and builds the matching
//! [`LlmClient`]. Misconfiguration always fails with
//! [`LlmError::Configuration`] naming the offending field; the factory never
//! falls back to a different provider.

use std::sync::Arc;

use tracing::info;

use mneme_core::MnemeConfig;
use mneme_core::config::{LlmConfig, LlmService};

use crate::anthropic::AnthropicClient;
use crate::client::LlmClient;
use crate::error::LlmError;
use crate::openai::{OpenAiClient, OpenAiTarget};
use crate::registry::{ModelRegistry, ProviderFamily};
use crate::retry::{RetryPolicy, RetryTransport};
use crate::tokens::TokenCounter;

/// What a resolved client is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Text completions.
    Completion,
    /// Embeddings.
    Embeddings,
}

/// A validated provider selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedProvider {
    /// Public OpenAI API.
    OpenAi {
        /// Registry-validated model.
        model: String,
        /// Optional organization ID.
        organization_id: Option<String>,
    },
    /// Azure OpenAI resource.
    AzureOpenAi {
        /// Resource endpoint.
        endpoint: String,
        /// Completion deployment, used as the model name.
        deployment: String,
        /// Embeddings deployment.
        embedding_deployment: Option<String>,
    },
    /// Self-hosted OpenAI-compatible endpoint.
    Custom {
        /// Base URL.
        endpoint: String,
        /// Unvalidated model name.
        model: String,
    },
    /// Anthropic messages API.
    Anthropic {
        /// Registry-validated model.
        model: String,
    },
}

impl ResolvedProvider {
    /// Model or deployment name.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi { model, .. }
            | Self::Custom { model, .. }
            | Self::Anthropic { model } => model,
            Self::AzureOpenAi { deployment, .. } => deployment,
        }
    }

    /// Registry family used for token counting.
    #[must_use]
    pub fn family(&self) -> ProviderFamily {
        match self {
            Self::OpenAi { .. } | Self::AzureOpenAi { .. } => ProviderFamily::OpenAi,
            Self::Custom { .. } => ProviderFamily::OpenSource,
            Self::Anthropic { .. } => ProviderFamily::Anthropic,
        }
    }
}

/// Builds validated clients from provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderFactory {
    registry: Arc<ModelRegistry>,
    openai_embeddings: bool,
}

impl ProviderFactory {
    /// A factory with OpenAI embeddings disabled.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            openai_embeddings: false,
        }
    }

    /// A factory that knows whether any extractor embeds through OpenAI.
    #[must_use]
    pub fn from_config(registry: Arc<ModelRegistry>, config: &MnemeConfig) -> Self {
        Self::new(registry).with_openai_embeddings(config.extractors.uses_openai_embeddings())
    }

    /// Set whether OpenAI embeddings are enabled system-wide. When they are,
    /// Azure embeddings clients must name an embeddings deployment.
    #[must_use]
    pub fn with_openai_embeddings(mut self, enabled: bool) -> Self {
        self.openai_embeddings = enabled;
        self
    }

    /// The registry used for model validation.
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Validate `config` for `purpose` without building a client.
    ///
    /// # Errors
    /// [`LlmError::Configuration`] naming the offending field.
    pub fn resolve_provider(
        &self,
        config: &LlmConfig,
        purpose: Purpose,
    ) -> Result<ResolvedProvider, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::config("api_key", "API key is required"));
        }

        match config.service {
            LlmService::Anthropic => self.resolve_anthropic(config, purpose),
            LlmService::AzureOpenAi if config.azure_endpoint().is_none() => Err(LlmError::config(
                "azure_endpoint",
                "azure-openai service requires an Azure endpoint",
            )),
            LlmService::OpenSource if config.custom_endpoint().is_none() => Err(LlmError::config(
                "custom_endpoint",
                "open-source service requires a custom endpoint",
            )),
            LlmService::OpenAi
            | LlmService::AzureOpenAi
            | LlmService::OpenSource
            | LlmService::Unset => self.resolve_openai(config, purpose),
        }
    }

    fn resolve_openai(
        &self,
        config: &LlmConfig,
        purpose: Purpose,
    ) -> Result<ResolvedProvider, LlmError> {
        let model = config.model.trim();

        if let Some(endpoint) = config.azure_endpoint() {
            if config.custom_endpoint().is_some() {
                return Err(LlmError::config(
                    "custom_endpoint",
                    "custom endpoint cannot be combined with an Azure endpoint",
                ));
            }
            let deployment = config.azure_deployment().unwrap_or(model);
            if deployment.is_empty() {
                return Err(LlmError::config(
                    "azure_deployment",
                    format!(
                        "invalid llm deployment for {}, deployment name is required",
                        config.service
                    ),
                ));
            }
            let embedding_deployment = config.azure_embedding_deployment().map(str::to_string);
            if purpose == Purpose::Embeddings
                && self.openai_embeddings
                && embedding_deployment.is_none()
            {
                return Err(LlmError::config(
                    "azure_embedding_deployment",
                    format!(
                        "invalid embeddings deployment for {}, deployment name is required",
                        config.service
                    ),
                ));
            }
            return Ok(ResolvedProvider::AzureOpenAi {
                endpoint: endpoint.to_string(),
                deployment: deployment.to_string(),
                embedding_deployment,
            });
        }

        if let Some(endpoint) = config.custom_endpoint() {
            if model.is_empty() {
                return Err(LlmError::config(
                    "model",
                    "model name is required for a custom endpoint",
                ));
            }
            return Ok(ResolvedProvider::Custom {
                endpoint: endpoint.to_string(),
                model: model.to_string(),
            });
        }

        if !self.registry.is_valid(ProviderFamily::OpenAi, model) {
            let message = match purpose {
                Purpose::Completion => {
                    format!("invalid llm model \"{model}\" for {}", config.service)
                }
                Purpose::Embeddings => {
                    format!("embeddings client requires an OpenAI model, got \"{model}\"")
                }
            };
            return Err(LlmError::config("model", message));
        }
        Ok(ResolvedProvider::OpenAi {
            model: model.to_string(),
            organization_id: config.organization_id().map(str::to_string),
        })
    }

    fn resolve_anthropic(
        &self,
        config: &LlmConfig,
        purpose: Purpose,
    ) -> Result<ResolvedProvider, LlmError> {
        if config.custom_endpoint().is_some() {
            return Err(LlmError::config(
                "custom_endpoint",
                "anthropic does not support endpoint overrides",
            ));
        }
        if config.azure_endpoint().is_some() {
            return Err(LlmError::config(
                "azure_endpoint",
                "anthropic does not support endpoint overrides",
            ));
        }
        if purpose == Purpose::Embeddings {
            return Err(LlmError::config("service", "anthropic cannot serve embeddings"));
        }
        let model = config.model.trim();
        if !self.registry.is_valid(ProviderFamily::Anthropic, model) {
            return Err(LlmError::config(
                "model",
                format!("invalid llm model \"{model}\" for anthropic"),
            ));
        }
        Ok(ResolvedProvider::Anthropic {
            model: model.to_string(),
        })
    }

    /// Validate `config` and build a client for `purpose`.
    ///
    /// # Errors
    /// [`LlmError::Configuration`] on an invalid combination,
    /// [`LlmError::Tokenizer`] if the tokenizer cannot be loaded.
    pub fn resolve(
        &self,
        config: &LlmConfig,
        purpose: Purpose,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        let provider = self.resolve_provider(config, purpose)?;
        let counter = TokenCounter::for_model(&self.registry, provider.family(), provider.model())?;
        let transport = RetryTransport::new(RetryPolicy::from_config(config));

        info!(
            service = %config.service,
            model = provider.model(),
            purpose = ?purpose,
            "resolved LLM client"
        );

        let key = config.api_key.trim();
        let client: Arc<dyn LlmClient> = match provider {
            ResolvedProvider::Anthropic { model } => Arc::new(
                AnthropicClient::new(model, key, transport, counter)
                    .with_temperature(config.temperature),
            ),
            ResolvedProvider::OpenAi {
                model,
                organization_id,
            } => {
                let target = OpenAiTarget::public(organization_id);
                Arc::new(
                    OpenAiClient::new(target, model, key, transport, counter)
                        .with_embedding_model(&config.embedding_model)
                        .with_temperature(config.temperature),
                )
            }
            ResolvedProvider::AzureOpenAi {
                endpoint,
                deployment,
                embedding_deployment,
            } => {
                let target = OpenAiTarget::Azure {
                    endpoint,
                    deployment: deployment.clone(),
                    embedding_deployment,
                };
                Arc::new(
                    OpenAiClient::new(target, deployment, key, transport, counter)
                        .with_temperature(config.temperature),
                )
            }
            ResolvedProvider::Custom { endpoint, model } => {
                let target = OpenAiTarget::Custom { base_url: endpoint };
                Arc::new(
                    OpenAiClient::new(target, model, key, transport, counter)
                        .with_embedding_model(&config.embedding_model)
                        .with_temperature(config.temperature),
                )
            }
        };
        Ok(client)
    }

    /// Completion client for `[llm]`.
    ///
    /// # Errors
    /// See [`ProviderFactory::resolve`].
    pub fn resolve_completion_client(
        &self,
        config: &MnemeConfig,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.resolve(&config.llm, Purpose::Completion)
    }

    /// Embeddings client for `[embeddings_client]`, or `[llm]` when absent.
    ///
    /// # Errors
    /// See [`ProviderFactory::resolve`].
    pub fn resolve_embeddings_client(
        &self,
        config: &MnemeConfig,
    ) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.resolve(config.embeddings_llm(), Purpose::Embeddings)
    }

    /// The model or deployment name for logging.
    ///
    /// Not validated when a custom or Azure endpoint is set.
    ///
    /// # Errors
    /// [`LlmError::Configuration`] if the model is empty or unknown.
    pub fn model_name(&self, config: &LlmConfig) -> Result<String, LlmError> {
        let model = config.model.trim();
        if config.azure_endpoint().is_some() {
            let name = config.azure_deployment().unwrap_or(model);
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        } else if config.custom_endpoint().is_some() {
            if !model.is_empty() {
                return Ok(model.to_string());
            }
        } else if self.registry.is_valid(ProviderFamily::OpenAi, model)
            || self.registry.is_valid(ProviderFamily::Anthropic, model)
        {
            return Ok(model.to_string());
        }
        Err(LlmError::config("model", "llm model is not set or is invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ProviderFactory {
        ProviderFactory::new(Arc::new(ModelRegistry::builtin()))
    }

    fn config(service: LlmService, model: &str) -> LlmConfig {
        LlmConfig {
            service,
            model: model.to_string(),
            api_key: "sk-test".to_string(),
            ..LlmConfig::default()
        }
    }

    fn field(err: LlmError) -> &'static str {
        match err {
            LlmError::Configuration { field, .. } => field,
            other => panic!("expected configuration error, got {other}"),
        }
    }

    #[test]
    fn missing_api_key() {
        let mut cfg = config(LlmService::OpenAi, "gpt-4");
        cfg.api_key = "  ".into();
        let err = factory().resolve_provider(&cfg, Purpose::Completion).expect_err("no key");
        assert_eq!(field(err), "api_key");
    }

    #[test]
    fn known_openai_model() {
        let mut cfg = config(LlmService::OpenAi, "gpt-4");
        cfg.organization_id = Some("org-1".into());
        let resolved = factory().resolve_provider(&cfg, Purpose::Completion).expect("valid");
        assert_eq!(
            resolved,
            ResolvedProvider::OpenAi {
                model: "gpt-4".into(),
                organization_id: Some("org-1".into())
            }
        );
    }

    #[test]
    fn unknown_openai_model_rejected() {
        let cfg = config(LlmService::OpenAi, "my-finetune");
        let err = factory().resolve_provider(&cfg, Purpose::Completion).expect_err("unknown");
        assert_eq!(field(err), "model");
    }

    #[test]
    fn unset_service_validated_as_openai() {
        let ok = config(LlmService::Unset, "gpt-3.5-turbo");
        assert!(matches!(
            factory().resolve_provider(&ok, Purpose::Completion),
            Ok(ResolvedProvider::OpenAi { .. })
        ));
        let bad = config(LlmService::Unset, "claude-2");
        assert!(factory().resolve_provider(&bad, Purpose::Completion).is_err());
    }

    #[test]
    fn custom_endpoint_bypasses_registry() {
        let mut cfg = config(LlmService::OpenAi, "local/mistral-7b");
        cfg.custom_endpoint = Some("http://localhost:8000/v1".into());
        let resolved = factory().resolve_provider(&cfg, Purpose::Completion).expect("custom");
        assert_eq!(resolved.family(), ProviderFamily::OpenSource);
        assert_eq!(resolved.model(), "local/mistral-7b");
    }

    #[test]
    fn custom_endpoint_needs_model() {
        let mut cfg = config(LlmService::OpenSource, "");
        cfg.custom_endpoint = Some("http://localhost:8000/v1".into());
        let err = factory().resolve_provider(&cfg, Purpose::Completion).expect_err("empty model");
        assert_eq!(field(err), "model");
    }

    #[test]
    fn azure_deployment_overrides_model() {
        let mut cfg = config(LlmService::AzureOpenAi, "gpt-4");
        cfg.azure_endpoint = Some("https://acme.openai.azure.com".into());
        cfg.azure_deployment = Some("team-chat".into());
        let resolved = factory().resolve_provider(&cfg, Purpose::Completion).expect("azure");
        assert_eq!(resolved.model(), "team-chat");
        assert_eq!(resolved.family(), ProviderFamily::OpenAi);
    }

    #[test]
    fn azure_without_deployment_uses_model() {
        let mut cfg = config(LlmService::OpenAi, "gpt-35-turbo");
        cfg.azure_endpoint = Some("https://acme.openai.azure.com".into());
        let resolved = factory().resolve_provider(&cfg, Purpose::Completion).expect("azure");
        assert_eq!(resolved.model(), "gpt-35-turbo");
    }

    #[test]
    fn azure_and_custom_endpoint_conflict() {
        let mut cfg = config(LlmService::OpenAi, "gpt-4");
        cfg.azure_endpoint = Some("https://acme.openai.azure.com".into());
        cfg.custom_endpoint = Some("http://localhost:8000/v1".into());
        let err = factory().resolve_provider(&cfg, Purpose::Completion).expect_err("conflict");
        assert_eq!(field(err), "custom_endpoint");
    }

    #[test]
    fn azure_embeddings_need_deployment_when_enabled() {
        let mut cfg = config(LlmService::AzureOpenAi, "gpt-4");
        cfg.azure_endpoint = Some("https://acme.openai.azure.com".into());

        let enabled = factory().with_openai_embeddings(true);
        let err = enabled.resolve_provider(&cfg, Purpose::Embeddings).expect_err("missing");
        assert_eq!(field(err), "azure_embedding_deployment");

        // Not required for completions, nor when OpenAI embeddings are off.
        assert!(enabled.resolve_provider(&cfg, Purpose::Completion).is_ok());
        assert!(factory().resolve_provider(&cfg, Purpose::Embeddings).is_ok());

        cfg.azure_embedding_deployment = Some("team-embed".into());
        assert!(enabled.resolve_provider(&cfg, Purpose::Embeddings).is_ok());
    }

    #[test]
    fn service_specific_endpoints_required() {
        let err = factory()
            .resolve_provider(&config(LlmService::AzureOpenAi, "gpt-4"), Purpose::Completion)
            .expect_err("no azure endpoint");
        assert_eq!(field(err), "azure_endpoint");

        let err = factory()
            .resolve_provider(
                &config(LlmService::OpenSource, "meta-llama/Llama-2-7b-chat-hf"),
                Purpose::Completion,
            )
            .expect_err("no custom endpoint");
        assert_eq!(field(err), "custom_endpoint");
    }

    #[test]
    fn anthropic_rules() {
        let cfg = config(LlmService::Anthropic, "claude-2");
        assert_eq!(
            factory().resolve_provider(&cfg, Purpose::Completion).expect("valid"),
            ResolvedProvider::Anthropic { model: "claude-2".into() }
        );

        let err = factory().resolve_provider(&cfg, Purpose::Embeddings).expect_err("no embeddings");
        assert_eq!(field(err), "service");

        let err = factory()
            .resolve_provider(&config(LlmService::Anthropic, "gpt-4"), Purpose::Completion)
            .expect_err("wrong family");
        assert_eq!(field(err), "model");

        let mut cfg = config(LlmService::Anthropic, "claude-2");
        cfg.custom_endpoint = Some("http://localhost".into());
        let err = factory().resolve_provider(&cfg, Purpose::Completion).expect_err("override");
        assert_eq!(field(err), "custom_endpoint");
    }

    #[test]
    fn embeddings_require_openai_model() {
        let cfg = config(LlmService::OpenAi, "meta-llama/Llama-2-7b-chat-hf");
        let err = factory().resolve_provider(&cfg, Purpose::Embeddings).expect_err("not openai");
        assert_eq!(field(err), "model");
    }

    #[test]
    fn blank_endpoints_are_ignored() {
        let mut cfg = config(LlmService::OpenAi, "gpt-4");
        cfg.custom_endpoint = Some("   ".into());
        cfg.azure_endpoint = Some(String::new());
        assert!(matches!(
            factory().resolve_provider(&cfg, Purpose::Completion),
            Ok(ResolvedProvider::OpenAi { .. })
        ));
    }

    #[test]
    fn resolve_builds_client() {
        let client = factory()
            .resolve(&config(LlmService::OpenAi, "gpt-4"), Purpose::Completion)
            .expect("client");
        assert_eq!(client.model_name(), "gpt-4");
        assert_eq!(client.max_tokens(), 8192);
    }

    #[test]
    fn embeddings_client_falls_back_to_llm_section() {
        let config = MnemeConfig::from_toml(
            r#"
            [llm]
            service = "anthropic"
            model = "claude-2"
            api_key = "sk-ant"

            [embeddings_client]
            service = "openai"
            model = "gpt-3.5-turbo"
            api_key = "sk-openai"
            "#,
        )
        .expect("config");
        let factory = ProviderFactory::from_config(Arc::new(ModelRegistry::builtin()), &config);
        let client = factory.resolve_embeddings_client(&config).expect("embeddings client");
        assert_eq!(client.model_name(), "gpt-3.5-turbo");
        let client = factory.resolve_completion_client(&config).expect("completion client");
        assert_eq!(client.model_name(), "claude-2");
    }

    #[test]
    fn model_name_rules() {
        let f = factory();
        assert_eq!(f.model_name(&config(LlmService::OpenAi, "gpt-4")).expect("valid"), "gpt-4");
        assert_eq!(
            f.model_name(&config(LlmService::Anthropic, "claude-2"))
                .expect("valid"),
            "claude-2"
        );
        assert!(f.model_name(&config(LlmService::OpenAi, "")).is_err());
        assert!(f.model_name(&config(LlmService::OpenAi, "unknown")).is_err());

        let mut custom = config(LlmService::OpenAi, "unknown");
        custom.custom_endpoint = Some("http://localhost".into());
        assert_eq!(f.model_name(&custom).expect("custom"), "unknown");

        let mut azure = config(LlmService::OpenAi, "gpt-4");
        azure.azure_endpoint = Some("https://acme.openai.azure.com".into());
        azure.azure_deployment = Some("team-chat".into());
        assert_eq!(f.model_name(&azure).expect("azure"), "team-chat");
    }
}
