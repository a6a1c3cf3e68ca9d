//! # mneme-llm: LLM access layer for MNEME
//!
//! Everything in MNEME that talks to a model provider goes through this
//! crate:
//!   - **Provider resolution**: OpenAI, Azure OpenAI, Anthropic and
//!     self-hosted OpenAI-compatible endpoints, validated against a
//!     read-only [`ModelRegistry`]
//!   - **Resilient transport**: bounded retries with exponential backoff,
//!     per-attempt timeouts, cancellation and deadlines
//!   - **Token budgets**: BPE token counting per model
//!   - **Embedding routing**: remote provider or in-process embedder per
//!     document type
//!   - **Rolling summaries**: folding older messages into a running summary
//!
//! # Architecture
//!
//! ```text
//! MnemeConfig ──► ProviderFactory ──► Arc<dyn LlmClient> ──► RetryTransport ──► HTTP
//!                                          ▲      ▲
//!                            Summarizer ───┘      └─── EmbeddingRouter ──► LocalEmbedder
//! ```

pub mod anthropic;
pub mod client;
pub mod context;
pub mod embedding;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod summarize;
pub mod tokens;

pub use client::{CompletionOptions, LlmClient};
pub use context::CallContext;
pub use embedding::EmbeddingRouter;
pub use error::{CancelReason, LlmError};
pub use provider::{ProviderFactory, Purpose, ResolvedProvider};
pub use registry::{ModelRegistry, ProviderFamily};
pub use retry::{Reply, RetryPolicy, RetryTransport};
pub use summarize::{SummaryPlan, Summarizer};
pub use tokens::TokenCounter;
