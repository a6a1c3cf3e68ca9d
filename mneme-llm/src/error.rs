//! LLM error types.

use std::fmt;

use mneme_core::MnemeError;
use thiserror::Error;

/// Why a call stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller cancelled the call.
    Cancelled,
    /// The call's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context cancelled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider configuration is invalid. Retrying cannot help.
    #[error("LLM configuration error in `{field}`: {message}")]
    Configuration {
        /// The offending configuration field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Caller input was rejected before any request was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// Network failure, 5xx or 429. Retried by the transport.
    #[error("transient provider error{}: {message}", status_suffix(*status))]
    Transient {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Response body or transport error text.
        message: String,
        /// Underlying HTTP client error.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// A single attempt exceeded its timeout. Retried by the transport.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// The provider rejected the request (e.g. HTTP 400 for context length
    /// exceeded). Never retried.
    #[error("provider rejected request with HTTP {status}: {body}")]
    NonRetryable {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The call context was cancelled or its deadline passed.
    #[error("LLM call stopped: {0}")]
    Cancelled(CancelReason),

    /// All retry attempts exhausted.
    #[error("All LLM retry attempts exhausted after {attempts} tries: {source}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The last transient failure.
        #[source]
        source: Box<LlmError>,
    },

    /// LLM response did not have the expected shape.
    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    /// The provider returned no text.
    #[error("LLM returned an empty completion")]
    EmptyCompletion,

    /// Embedding vectors were missing or malformed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The running summary leaves no room in the context window.
    #[error("summary needs {required} tokens but the context window holds {available}")]
    ContextBudgetExceeded {
        /// Tokens needed before any new message fits.
        required: usize,
        /// Model context window.
        available: usize,
    },

    /// A tokenizer could not be loaded.
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),

    /// The HTTP request could not be built or replayed.
    #[error("LLM request failed: {0}")]
    Request(String),
}

impl LlmError {
    /// Shorthand for a [`LlmError::Configuration`].
    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        LlmError::Configuration {
            field,
            message: message.into(),
        }
    }

    /// Whether the transport may retry after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient { .. } | LlmError::Timeout(_))
    }

    /// Whether the call was cancelled rather than failed.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LlmError::Cancelled(_))
    }

    /// HTTP status carried by this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::Transient { status, .. } => *status,
            LlmError::NonRetryable { status, .. } => Some(*status),
            LlmError::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}

fn status_suffix(status: Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            LlmError::Request(err.to_string())
        } else if err.is_decode() {
            LlmError::Parse(err.to_string())
        } else {
            LlmError::Transient {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl From<MnemeError> for LlmError {
    fn from(err: MnemeError) -> Self {
        match err {
            MnemeError::Validation(msg) => LlmError::Validation(msg),
            MnemeError::Embedding(msg) => LlmError::Embedding(msg),
            MnemeError::Config(msg) => LlmError::config("config", msg),
            MnemeError::Io(e) => LlmError::config("config", e.to_string()),
        }
    }
}
