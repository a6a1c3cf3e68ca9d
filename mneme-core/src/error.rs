//! Error types for the MNEME core library.

use thiserror::Error;

/// Top-level error type for core MNEME operations.
#[derive(Error, Debug)]
pub enum MnemeError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller-supplied input was rejected before any work was done.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A local embedding model failed to produce vectors.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MnemeError {
    fn from(err: config::ConfigError) -> Self {
        MnemeError::Config(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MnemeError>;
