//! # MNEME Core Library
//!
//! Data model shared by a conversational-memory service and its LLM layer:
//!
//! - **Configuration**: provider, embedding and summarizer settings,
//!   loaded once from `mneme.toml` and the environment
//! - **Messages**: the ordered, append-only conversation slice read from
//!   the memory store
//! - **Summaries**: the rolling summary and its summary point
//! - **Local embeddings**: in-process embedding for `service = "local"`
//!
//! Nothing in this crate performs network I/O; see `mneme-llm`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod types;

pub use config::MnemeConfig;
pub use error::MnemeError;
pub use types::*;
