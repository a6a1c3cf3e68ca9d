//! Core type definitions shared by the memory store and the LLM layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MnemeError;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Messages & Summaries
// ---------------------------------------------------------------------------

/// One message of a conversation, as read from the memory store.
///
/// Messages are append-only and ordered oldest → newest by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier.
    pub id: MessageId,
    /// Speaker role, e.g. `"human"` or `"ai"`.
    pub role: String,
    /// Message text. May be empty.
    pub content: String,
    /// Free-form metadata attached by the store.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// When the message was written.
    pub created_at: DateTime<Utc>,
    /// Token count recorded by the store, 0 if unknown.
    #[serde(default)]
    pub token_count: usize,
}

impl Message {
    /// Create a message with a fresh ID and the current timestamp.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: role.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
            token_count: 0,
        }
    }

    /// Whether the message carries any text.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// A rolling summary of the older part of a conversation.
///
/// `summary_point_id` is the newest message already folded into `content`;
/// it splits the conversation into summarized and pending messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Summary text.
    pub content: String,
    /// Token count of `content`.
    pub token_count: usize,
    /// Newest message covered by this summary, `None` for the empty summary.
    pub summary_point_id: Option<MessageId>,
}

impl Summary {
    /// Whether this is the empty summary (nothing summarized yet).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.summary_point_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// The kind of text being embedded. Each kind has its own embedding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// A conversation message.
    Message,
    /// An ingested document.
    Document,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Document => write!(f, "document"),
        }
    }
}

impl FromStr for DocumentType {
    type Err = MnemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(Self::Message),
            "document" => Ok(Self::Document),
            other => Err(MnemeError::Validation(format!(
                "invalid document type: {other:?}"
            ))),
        }
    }
}

/// Where embeddings for a document type are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingService {
    /// In-process embedding model.
    #[default]
    Local,
    /// OpenAI-compatible embeddings API (OpenAI, Azure or custom endpoint).
    OpenAi,
}

impl fmt::Display for EmbeddingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Embedding settings resolved for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    /// Which service computes the vectors.
    pub service: EmbeddingService,
    /// Expected vector size, 0 when unchecked.
    pub dimensions: usize,
}
