//! Core data models for Groundwork.
//!
//! These types represent the documents, chunks, and chat turns that flow
//! through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ingestion status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Complete => "complete",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "complete" => Some(DocumentStatus::Complete),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// Metadata record for one uploaded source file.
///
/// Identity is the `(tenant_id, chatbot_id, document_id)` triple; a document
/// belongs to exactly one chatbot, which belongs to exactly one tenant.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub tenant_id: String,
    pub chatbot_id: String,
    pub document_id: String,
    /// Blob store key holding the raw bytes.
    pub storage_key: String,
    pub content_type: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub chunk_count: i64,
    /// Failure reason, set only when `status` is `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-chatbot generation settings consumed by the chat path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotProfile {
    pub chatbot_id: String,
    pub tenant_id: String,
    pub name: String,
    pub system_prompt: String,
    /// Key into the model registry (see [`crate::generate`]).
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub active: bool,
}

/// A bounded slice of a document's extracted text, before embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chatbot_id: String,
    pub document_id: String,
    /// Zero-based position within the document; strictly increasing.
    pub chunk_index: usize,
    pub text: String,
    /// Blob store key of the source file, kept for traceability.
    pub source_key: String,
}

impl Chunk {
    /// Deterministic upsert key: re-ingesting the same document overwrites
    /// its chunks instead of duplicating them.
    pub fn upsert_id(&self) -> String {
        format!("{}#{}", self.document_id, self.chunk_index)
    }
}

/// A chunk as stored in the vector index, with its embedding attached.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

/// A search hit returned from the vector index, most similar first.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub source_key: String,
    pub score: f64,
}

/// One chat request from the widget. No conversation state is kept server
/// side; the session id is echoed (or generated) for client continuity only.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// The response to a chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
}

/// The logical vector index name for a chatbot. One index per chatbot;
/// created lazily on first chunk write.
pub fn index_name(chatbot_id: &str) -> String {
    format!("chatbot-{}", chatbot_id)
}

/// Components parsed out of a storage key.
///
/// Keys follow `chatbots/{chatbot_id}/{document_id}/{filename}`. The core
/// does not interpret the key beyond these segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKey {
    pub chatbot_id: String,
    pub document_id: String,
    pub filename: String,
}

impl StorageKey {
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(4, '/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some("chatbots"), Some(chatbot_id), Some(document_id), Some(filename))
                if !chatbot_id.is_empty() && !document_id.is_empty() && !filename.is_empty() =>
            {
                Some(StorageKey {
                    chatbot_id: chatbot_id.to_string(),
                    document_id: document_id.to_string(),
                    filename: filename.to_string(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_storage_key() {
        let key = StorageKey::parse("chatbots/bot-1/doc-9/guide.pdf").unwrap();
        assert_eq!(key.chatbot_id, "bot-1");
        assert_eq!(key.document_id, "doc-9");
        assert_eq!(key.filename, "guide.pdf");
    }

    #[test]
    fn parse_key_with_nested_filename() {
        let key = StorageKey::parse("chatbots/b/d/folder/file.txt").unwrap();
        assert_eq!(key.filename, "folder/file.txt");
    }

    #[test]
    fn parse_rejects_foreign_prefixes() {
        assert!(StorageKey::parse("uploads/bot-1/doc-9/x.pdf").is_none());
        assert!(StorageKey::parse("chatbots/bot-1/doc-9").is_none());
        assert!(StorageKey::parse("chatbots//doc/x.pdf").is_none());
        assert!(StorageKey::parse("").is_none());
    }

    #[test]
    fn upsert_id_is_deterministic() {
        let chunk = Chunk {
            chatbot_id: "b".into(),
            document_id: "doc-9".into(),
            chunk_index: 3,
            text: "hello".into(),
            source_key: "chatbots/b/doc-9/x.txt".into(),
        };
        assert_eq!(chunk.upsert_id(), "doc-9#3");
    }
}
