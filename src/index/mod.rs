//! Vector index abstraction.
//!
//! One logical index per chatbot (`chatbot-{chatbot_id}`), created lazily
//! before the first chunk write. The [`VectorIndex`] trait covers everything
//! the ingestion and retrieval paths need; backends:
//!
//! - **[`opensearch::OpenSearchIndex`]** — an OpenSearch-compatible HTTP
//!   endpoint with k-NN support, optionally SigV4-signed for managed domains.
//! - **[`memory::MemoryIndex`]** — in-process cosine-similarity index for
//!   tests and local development.
//!
//! Writes are keyed by `{document_id}#{chunk_index}` so re-ingesting a
//! document overwrites its chunks instead of duplicating them. Querying an
//! index that does not exist returns no hits rather than an error — a chatbot
//! with no ingested documents simply has no context yet.

pub mod memory;
pub mod opensearch;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{IndexedChunk, RetrievedChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the chatbot's index if it does not exist; idempotent, and safe
    /// under concurrent callers (an "already exists" create is success).
    /// Fails if the index exists with a different vector dimensionality.
    async fn ensure_index(&self, chatbot_id: &str, dims: usize) -> Result<(), IndexError>;

    /// Write one chunk, keyed by its deterministic upsert id.
    async fn upsert_chunk(&self, chunk: &IndexedChunk) -> Result<(), IndexError>;

    /// k-nearest-neighbor search, most similar first. A missing index yields
    /// an empty list.
    async fn search(
        &self,
        chatbot_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;

    /// Remove every chunk belonging to a document. Returns the number of
    /// chunks removed; a missing index counts as zero.
    async fn delete_document(&self, chatbot_id: &str, document_id: &str)
        -> Result<u64, IndexError>;

    /// Direct lookup by upsert key, for traceability and verification.
    async fn get_chunk(
        &self,
        chatbot_id: &str,
        document_id: &str,
        chunk_index: usize,
    ) -> Result<Option<RetrievedChunk>, IndexError>;

    /// Whether the chatbot's index has been created.
    async fn index_exists(&self, chatbot_id: &str) -> Result<bool, IndexError>;
}

/// Instantiate the configured index backend.
pub fn create_index(config: &IndexConfig) -> Result<Box<dyn VectorIndex>> {
    match config.provider.as_str() {
        "opensearch" => Ok(Box::new(opensearch::OpenSearchIndex::new(config)?)),
        "memory" => Ok(Box::new(memory::MemoryIndex::new())),
        other => anyhow::bail!("Unknown index provider: {}", other),
    }
}
