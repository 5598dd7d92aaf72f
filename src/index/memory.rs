//! In-memory vector index.
//!
//! Brute-force cosine similarity over stored chunks, with the same
//! namespace/upsert/tolerance semantics as the OpenSearch backend. Used by
//! tests and by local development setups that have no cluster to talk to.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{index_name, IndexedChunk, RetrievedChunk};

#[derive(Clone)]
struct StoredChunk {
    document_id: String,
    chunk_index: usize,
    text: String,
    source_key: String,
    vector: Vec<f32>,
    /// Insertion sequence, kept across upserts; breaks score ties stably.
    seq: u64,
}

struct IndexEntry {
    dims: usize,
    chunks: HashMap<String, StoredChunk>,
}

#[derive(Default)]
pub struct MemoryIndex {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    indexes: HashMap<String, IndexEntry>,
    next_seq: u64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks stored for a chatbot, across all documents.
    pub fn chunk_count(&self, chatbot_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner
            .indexes
            .get(&index_name(chatbot_id))
            .map(|e| e.chunks.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl super::VectorIndex for MemoryIndex {
    async fn ensure_index(&self, chatbot_id: &str, dims: usize) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        let name = index_name(chatbot_id);
        match inner.indexes.get(&name) {
            Some(entry) if entry.dims != dims => Err(IndexError(format!(
                "index {} has dimension {}, configuration expects {}",
                name, entry.dims, dims
            ))),
            Some(_) => Ok(()),
            None => {
                inner.indexes.insert(
                    name,
                    IndexEntry {
                        dims,
                        chunks: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert_chunk(&self, chunk: &IndexedChunk) -> Result<(), IndexError> {
        let mut inner = self.inner.lock().unwrap();
        let name = index_name(&chunk.chunk.chatbot_id);
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let entry = inner
            .indexes
            .get_mut(&name)
            .ok_or_else(|| IndexError(format!("index {} does not exist", name)))?;
        if chunk.vector.len() != entry.dims {
            return Err(IndexError(format!(
                "vector has {} dimensions, index {} expects {}",
                chunk.vector.len(),
                name,
                entry.dims
            )));
        }

        let key = chunk.chunk.upsert_id();
        let existing_seq = entry.chunks.get(&key).map(|c| c.seq);
        entry.chunks.insert(
            key,
            StoredChunk {
                document_id: chunk.chunk.document_id.clone(),
                chunk_index: chunk.chunk.chunk_index,
                text: chunk.chunk.text.clone(),
                source_key: chunk.chunk.source_key.clone(),
                vector: chunk.vector.clone(),
                seq: existing_seq.unwrap_or(seq),
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        chatbot_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let inner = self.inner.lock().unwrap();
        let entry = match inner.indexes.get(&index_name(chatbot_id)) {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };

        let mut scored: Vec<(&StoredChunk, f64)> = entry
            .chunks
            .values()
            .map(|c| (c, cosine_similarity(query, &c.vector) as f64))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.seq.cmp(&b.0.seq))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(c, score)| RetrievedChunk {
                document_id: c.document_id.clone(),
                chunk_index: c.chunk_index,
                text: c.text.clone(),
                source_key: c.source_key.clone(),
                score,
            })
            .collect())
    }

    async fn delete_document(
        &self,
        chatbot_id: &str,
        document_id: &str,
    ) -> Result<u64, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = match inner.indexes.get_mut(&index_name(chatbot_id)) {
            Some(e) => e,
            None => return Ok(0),
        };
        let before = entry.chunks.len();
        entry.chunks.retain(|_, c| c.document_id != document_id);
        Ok((before - entry.chunks.len()) as u64)
    }

    async fn get_chunk(
        &self,
        chatbot_id: &str,
        document_id: &str,
        chunk_index: usize,
    ) -> Result<Option<RetrievedChunk>, IndexError> {
        let inner = self.inner.lock().unwrap();
        let entry = match inner.indexes.get(&index_name(chatbot_id)) {
            Some(e) => e,
            None => return Ok(None),
        };
        let key = format!("{}#{}", document_id, chunk_index);
        Ok(entry.chunks.get(&key).map(|c| RetrievedChunk {
            document_id: c.document_id.clone(),
            chunk_index: c.chunk_index,
            text: c.text.clone(),
            source_key: c.source_key.clone(),
            score: 1.0,
        }))
    }

    async fn index_exists(&self, chatbot_id: &str) -> Result<bool, IndexError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.indexes.contains_key(&index_name(chatbot_id)))
    }
}
