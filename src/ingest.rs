//! Ingestion pipeline orchestration.
//!
//! Drives one uploaded document through
//! download → extract → chunk → embed+index and records the outcome on the
//! document's metadata record. Failures are terminal states on that record,
//! never errors surfaced to end users.
//!
//! A document is either fully indexed (`complete`, with its chunk count) or
//! `failed` with a reason. Chunks written before a failure are not rolled
//! back: every index write is keyed by `{document_id}#{chunk_index}`, so a
//! later re-run overwrites them and converges instead of duplicating.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::blob::BlobStore;
use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, IngestConfig};
use crate::docstore::DocumentStore;
use crate::embedding::Embedder;
use crate::error::{BlobError, IngestError};
use crate::extract::{detect_content_type, extract_text};
use crate::index::VectorIndex;
use crate::models::{Chunk, DocumentRecord, DocumentStatus, IndexedChunk, StorageKey};

/// Outcome of one pipeline run, mirrored onto the document record.
#[derive(Debug)]
pub struct IngestReport {
    pub chatbot_id: String,
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub error: Option<String>,
}

pub struct IngestPipeline {
    blob: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: DocumentStore,
    chunking: ChunkingConfig,
    retry: IngestConfig,
}

impl IngestPipeline {
    pub fn new(
        blob: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: DocumentStore,
        chunking: ChunkingConfig,
        retry: IngestConfig,
    ) -> Self {
        Self {
            blob,
            embedder,
            index,
            store,
            chunking,
            retry,
        }
    }

    /// Process one uploaded document, identified by its storage key.
    ///
    /// Returns an error only for conditions outside any document's lifecycle
    /// (an unparseable key, or the metadata store being unreachable).
    /// Pipeline failures land in the returned report with `status = failed`.
    pub async fn run(&self, storage_key: &str) -> Result<IngestReport> {
        let key = StorageKey::parse(storage_key)
            .ok_or_else(|| anyhow::anyhow!("storage key does not match chatbots/{{chatbot_id}}/{{document_id}}/{{filename}}: {}", storage_key))?;

        let record = self.find_or_create_record(storage_key, &key).await?;
        self.store
            .set_status(
                &key.chatbot_id,
                &key.document_id,
                DocumentStatus::Processing,
                None,
                None,
            )
            .await?;

        tracing::info!(
            chatbot_id = %key.chatbot_id,
            document_id = %key.document_id,
            filename = %key.filename,
            "ingesting document"
        );

        match self.process(storage_key, &key, &record).await {
            Ok(chunk_count) => {
                self.store
                    .set_status(
                        &key.chatbot_id,
                        &key.document_id,
                        DocumentStatus::Complete,
                        Some(chunk_count as i64),
                        None,
                    )
                    .await?;
                tracing::info!(
                    chatbot_id = %key.chatbot_id,
                    document_id = %key.document_id,
                    chunk_count,
                    "ingestion complete"
                );
                Ok(IngestReport {
                    chatbot_id: key.chatbot_id,
                    document_id: key.document_id,
                    status: DocumentStatus::Complete,
                    chunk_count,
                    error: None,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .set_status(
                        &key.chatbot_id,
                        &key.document_id,
                        DocumentStatus::Failed,
                        None,
                        Some(&reason),
                    )
                    .await?;
                tracing::error!(
                    chatbot_id = %key.chatbot_id,
                    document_id = %key.document_id,
                    error = %reason,
                    "ingestion failed"
                );
                Ok(IngestReport {
                    chatbot_id: key.chatbot_id,
                    document_id: key.document_id,
                    status: DocumentStatus::Failed,
                    chunk_count: 0,
                    error: Some(reason),
                })
            }
        }
    }

    /// Remove a document entirely: its metadata record and every chunk it
    /// contributed to the vector index. Returns the number of chunks removed.
    pub async fn remove_document(&self, chatbot_id: &str, document_id: &str) -> Result<u64> {
        let removed = self
            .index
            .delete_document(chatbot_id, document_id)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        self.store.delete_document(chatbot_id, document_id).await?;
        tracing::info!(chatbot_id, document_id, removed, "document removed");
        Ok(removed)
    }

    /// The record is normally created when the upload is initiated; a missing
    /// record means the trigger raced ahead of the dashboard, so create one
    /// from what the key tells us.
    async fn find_or_create_record(
        &self,
        storage_key: &str,
        key: &StorageKey,
    ) -> Result<DocumentRecord> {
        if let Some(existing) = self
            .store
            .get_document(&key.chatbot_id, &key.document_id)
            .await?
        {
            return Ok(existing);
        }

        let tenant_id = match self.store.get_chatbot(&key.chatbot_id).await? {
            Some(profile) => profile.tenant_id,
            None => "default".to_string(),
        };

        let now = Utc::now();
        let record = DocumentRecord {
            tenant_id,
            chatbot_id: key.chatbot_id.clone(),
            document_id: key.document_id.clone(),
            storage_key: storage_key.to_string(),
            content_type: detect_content_type(&key.filename).to_string(),
            filename: key.filename.clone(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_document(&record).await?;
        Ok(record)
    }

    async fn process(
        &self,
        storage_key: &str,
        key: &StorageKey,
        record: &DocumentRecord,
    ) -> Result<usize, IngestError> {
        let bytes = self.download(storage_key).await?;
        let text = extract_text(&bytes, &record.content_type, &key.filename)?;

        let pieces = chunk_text(&text, self.chunking.max_chars, self.chunking.overlap_chars);
        if pieces.is_empty() {
            // No indexable content; the document still completes. The index
            // is left untouched (and uncreated for a first-ever upload).
            return Ok(0);
        }

        self.index
            .ensure_index(&key.chatbot_id, self.embedder.dims())
            .await?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                chatbot_id: key.chatbot_id.clone(),
                document_id: key.document_id.clone(),
                chunk_index: i,
                text,
                source_key: storage_key.to_string(),
            })
            .collect();

        // Explicit per-chunk outcomes, reduced to one pipeline result below.
        let mut outcomes: Vec<Result<usize, IngestError>> = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let outcome = self.embed_and_index(chunk).await;
            let failed = outcome.is_err();
            outcomes.push(outcome);
            if failed {
                break;
            }
        }

        let indexed = outcomes.iter().filter(|o| o.is_ok()).count();
        match outcomes.into_iter().find(|o| o.is_err()) {
            Some(Err(e)) => {
                tracing::warn!(
                    document_id = %key.document_id,
                    indexed,
                    total = chunks.len(),
                    "aborting document after chunk failure"
                );
                Err(e)
            }
            _ => Ok(indexed),
        }
    }

    async fn download(&self, storage_key: &str) -> Result<Vec<u8>, IngestError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.blob.get_bytes(storage_key).await {
                Ok(bytes) => return Ok(bytes),
                // Uploads propagate asynchronously; give the store a moment.
                Err(BlobError::NotFound(_)) if attempt < self.retry.download_attempts => {
                    tracing::warn!(
                        storage_key,
                        attempt,
                        max = self.retry.download_attempts,
                        "object not yet visible, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(self.retry.download_retry_delay_secs))
                        .await;
                }
                Err(e) => return Err(IngestError::Download(e.to_string())),
            }
        }
    }

    async fn embed_and_index(&self, chunk: &Chunk) -> Result<usize, IngestError> {
        let mut last_err = String::new();
        for attempt in 0..self.retry.chunk_attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(self.retry.chunk_retry_delay_secs)).await;
            }

            let vector = match self.embedder.embed(&chunk.text).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        document_id = %chunk.document_id,
                        chunk_index = chunk.chunk_index,
                        attempt = attempt + 1,
                        error = %e,
                        "embedding attempt failed"
                    );
                    last_err = e.to_string();
                    continue;
                }
            };

            match self
                .index
                .upsert_chunk(&IndexedChunk {
                    chunk: chunk.clone(),
                    vector,
                    indexed_at: Utc::now(),
                })
                .await
            {
                Ok(()) => return Ok(chunk.chunk_index),
                Err(e) => {
                    tracing::warn!(
                        document_id = %chunk.document_id,
                        chunk_index = chunk.chunk_index,
                        attempt = attempt + 1,
                        error = %e,
                        "index write attempt failed"
                    );
                    last_err = e.to_string();
                }
            }
        }

        Err(IngestError::Chunk {
            index: chunk.chunk_index,
            attempts: self.retry.chunk_attempts,
            reason: last_err,
        })
    }
}
