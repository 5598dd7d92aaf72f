//! Retrieval engine for the chat path.
//!
//! Embeds the user's question and runs a k-nearest-neighbor search against
//! the chatbot's index. A chatbot with no ingested documents has no index;
//! that is "no context available", not an error. Real failures (the
//! embedding provider down, the cluster rejecting the query) surface as
//! [`RetrievalError`] and the chat handler decides how to degrade.

use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::models::RetrievedChunk;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Top-`k` chunks relevant to `question`, most similar first. Ordering
    /// between equal scores follows insertion order and carries no meaning.
    pub async fn retrieve(
        &self,
        chatbot_id: &str,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let query = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| RetrievalError(e.to_string()))?;

        self.index
            .search(chatbot_id, &query, k)
            .await
            .map_err(|e| RetrievalError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::index::memory::MemoryIndex;
    use crate::models::{Chunk, IndexedChunk};
    use async_trait::async_trait;
    use chrono::Utc;

    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            // Questions about "billing" point east, everything else north.
            if text.contains("billing") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
        fn dims(&self) -> usize {
            2
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError("malformed payload".into()))
        }
        fn dims(&self) -> usize {
            2
        }
    }

    async fn seeded_index() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        index.ensure_index("b1", 2).await.unwrap();
        for (i, (text, vector)) in [
            ("refunds take five days", vec![1.0, 0.0]),
            ("reset your password", vec![0.0, 1.0]),
        ]
        .into_iter()
        .enumerate()
        {
            index
                .upsert_chunk(&IndexedChunk {
                    chunk: Chunk {
                        chatbot_id: "b1".into(),
                        document_id: "d1".into(),
                        chunk_index: i,
                        text: text.into(),
                        source_key: "chatbots/b1/d1/faq.txt".into(),
                    },
                    vector,
                    indexed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        index
    }

    #[tokio::test]
    async fn returns_most_relevant_first() {
        let index = seeded_index().await;
        let retriever = Retriever::new(Arc::new(AxisEmbedder), index);

        let hits = retriever.retrieve("b1", "how do billing refunds work", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].text, "refunds take five days");
    }

    #[tokio::test]
    async fn unknown_chatbot_yields_empty_context() {
        let retriever = Retriever::new(Arc::new(AxisEmbedder), Arc::new(MemoryIndex::new()));
        let hits = retriever.retrieve("never-seen", "anything", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_is_a_retrieval_error() {
        let index = seeded_index().await;
        let retriever = Retriever::new(Arc::new(FailingEmbedder), index);
        assert!(retriever.retrieve("b1", "anything", 5).await.is_err());
    }
}
