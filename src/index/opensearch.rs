//! OpenSearch-compatible vector index backend.
//!
//! Talks to the cluster's REST API with `reqwest`: `PUT /{index}` to create,
//! `PUT /{index}/_doc/{id}` to upsert, `POST /{index}/_search` with a `knn`
//! query to retrieve, `POST /{index}/_delete_by_query` for document cascade
//! deletes. Requests are optionally SigV4-signed (service `"es"`) for
//! managed domains; unsigned requests suit local clusters with security
//! disabled.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::models::{index_name, IndexedChunk, RetrievedChunk};
use crate::sigv4::{self, AwsCredentials};

pub struct OpenSearchIndex {
    endpoint: String,
    host: String,
    region: String,
    creds: Option<AwsCredentials>,
    client: reqwest::Client,
}

impl OpenSearchIndex {
    pub fn new(config: &IndexConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("index.endpoint required for OpenSearch provider"))?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let host = endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string();

        let creds = if config.sign_requests {
            Some(AwsCredentials::from_env()?)
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint,
            host,
            region: config.region.clone(),
            creds,
            client,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(reqwest::StatusCode, String), IndexError> {
        let canonical_uri = sigv4::uri_encode_path(path);
        let url = format!("{}{}", self.endpoint, canonical_uri);
        let payload = match body {
            Some(v) => serde_json::to_vec(v).map_err(|e| IndexError(e.to_string()))?,
            None => Vec::new(),
        };

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");

        if let Some(ref creds) = self.creds {
            let headers = sigv4::sign_request(
                creds,
                method.as_str(),
                &self.host,
                &canonical_uri,
                "",
                &payload,
                &self.region,
                "es",
                Utc::now(),
            );
            for (k, v) in headers {
                req = req.header(k, v);
            }
        }

        if body.is_some() {
            req = req.body(payload);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| IndexError(format!("request to {} failed: {}", url, e)))?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

#[async_trait]
impl super::VectorIndex for OpenSearchIndex {
    async fn ensure_index(&self, chatbot_id: &str, dims: usize) -> Result<(), IndexError> {
        let index = index_name(chatbot_id);

        let (status, body) = self
            .request(reqwest::Method::HEAD, &format!("/{}", index), None)
            .await?;
        if status.is_success() {
            // Exists: the stored mapping must agree with our dimensionality.
            let (status, body) = self
                .request(reqwest::Method::GET, &format!("/{}/_mapping", index), None)
                .await?;
            if status.is_success() {
                if let Some(existing) = parse_mapped_dimension(&body, &index) {
                    if existing != dims {
                        return Err(IndexError(format!(
                            "index {} has dimension {}, configuration expects {}",
                            index, existing, dims
                        )));
                    }
                }
            }
            return Ok(());
        }
        if status != reqwest::StatusCode::NOT_FOUND {
            return Err(IndexError(format!(
                "existence check for {} failed (HTTP {}): {}",
                index, status, body
            )));
        }

        tracing::info!(index = %index, dims, "creating vector index");
        let mapping = index_mapping(dims);
        let (status, body) = self
            .request(reqwest::Method::PUT, &format!("/{}", index), Some(&mapping))
            .await?;

        if status.is_success() {
            return Ok(());
        }
        // A concurrent ingestion task may have created it between our check
        // and the create call; that is success, not failure.
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(IndexError(format!(
            "create index {} failed (HTTP {}): {}",
            index, status, body
        )))
    }

    async fn upsert_chunk(&self, chunk: &IndexedChunk) -> Result<(), IndexError> {
        let index = index_name(&chunk.chunk.chatbot_id);
        let path = format!("/{}/_doc/{}", index, chunk.chunk.upsert_id());
        let doc = chunk_document(chunk);

        let (status, body) = self
            .request(reqwest::Method::PUT, &path, Some(&doc))
            .await?;
        if !status.is_success() {
            return Err(IndexError(format!(
                "upsert {} failed (HTTP {}): {}",
                path, status, body
            )));
        }
        Ok(())
    }

    async fn search(
        &self,
        chatbot_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let index = index_name(chatbot_id);
        let body = serde_json::json!({
            "size": k,
            "query": {
                "knn": {
                    "vector": {
                        "vector": query,
                        "k": k,
                    }
                }
            }
        });

        let (status, text) = self
            .request(
                reqwest::Method::POST,
                &format!("/{}/_search", index),
                Some(&body),
            )
            .await?;

        if status == reqwest::StatusCode::NOT_FOUND || text.contains("index_not_found_exception") {
            // No documents were ever ingested for this chatbot.
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(IndexError(format!(
                "search on {} failed (HTTP {}): {}",
                index, status, text
            )));
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| IndexError(e.to_string()))?;
        Ok(parse_search_response(&json))
    }

    async fn delete_document(
        &self,
        chatbot_id: &str,
        document_id: &str,
    ) -> Result<u64, IndexError> {
        let index = index_name(chatbot_id);
        let body = serde_json::json!({
            "query": { "term": { "document_id": document_id } }
        });

        let (status, text) = self
            .request(
                reqwest::Method::POST,
                &format!("/{}/_delete_by_query", index),
                Some(&body),
            )
            .await?;

        if status == reqwest::StatusCode::NOT_FOUND || text.contains("index_not_found_exception") {
            return Ok(0);
        }
        if !status.is_success() {
            return Err(IndexError(format!(
                "delete_by_query on {} failed (HTTP {}): {}",
                index, status, text
            )));
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| IndexError(e.to_string()))?;
        Ok(json.get("deleted").and_then(|d| d.as_u64()).unwrap_or(0))
    }

    async fn get_chunk(
        &self,
        chatbot_id: &str,
        document_id: &str,
        chunk_index: usize,
    ) -> Result<Option<RetrievedChunk>, IndexError> {
        let index = index_name(chatbot_id);
        let path = format!("/{}/_doc/{}#{}", index, document_id, chunk_index);

        let (status, text) = self.request(reqwest::Method::GET, &path, None).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(IndexError(format!(
                "get {} failed (HTTP {}): {}",
                path, status, text
            )));
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| IndexError(e.to_string()))?;
        Ok(json
            .get("_source")
            .and_then(|source| parse_source(source, 0.0)))
    }

    async fn index_exists(&self, chatbot_id: &str) -> Result<bool, IndexError> {
        let index = index_name(chatbot_id);
        let (status, body) = self
            .request(reqwest::Method::HEAD, &format!("/{}", index), None)
            .await?;
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Err(IndexError(format!(
            "existence check for {} failed (HTTP {}): {}",
            index, status, body
        )))
    }
}

/// Index creation body: a k-NN vector field plus filterable chunk metadata.
fn index_mapping(dims: usize) -> serde_json::Value {
    serde_json::json!({
        "settings": {
            "index.knn": true,
        },
        "mappings": {
            "properties": {
                "vector": { "type": "knn_vector", "dimension": dims },
                "chatbot_id": { "type": "keyword" },
                "document_id": { "type": "keyword" },
                "chunk_index": { "type": "integer" },
                "text": { "type": "text" },
                "source_key": { "type": "keyword" },
                "indexed_at": { "type": "date" },
            }
        }
    })
}

fn chunk_document(chunk: &IndexedChunk) -> serde_json::Value {
    serde_json::json!({
        "chatbot_id": chunk.chunk.chatbot_id,
        "document_id": chunk.chunk.document_id,
        "chunk_index": chunk.chunk.chunk_index,
        "text": chunk.chunk.text,
        "vector": chunk.vector,
        "source_key": chunk.chunk.source_key,
        "indexed_at": chunk.indexed_at.to_rfc3339(),
    })
}

/// Pull the knn_vector dimension out of a `GET /{index}/_mapping` response.
fn parse_mapped_dimension(body: &str, index: &str) -> Option<usize> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get(index)?
        .get("mappings")?
        .get("properties")?
        .get("vector")?
        .get("dimension")?
        .as_u64()
        .map(|d| d as usize)
}

/// Map `hits.hits[]` into retrieved chunks, preserving the engine's order.
fn parse_search_response(json: &serde_json::Value) -> Vec<RetrievedChunk> {
    let hits = json
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array());

    let mut out = Vec::new();
    if let Some(hits) = hits {
        for hit in hits {
            let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0);
            if let Some(chunk) = hit.get("_source").and_then(|s| parse_source(s, score)) {
                out.push(chunk);
            }
        }
    }
    out
}

fn parse_source(source: &serde_json::Value, score: f64) -> Option<RetrievedChunk> {
    Some(RetrievedChunk {
        document_id: source.get("document_id")?.as_str()?.to_string(),
        chunk_index: source.get("chunk_index")?.as_u64()? as usize,
        text: source.get("text")?.as_str()?.to_string(),
        source_key: source
            .get("source_key")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_carries_dimension_and_metadata_fields() {
        let m = index_mapping(1024);
        assert_eq!(m["mappings"]["properties"]["vector"]["dimension"], 1024);
        assert_eq!(m["mappings"]["properties"]["vector"]["type"], "knn_vector");
        for field in ["chatbot_id", "document_id", "chunk_index", "source_key", "indexed_at"] {
            assert!(
                m["mappings"]["properties"].get(field).is_some(),
                "missing field {}",
                field
            );
        }
    }

    #[test]
    fn parses_search_hits_in_order() {
        let json = serde_json::json!({
            "hits": { "hits": [
                {"_score": 0.9, "_source": {"document_id": "d1", "chunk_index": 0, "text": "first", "source_key": "k1"}},
                {"_score": 0.5, "_source": {"document_id": "d2", "chunk_index": 3, "text": "second", "source_key": "k2"}},
            ]}
        });
        let results = parse_search_response(&json);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "first");
        assert_eq!(results[1].document_id, "d2");
        assert_eq!(results[1].chunk_index, 3);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn skips_hits_without_text() {
        let json = serde_json::json!({
            "hits": { "hits": [
                {"_score": 0.9, "_source": {"document_id": "d1", "chunk_index": 0, "source_key": "k"}},
                {"_score": 0.4, "_source": {"document_id": "d1", "chunk_index": 1, "text": "ok", "source_key": "k"}},
            ]}
        });
        let results = parse_search_response(&json);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "ok");
    }

    #[test]
    fn empty_response_parses_to_no_hits() {
        let json = serde_json::json!({"hits": {"hits": []}});
        assert!(parse_search_response(&json).is_empty());
    }

    #[test]
    fn reads_dimension_from_mapping_response() {
        let body = serde_json::json!({
            "chatbot-b1": {
                "mappings": {"properties": {"vector": {"type": "knn_vector", "dimension": 1024}}}
            }
        })
        .to_string();
        assert_eq!(parse_mapped_dimension(&body, "chatbot-b1"), Some(1024));
        assert_eq!(parse_mapped_dimension(&body, "chatbot-other"), None);
    }
}
