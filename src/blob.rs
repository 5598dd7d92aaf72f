//! Blob store abstraction over uploaded document bytes.
//!
//! The dashboard uploads files through presigned URLs (out of scope here);
//! the ingestion pipeline only ever reads. `NotFound` is a distinct error
//! because object stores propagate asynchronously after upload — the
//! pipeline retries it for a short window before giving up.
//!
//! Backends:
//! - **[`S3BlobStore`]** — S3 REST `GetObject` with SigV4 signing; supports
//!   custom endpoints for S3-compatible services (MinIO, LocalStack).
//! - **[`FileBlobStore`]** — keys resolved under a local root directory, for
//!   development and tests.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;

use crate::config::BlobConfig;
use crate::error::BlobError;
use crate::sigv4::{self, AwsCredentials};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`.
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError>;
}

/// Instantiate the configured blob backend.
pub fn create_blob_store(config: &BlobConfig) -> Result<Box<dyn BlobStore>> {
    match config.provider.as_str() {
        "s3" => Ok(Box::new(S3BlobStore::new(config)?)),
        "file" => Ok(Box::new(FileBlobStore::new(config)?)),
        other => anyhow::bail!("Unknown blob provider: {}", other),
    }
}

// ============ S3 backend ============

pub struct S3BlobStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3BlobStore {
    pub fn new(config: &BlobConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| anyhow::anyhow!("blob.bucket required for S3 provider"))?;
        let creds = AwsCredentials::from_env()?;

        Ok(Self {
            bucket,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Hostname for the bucket: a custom endpoint when configured, the
    /// standard virtual-hosted address otherwise.
    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn scheme(&self) -> &'static str {
        match self.endpoint_url {
            Some(ref e) if e.starts_with("http://") => "http",
            _ => "https",
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let host = self.host();
        let canonical_uri = format!("/{}", sigv4::uri_encode_path(key));
        let url = format!("{}://{}{}", self.scheme(), host, canonical_uri);

        let headers = sigv4::sign_request(
            &self.creds,
            "GET",
            &host,
            &canonical_uri,
            "",
            b"",
            &self.region,
            "s3",
            Utc::now(),
        );

        let mut req = self.client.get(&url);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BlobError::Other(format!("s3://{}/{}: {}", self.bucket, key, e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // S3 reports a missing key as NoSuchKey in the error body; some
            // gateways return it with a non-404 status.
            if body.contains("NoSuchKey") {
                return Err(BlobError::NotFound(key.to_string()));
            }
            return Err(BlobError::Other(format!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                status, key
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| BlobError::Other(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ============ Local filesystem backend ============

pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(config: &BlobConfig) -> Result<Self> {
        let root = config
            .root
            .clone()
            .ok_or_else(|| anyhow::anyhow!("blob.root required for file provider"))?;
        Ok(Self { root })
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        if key.split('/').any(|seg| seg == "..") {
            return Err(BlobError::Other(format!("invalid key: {}", key)));
        }
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Other(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_reads_existing_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("chatbots/b1/d1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.txt"), b"contents").unwrap();

        let store = FileBlobStore::with_root(tmp.path().to_path_buf());
        let bytes = store.get_bytes("chatbots/b1/d1/a.txt").await.unwrap();
        assert_eq!(bytes, b"contents");
    }

    #[tokio::test]
    async fn file_store_distinguishes_not_found() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileBlobStore::with_root(tmp.path().to_path_buf());
        let err = store.get_bytes("chatbots/b1/d1/missing.txt").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_store_rejects_parent_traversal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = FileBlobStore::with_root(tmp.path().to_path_buf());
        let err = store.get_bytes("chatbots/../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, BlobError::Other(_)));
    }
}
