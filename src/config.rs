use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub blob: BlobConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    /// "s3" or "file".
    pub provider: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Root directory for the "file" provider.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: 0,
        }
    }
}

fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// "openai" or "ollama".
    pub provider: String,
    pub model: String,
    /// Output dimensionality of the model. Must match the index schema;
    /// a mismatch is a configuration error, not a retry case.
    pub dims: usize,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// "opensearch" or "memory".
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Sign requests with AWS SigV4 (managed OpenSearch domains).
    #[serde(default)]
    pub sign_requests: bool,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Base URL of the model-invocation endpoint.
    pub url: String,
    /// Registry key used when a chatbot's configured model is unknown.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "claude-3-5-haiku".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Attempts for a "not found" blob read (eventual consistency).
    #[serde(default = "default_download_attempts")]
    pub download_attempts: u32,
    #[serde(default = "default_download_delay")]
    pub download_retry_delay_secs: u64,
    /// Attempts for embedding+indexing a single chunk.
    #[serde(default = "default_chunk_attempts")]
    pub chunk_attempts: u32,
    #[serde(default = "default_chunk_delay")]
    pub chunk_retry_delay_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            download_attempts: default_download_attempts(),
            download_retry_delay_secs: default_download_delay(),
            chunk_attempts: default_chunk_attempts(),
            chunk_retry_delay_secs: default_chunk_delay(),
        }
    }
}

fn default_download_attempts() -> u32 {
    3
}
fn default_download_delay() -> u64 {
    2
}
fn default_chunk_attempts() -> u32 {
    3
}
fn default_chunk_delay() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Overall ceiling for one chat turn (embedding + search + generation).
    #[serde(default = "default_timeout_secs")]
    pub chat_timeout_secs: u64,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    match config.blob.provider.as_str() {
        "s3" => {
            if config.blob.bucket.is_none() {
                anyhow::bail!("blob.bucket is required when blob.provider is 's3'");
            }
        }
        "file" => {
            if config.blob.root.is_none() {
                anyhow::bail!("blob.root is required when blob.provider is 'file'");
            }
        }
        other => anyhow::bail!("Unknown blob provider: '{}'. Must be s3 or file.", other),
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.index.provider.as_str() {
        "opensearch" => {
            if config.index.endpoint.is_none() {
                anyhow::bail!("index.endpoint is required when index.provider is 'opensearch'");
            }
        }
        "memory" => {}
        other => anyhow::bail!(
            "Unknown index provider: '{}'. Must be opensearch or memory.",
            other
        ),
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.ingest.download_attempts == 0 || config.ingest.chunk_attempts == 0 {
        anyhow::bail!("ingest attempt counts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    const VALID: &str = r#"
[db]
path = "/tmp/gwk.sqlite"

[blob]
provider = "file"
root = "/tmp/blobs"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[index]
provider = "memory"

[generation]
url = "http://localhost:9300"

[server]
bind = "127.0.0.1:8080"
"#;

    #[test]
    fn loads_valid_config_with_defaults() {
        let f = write_config(VALID);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_chars, 2000);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.ingest.download_attempts, 3);
        assert_eq!(cfg.ingest.download_retry_delay_secs, 2);
        assert_eq!(cfg.server.chat_timeout_secs, 30);
        assert_eq!(cfg.generation.default_model, "claude-3-5-haiku");
    }

    #[test]
    fn rejects_s3_without_bucket() {
        let body = VALID.replace(
            "provider = \"file\"\nroot = \"/tmp/blobs\"",
            "provider = \"s3\"",
        );
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let body = VALID.replace("provider = \"openai\"", "provider = \"bedrock\"");
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let body = format!("{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n", VALID);
        let f = write_config(&body);
        assert!(load_config(f.path()).is_err());
    }
}
