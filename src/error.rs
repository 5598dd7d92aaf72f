//! Error taxonomy for the ingestion and chat pipelines.
//!
//! Ingestion errors are recorded on the document record and never shown to
//! end users; chat-path errors are recovered into a fixed fallback message at
//! the HTTP layer. The split between retryable and terminal variants drives
//! the retry policy in [`crate::ingest`].

use thiserror::Error;

/// Text extraction failures. Both variants are terminal for the document.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Blob store read failures.
///
/// `NotFound` is retryable during ingestion (object stores propagate
/// asynchronously after upload); anything else fails the document
/// immediately.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("blob store error: {0}")]
    Other(String),
}

/// Embedding provider failure: non-success response or malformed payload.
/// Retryable by the caller up to a caller-defined bound.
#[derive(Error, Debug)]
#[error("embedding provider error: {0}")]
pub struct EmbeddingError(pub String);

/// Vector index provider failure. "Index already exists" is handled inside
/// the index backends and never surfaces here; everything that does surface
/// is terminal for the document being ingested.
#[derive(Error, Debug)]
#[error("index provider error: {0}")]
pub struct IndexError(pub String);

/// Retrieval failure for a chat turn. Callers are expected to degrade to an
/// empty context rather than fail the turn.
#[derive(Error, Debug)]
#[error("retrieval error: {0}")]
pub struct RetrievalError(pub String);

/// Generation failure: provider error or empty/malformed completion.
/// Terminal for the turn; the server converts it to a user-facing fallback.
#[derive(Error, Debug)]
#[error("generation error: {0}")]
pub struct GenerationError(pub String);

/// Terminal ingestion failure, with the reason string that gets recorded on
/// the document record.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("chunk {index} failed after {attempts} attempts: {reason}")]
    Chunk {
        index: usize,
        attempts: u32,
        reason: String,
    },

    #[error(transparent)]
    Index(#[from] IndexError),
}
