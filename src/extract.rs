//! Text extraction for uploaded documents.
//!
//! The ingestion pipeline supplies raw bytes plus the declared content type;
//! this module returns plain UTF-8 text. PDF bytes go through `pdf-extract`
//! (best-effort reading order, embedded images and forms ignored); textual
//! types decode as UTF-8 with a lossy fallback so a stray byte never fails a
//! document. Unrecognized types are terminal for the document — there is
//! nothing to retry.

use crate::error::ExtractError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_CSV: &str = "text/csv";

/// Extract plain text from document bytes.
///
/// The `content_type` hint wins; when it is absent or generic
/// (`application/octet-stream`), the filename extension decides.
pub fn extract_text(
    bytes: &[u8],
    content_type: &str,
    filename: &str,
) -> Result<String, ExtractError> {
    match effective_type(content_type, filename) {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentKind::Unsupported => {
            Err(ExtractError::UnsupportedFormat(content_type.to_string()))
        }
    }
}

enum DocumentKind {
    Pdf,
    Text,
    Unsupported,
}

fn effective_type(content_type: &str, filename: &str) -> DocumentKind {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();

    match ct.as_str() {
        MIME_PDF => DocumentKind::Pdf,
        MIME_TEXT | MIME_CSV | "text/markdown" | "application/json" => DocumentKind::Text,
        _ if ct.starts_with("text/") => DocumentKind::Text,
        "" | "application/octet-stream" => kind_from_extension(filename),
        _ => DocumentKind::Unsupported,
    }
}

fn kind_from_extension(filename: &str) -> DocumentKind {
    match filename.rsplit('.').next().map(str::to_ascii_lowercase) {
        Some(ext) if ext == "pdf" => DocumentKind::Pdf,
        Some(ext) if matches!(ext.as_str(), "txt" | "csv" | "md" | "text" | "json") => {
            DocumentKind::Text
        }
        _ => DocumentKind::Unsupported,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// MIME content type from a file extension, for records created before the
/// uploader declared one.
pub fn detect_content_type(filename: &str) -> &'static str {
    match filename.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => MIME_PDF,
        Some("csv") => MIME_CSV,
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("txt" | "text") => MIME_TEXT,
        _ => "application/octet-stream",
    }
}
