//! HTTP API for the chat widget and upload notifications.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chatbots/{chatbot_id}/chat` | Answer one chat turn |
//! | `POST` | `/ingest` | Trigger ingestion for an uploaded storage key |
//! | `GET`  | `/chatbots/{chatbot_id}/documents` | List document records |
//! | `DELETE` | `/chatbots/{chatbot_id}/documents/{document_id}` | Remove a document and its chunks |
//! | `GET`  | `/health` | Health check (returns name + version) |
//!
//! # Error contract
//!
//! Management endpoints return
//! `{ "error": { "code": "...", "message": "..." } }` with a matching HTTP
//! status. The chat endpoint is end-user-facing: provider failures and
//! timeouts degrade to a fixed fallback message with HTTP 200 — a widget
//! embedded on someone's site must never render a stack trace.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the widget calls
//! cross-origin from arbitrary customer sites. Authorization and rate
//! limiting live in the external gateway.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::blob::create_blob_store;
use crate::config::Config;
use crate::docstore::DocumentStore;
use crate::embedding::create_embedder;
use crate::generate::{Generator, HttpGenerator};
use crate::index::create_index;
use crate::ingest::IngestPipeline;
use crate::models::{ChatReply, ChatTurn, ChatbotProfile};
use crate::retrieve::Retriever;

/// What the widget shows when the chat path fails; end users never see the
/// underlying error.
pub const FALLBACK_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// Shared application state passed to route handlers.
#[derive(Clone)]
struct AppState {
    store: DocumentStore,
    retriever: Arc<Retriever>,
    generator: Arc<dyn Generator>,
    pipeline: Arc<IngestPipeline>,
    top_k: usize,
    chat_timeout: Duration,
}

/// Start the HTTP server, wiring every collaborator from configuration.
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = DocumentStore::connect(&config.db.path).await?;
    store.migrate().await?;

    let blob: Arc<dyn crate::blob::BlobStore> = Arc::from(create_blob_store(&config.blob)?);
    let embedder: Arc<dyn crate::embedding::Embedder> =
        Arc::from(create_embedder(&config.embedding)?);
    let index: Arc<dyn crate::index::VectorIndex> = Arc::from(create_index(&config.index)?);
    let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(&config.generation)?);

    let retriever = Arc::new(Retriever::new(embedder.clone(), index.clone()));
    let pipeline = Arc::new(IngestPipeline::new(
        blob,
        embedder,
        index,
        store.clone(),
        config.chunking.clone(),
        config.ingest.clone(),
    ));

    let state = AppState {
        store,
        retriever,
        generator,
        pipeline,
        top_k: config.retrieval.top_k,
        chat_timeout: Duration::from_secs(config.server.chat_timeout_secs),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chatbots/{chatbot_id}/chat", post(handle_chat))
        .route("/ingest", post(handle_ingest))
        .route("/chatbots/{chatbot_id}/documents", get(handle_list_documents))
        .route(
            "/chatbots/{chatbot_id}/documents/{document_id}",
            delete(handle_delete_document),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %config.server.bind, "server listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run one chat turn outside the HTTP layer: retrieve context (degrading to
/// none on retrieval failure), then generate, falling back to
/// [`FALLBACK_MESSAGE`] when generation fails. Shared by the server handler
/// and the CLI.
pub async fn answer_turn(
    profile: &ChatbotProfile,
    retriever: &Retriever,
    generator: &dyn Generator,
    turn: &ChatTurn,
    top_k: usize,
) -> ChatReply {
    let session_id = turn
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Partial availability beats total failure: a broken embedding provider
    // downgrades the bot to an ungrounded answer, it does not take it down.
    let context: Vec<String> = match retriever
        .retrieve(&profile.chatbot_id, &turn.message, top_k)
        .await
    {
        Ok(chunks) => chunks.into_iter().map(|c| c.text).collect(),
        Err(e) => {
            tracing::warn!(chatbot_id = %profile.chatbot_id, error = %e, "retrieval failed, continuing without context");
            Vec::new()
        }
    };

    match generator.generate(profile, &context, &turn.message).await {
        Ok(response) => ChatReply {
            response,
            session_id,
        },
        Err(e) => {
            tracing::error!(chatbot_id = %profile.chatbot_id, error = %e, "generation failed");
            ChatReply {
                response: FALLBACK_MESSAGE.to_string(),
                session_id,
            }
        }
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ Handlers ============

async fn handle_chat(
    State(state): State<AppState>,
    Path(chatbot_id): Path<String>,
    Json(turn): Json<ChatTurn>,
) -> Result<Json<ChatReply>, AppError> {
    if turn.message.trim().is_empty() {
        return Err(bad_request("message is required"));
    }

    let profile = state
        .store
        .get_chatbot(&chatbot_id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .filter(|p| p.active)
        .ok_or_else(|| not_found("Chatbot not found or inactive"))?;

    let reply = match tokio::time::timeout(
        state.chat_timeout,
        answer_turn(
            &profile,
            &state.retriever,
            state.generator.as_ref(),
            &turn,
            state.top_k,
        ),
    )
    .await
    {
        Ok(reply) => reply,
        Err(_) => {
            tracing::error!(chatbot_id = %chatbot_id, "chat turn timed out");
            ChatReply {
                response: FALLBACK_MESSAGE.to_string(),
                session_id: turn.session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            }
        }
    };

    Ok(Json(reply))
}

#[derive(Deserialize)]
struct IngestRequest {
    storage_key: String,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if req.storage_key.trim().is_empty() {
        return Err(bad_request("storage_key is required"));
    }

    let report = state
        .pipeline
        .run(&req.storage_key)
        .await
        .map_err(|e| bad_request(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "chatbot_id": report.chatbot_id,
        "document_id": report.document_id,
        "status": report.status.as_str(),
        "chunk_count": report.chunk_count,
        "error": report.error,
    })))
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(chatbot_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let documents = state
        .store
        .list_documents(&chatbot_id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let items: Vec<serde_json::Value> = documents
        .iter()
        .map(|d| {
            serde_json::json!({
                "document_id": d.document_id,
                "filename": d.filename,
                "content_type": d.content_type,
                "status": d.status.as_str(),
                "chunk_count": d.chunk_count,
                "error": d.error,
                "created_at": d.created_at.to_rfc3339(),
                "updated_at": d.updated_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "documents": items })))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path((chatbot_id, document_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let existed = state
        .store
        .get_document(&chatbot_id, &document_id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .is_some();
    if !existed {
        return Err(not_found("Document not found"));
    }

    let removed_chunks = state
        .pipeline
        .remove_document(&chatbot_id, &document_id)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "removed_chunks": removed_chunks,
    })))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
