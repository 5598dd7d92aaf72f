//! # Groundwork CLI (`gwk`)
//!
//! Operational interface for the ingestion and chat core: database setup,
//! chatbot registration, document ingestion, one-off chat turns, and the
//! HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! gwk --config ./config/groundwork.toml <command>
//! ```
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the metadata database
//! gwk init
//!
//! # Register a chatbot profile
//! gwk chatbot-add --id support --tenant acme --name "Support Bot" \
//!     --system-prompt "You answer questions about Acme products."
//!
//! # Ingest an uploaded file by its storage key
//! gwk ingest chatbots/support/doc-1/handbook.pdf
//!
//! # Ask one question
//! gwk chat support "How do refunds work?"
//!
//! # Remove a document and its indexed chunks
//! gwk delete-document support doc-1
//!
//! # Start the HTTP API
//! gwk serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use groundwork::blob::create_blob_store;
use groundwork::config::{load_config, Config};
use groundwork::docstore::DocumentStore;
use groundwork::embedding::create_embedder;
use groundwork::generate::HttpGenerator;
use groundwork::index::create_index;
use groundwork::ingest::IngestPipeline;
use groundwork::models::{ChatTurn, ChatbotProfile};
use groundwork::retrieve::Retriever;
use groundwork::server;

/// Groundwork — document ingestion and retrieval-augmented chat core for
/// embeddable chatbots.
#[derive(Parser)]
#[command(
    name = "gwk",
    about = "Groundwork — document ingestion and retrieval-augmented chat core for embeddable chatbots",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/groundwork.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the metadata database schema. Idempotent.
    Init,

    /// Register or update a chatbot profile.
    ChatbotAdd {
        /// Chatbot identifier (used in storage keys and the chat endpoint).
        #[arg(long)]
        id: String,
        /// Owning tenant identifier.
        #[arg(long)]
        tenant: String,
        /// Display name.
        #[arg(long)]
        name: String,
        /// System prompt prepended to every turn.
        #[arg(long)]
        system_prompt: String,
        /// Model registry key.
        #[arg(long, default_value = "claude-3-5-haiku")]
        model: String,
        /// Sampling temperature in [0, 1].
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,
        /// Completion token budget (0 = model default).
        #[arg(long, default_value_t = 0)]
        max_tokens: u32,
    },

    /// Ingest one uploaded document by its storage key
    /// (`chatbots/{chatbot_id}/{document_id}/{filename}`).
    Ingest {
        storage_key: String,
    },

    /// List a chatbot's document records and their ingestion status.
    Documents {
        chatbot_id: String,
    },

    /// Remove a document: its metadata record and all indexed chunks.
    DeleteDocument {
        chatbot_id: String,
        document_id: String,
    },

    /// Answer one chat turn from the command line.
    Chat {
        chatbot_id: String,
        message: String,
    },

    /// Start the HTTP server (chat endpoint, ingest trigger, documents API).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = DocumentStore::connect(&config.db.path).await?;
            store.migrate().await?;
            store.close().await;
            println!("initialized {}", config.db.path.display());
        }

        Commands::ChatbotAdd {
            id,
            tenant,
            name,
            system_prompt,
            model,
            temperature,
            max_tokens,
        } => {
            if !(0.0..=1.0).contains(&temperature) {
                anyhow::bail!("temperature must be in [0, 1]");
            }
            let store = DocumentStore::connect(&config.db.path).await?;
            store.migrate().await?;
            store
                .put_chatbot(&ChatbotProfile {
                    chatbot_id: id.clone(),
                    tenant_id: tenant,
                    name,
                    system_prompt,
                    model,
                    temperature,
                    max_tokens,
                    active: true,
                })
                .await?;
            store.close().await;
            println!("chatbot {} registered", id);
        }

        Commands::Ingest { storage_key } => {
            let pipeline = build_pipeline(&config).await?;
            let report = pipeline.run(&storage_key).await?;

            println!("ingest {}", storage_key);
            println!("  chatbot: {}", report.chatbot_id);
            println!("  document: {}", report.document_id);
            println!("  status: {}", report.status.as_str());
            println!("  chunks indexed: {}", report.chunk_count);
            if let Some(ref e) = report.error {
                println!("  error: {}", e);
            }
            println!("ok");
        }

        Commands::Documents { chatbot_id } => {
            let store = DocumentStore::connect(&config.db.path).await?;
            store.migrate().await?;
            let documents = store.list_documents(&chatbot_id).await?;
            if documents.is_empty() {
                println!("No documents.");
            }
            for d in documents {
                println!(
                    "{}  {}  [{}]  chunks={}{}",
                    d.document_id,
                    d.filename,
                    d.status.as_str(),
                    d.chunk_count,
                    d.error
                        .map(|e| format!("  error={}", e))
                        .unwrap_or_default()
                );
            }
            store.close().await;
        }

        Commands::DeleteDocument {
            chatbot_id,
            document_id,
        } => {
            let pipeline = build_pipeline(&config).await?;
            let removed = pipeline.remove_document(&chatbot_id, &document_id).await?;
            println!("deleted document {} ({} chunks removed)", document_id, removed);
        }

        Commands::Chat {
            chatbot_id,
            message,
        } => {
            let store = DocumentStore::connect(&config.db.path).await?;
            store.migrate().await?;
            let profile = store
                .get_chatbot(&chatbot_id)
                .await?
                .filter(|p| p.active)
                .ok_or_else(|| anyhow::anyhow!("Chatbot not found or inactive: {}", chatbot_id))?;

            let embedder: Arc<dyn groundwork::embedding::Embedder> =
                Arc::from(create_embedder(&config.embedding)?);
            let index: Arc<dyn groundwork::index::VectorIndex> =
                Arc::from(create_index(&config.index)?);
            let retriever = Retriever::new(embedder, index);
            let generator = HttpGenerator::new(&config.generation)?;

            let reply = server::answer_turn(
                &profile,
                &retriever,
                &generator,
                &ChatTurn {
                    message,
                    session_id: None,
                },
                config.retrieval.top_k,
            )
            .await;

            println!("{}", reply.response);
        }

        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

async fn build_pipeline(config: &Config) -> Result<IngestPipeline> {
    let store = DocumentStore::connect(&config.db.path).await?;
    store.migrate().await?;

    let blob: Arc<dyn groundwork::blob::BlobStore> = Arc::from(create_blob_store(&config.blob)?);
    let embedder: Arc<dyn groundwork::embedding::Embedder> =
        Arc::from(create_embedder(&config.embedding)?);
    let index: Arc<dyn groundwork::index::VectorIndex> = Arc::from(create_index(&config.index)?);

    Ok(IngestPipeline::new(
        blob,
        embedder,
        index,
        store,
        config.chunking.clone(),
        config.ingest.clone(),
    ))
}
