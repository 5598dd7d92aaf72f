//! SQLite-backed metadata store.
//!
//! Holds document records (ingestion outcomes the dashboard polls) and
//! chatbot profiles (generation settings the chat path reads). Vector data
//! never lives here — chunks and embeddings belong to the index backends.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::models::{ChatbotProfile, DocumentRecord, DocumentStatus};

#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database; each call returns an isolated store.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection, or every pool checkout would see a fresh empty db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema. Idempotent; safe to run on every startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                tenant_id TEXT NOT NULL,
                chatbot_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
                filename TEXT NOT NULL,
                status TEXT NOT NULL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (chatbot_id, document_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chatbots (
                chatbot_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                model TEXT NOT NULL,
                temperature REAL NOT NULL,
                max_tokens INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(tenant_id, chatbot_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============ Documents ============

    pub async fn put_document(&self, record: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
                (tenant_id, chatbot_id, document_id, storage_key, content_type,
                 filename, status, chunk_count, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chatbot_id, document_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                storage_key = excluded.storage_key,
                content_type = excluded.content_type,
                filename = excluded.filename,
                status = excluded.status,
                chunk_count = excluded.chunk_count,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.chatbot_id)
        .bind(&record.document_id)
        .bind(&record.storage_key)
        .bind(&record.content_type)
        .bind(&record.filename)
        .bind(record.status.as_str())
        .bind(record.chunk_count)
        .bind(&record.error)
        .bind(record.created_at.timestamp())
        .bind(record.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_document(
        &self,
        chatbot_id: &str,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE chatbot_id = ? AND document_id = ?",
        )
        .bind(chatbot_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_document).transpose()
    }

    pub async fn list_documents(&self, chatbot_id: &str) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE chatbot_id = ? ORDER BY created_at, document_id",
        )
        .bind(chatbot_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_document).collect()
    }

    /// Transition a record's ingestion status. `chunk_count` replaces the
    /// stored count when given; `error` is cleared unless provided.
    pub async fn set_status(
        &self,
        chatbot_id: &str,
        document_id: &str,
        status: DocumentStatus,
        chunk_count: Option<i64>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, chunk_count = COALESCE(?, chunk_count), error = ?, updated_at = ?
            WHERE chatbot_id = ? AND document_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(chunk_count)
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(chatbot_id)
        .bind(document_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_document(&self, chatbot_id: &str, document_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM documents WHERE chatbot_id = ? AND document_id = ?",
        )
        .bind(chatbot_id)
        .bind(document_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============ Chatbots ============

    pub async fn put_chatbot(&self, profile: &ChatbotProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chatbots
                (chatbot_id, tenant_id, name, system_prompt, model, temperature, max_tokens, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chatbot_id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                name = excluded.name,
                system_prompt = excluded.system_prompt,
                model = excluded.model,
                temperature = excluded.temperature,
                max_tokens = excluded.max_tokens,
                active = excluded.active
            "#,
        )
        .bind(&profile.chatbot_id)
        .bind(&profile.tenant_id)
        .bind(&profile.name)
        .bind(&profile.system_prompt)
        .bind(&profile.model)
        .bind(profile.temperature)
        .bind(profile.max_tokens as i64)
        .bind(profile.active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_chatbot(&self, chatbot_id: &str) -> Result<Option<ChatbotProfile>> {
        let row = sqlx::query("SELECT * FROM chatbots WHERE chatbot_id = ?")
            .bind(chatbot_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| ChatbotProfile {
            chatbot_id: row.get("chatbot_id"),
            tenant_id: row.get("tenant_id"),
            name: row.get("name"),
            system_prompt: row.get("system_prompt"),
            model: row.get("model"),
            temperature: row.get("temperature"),
            max_tokens: row.get::<i64, _>("max_tokens") as u32,
            active: row.get::<i64, _>("active") != 0,
        }))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> Result<DocumentRecord> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("unknown document status: {}", status_str))?;

    Ok(DocumentRecord {
        tenant_id: row.get("tenant_id"),
        chatbot_id: row.get("chatbot_id"),
        document_id: row.get("document_id"),
        storage_key: row.get("storage_key"),
        content_type: row.get("content_type"),
        filename: row.get("filename"),
        status,
        chunk_count: row.get("chunk_count"),
        error: row.get("error"),
        created_at: ts_to_datetime(row.get("created_at")),
        updated_at: ts_to_datetime(row.get("updated_at")),
    })
}

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chatbot: &str, doc: &str) -> DocumentRecord {
        let now = Utc::now();
        DocumentRecord {
            tenant_id: "t1".into(),
            chatbot_id: chatbot.into(),
            document_id: doc.into(),
            storage_key: format!("chatbots/{}/{}/file.txt", chatbot, doc),
            content_type: "text/plain".into(),
            filename: "file.txt".into(),
            status: DocumentStatus::Pending,
            chunk_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();

        store.put_document(&record("b1", "d1")).await.unwrap();
        let got = store.get_document("b1", "d1").await.unwrap().unwrap();
        assert_eq!(got.storage_key, "chatbots/b1/d1/file.txt");
        assert_eq!(got.status, DocumentStatus::Pending);
        assert!(store.get_document("b1", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_is_an_upsert() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();

        store.put_document(&record("b1", "d1")).await.unwrap();
        let mut updated = record("b1", "d1");
        updated.filename = "renamed.txt".into();
        store.put_document(&updated).await.unwrap();

        let all = store.list_documents("b1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].filename, "renamed.txt");
    }

    #[tokio::test]
    async fn status_transitions_persist() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.put_document(&record("b1", "d1")).await.unwrap();

        store
            .set_status("b1", "d1", DocumentStatus::Complete, Some(4), None)
            .await
            .unwrap();
        let got = store.get_document("b1", "d1").await.unwrap().unwrap();
        assert_eq!(got.status, DocumentStatus::Complete);
        assert_eq!(got.chunk_count, 4);
        assert!(got.error.is_none());

        store
            .set_status("b1", "d1", DocumentStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        let got = store.get_document("b1", "d1").await.unwrap().unwrap();
        assert_eq!(got.status, DocumentStatus::Failed);
        assert_eq!(got.error.as_deref(), Some("boom"));
        // chunk_count untouched by the failure transition
        assert_eq!(got.chunk_count, 4);
    }

    #[tokio::test]
    async fn delete_document_removes_record() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.put_document(&record("b1", "d1")).await.unwrap();

        assert!(store.delete_document("b1", "d1").await.unwrap());
        assert!(!store.delete_document("b1", "d1").await.unwrap());
        assert!(store.get_document("b1", "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chatbot_profile_roundtrip() {
        let store = DocumentStore::connect_in_memory().await.unwrap();
        store.migrate().await.unwrap();

        let profile = ChatbotProfile {
            chatbot_id: "b1".into(),
            tenant_id: "t1".into(),
            name: "Support Bot".into(),
            system_prompt: "You are a helpful support assistant.".into(),
            model: "claude-3-5-haiku".into(),
            temperature: 0.3,
            max_tokens: 1024,
            active: true,
        };
        store.put_chatbot(&profile).await.unwrap();

        let got = store.get_chatbot("b1").await.unwrap().unwrap();
        assert_eq!(got.name, "Support Bot");
        assert_eq!(got.max_tokens, 1024);
        assert!(got.active);
        assert!(store.get_chatbot("absent").await.unwrap().is_none());
    }
}
