//! Turn/context memory store: sessions, completed turns, page/attachment
//! context snapshots, and embedding vectors, persisted in SQLite.
//!
//! Each logical operation is one transaction; there are no multi-step
//! cross-record transactions, so a turn can exist without its embeddings
//! (embedding failure after turn storage is tolerated, not rolled back).

mod assemble;
pub mod binary;
mod context;
mod embeddings;
pub mod math;
mod sessions;
mod turns;

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::client::EmbeddingClient;
use crate::types::ChatMessage;

pub use assemble::{expand_placeholders, ContextParams, PAGE_PLACEHOLDER};
pub use embeddings::{EmbeddingKind, EmbeddingRecord, SearchFilter, SearchMatch};

/// Estimate token count from text: ceil(chars / 4). A crude proxy for real
/// tokenization; the context budget treats it as a soft heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// SHA-256 hex digest used to deduplicate page content and embeddings.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A persisted, user-switchable conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub turn_number: i64,
    /// Message snapshot as last sent/received, for UI redisplay.
    pub messages: Vec<ChatMessage>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One completed user/assistant exchange. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub session_id: String,
    pub turn_number: i64,
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: i64,
    pub summary: String,
}

/// A page remembered for a session (FIFO-capped history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: Option<String>,
    pub content_hash: String,
    pub added_at: DateTime<Utc>,
}

/// Per-session context snapshot: current page, attachments, page history.
/// Upserted (merged) whenever new page/attachment data arrives.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContextSnapshot {
    pub session_id: String,
    pub tab_id: i64,
    pub page_content: Option<String>,
    pub page_hash: Option<String>,
    pub page_summary: Option<String>,
    pub attachments: Vec<crate::types::Attachment>,
    pub attachment_summaries: Vec<String>,
    pub pages: Vec<PageRecord>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub struct MemoryStore {
    pool: SqlitePool,
    embedder: Option<Arc<EmbeddingClient>>,
    page_cap: usize,
}

impl MemoryStore {
    /// Open (or create) the store at `db_path`. The embedder is optional:
    /// without it, turn storage still works and only the embedding paths
    /// are unavailable.
    pub async fn open(
        db_path: &str,
        embedder: Option<Arc<EmbeddingClient>>,
        page_cap: usize,
    ) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            embedder,
            page_cap,
        };
        store.migrate().await?;
        info!(db_path, "Memory store initialized");
        Ok(store)
    }

    /// In-memory store for tests and throwaway sessions. A single
    /// connection, because each in-memory connection is its own database.
    pub async fn open_in_memory(
        embedder: Option<Arc<EmbeddingClient>>,
        page_cap: usize,
    ) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self {
            pool,
            embedder,
            page_cap,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn embedder(&self) -> anyhow::Result<&EmbeddingClient> {
        self.embedder
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No embedding endpoint configured"))
    }

    /// Create collections and indexes. Additive and idempotent: every
    /// statement is `IF NOT EXISTS`, so version bumps only ever add.
    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                turn_number INTEGER NOT NULL DEFAULT 0,
                messages_json TEXT NOT NULL DEFAULT '[]',
                active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                session_id TEXT NOT NULL,
                turn_number INTEGER NOT NULL,
                user_message TEXT NOT NULL,
                assistant_response TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                tokens INTEGER NOT NULL,
                summary TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_number)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_session
             ON turns(session_id, turn_number)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS context (
                session_id TEXT PRIMARY KEY,
                tab_id INTEGER NOT NULL,
                page_content TEXT,
                page_hash TEXT,
                page_summary TEXT,
                attachments_json TEXT NOT NULL DEFAULT '[]',
                attachment_summaries_json TEXT NOT NULL DEFAULT '[]',
                pages_json TEXT NOT NULL DEFAULT '[]',
                timestamp TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_context_tab ON context(tab_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                tab_id INTEGER NOT NULL,
                turn_number INTEGER NOT NULL,
                kind TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_embeddings_dedupe
             ON embeddings(content_hash, session_id, tab_id, kind, turn_number)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_session
             ON embeddings(session_id, turn_number)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_kind ON embeddings(kind)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn content_hash_is_stable_and_distinct() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello!"));
        assert_eq!(content_hash("hello").len(), 64);
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        // Running the migration again must not error.
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        let path = path.to_str().unwrap();

        let store = MemoryStore::open(path, None, 10).await.unwrap();
        let session = store.create_session("persisted question").await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(path, None, 10).await.unwrap();
        let loaded = reopened.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "persisted question");
    }
}
