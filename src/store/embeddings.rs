//! Embedding rows and cosine-similarity retrieval.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::binary::{decode_embedding, encode_embedding};
use super::math::cosine_similarity;
use super::MemoryStore;

/// What a stored vector represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    User,
    Assistant,
    ToolCall,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::User => "user",
            EmbeddingKind::Assistant => "assistant",
            EmbeddingKind::ToolCall => "tool_call",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "user" => Ok(EmbeddingKind::User),
            "assistant" => Ok(EmbeddingKind::Assistant),
            "tool_call" => Ok(EmbeddingKind::ToolCall),
            other => anyhow::bail!("Unknown embedding kind '{}'", other),
        }
    }
}

impl std::fmt::Display for EmbeddingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub session_id: String,
    pub tab_id: i64,
    pub turn_number: i64,
    pub kind: EmbeddingKind,
    pub content_hash: String,
    pub embedding: Vec<f32>,
    pub metadata: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Optional constraints for semantic search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub session_id: Option<String>,
    pub tab_id: Option<i64>,
    pub kind: Option<EmbeddingKind>,
    pub limit: usize,
    pub threshold: f32,
}

/// A search hit with its similarity score.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub record: EmbeddingRecord,
    pub similarity: f32,
}

impl MemoryStore {
    /// Store an embedding vector, deduplicated on
    /// `(content_hash, session_id, tab_id, kind, turn_number)`.
    /// Returns the row id — the existing one when the same content was
    /// already embedded for the same coordinates.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_embedding(
        &self,
        session_id: &str,
        tab_id: i64,
        turn_number: i64,
        kind: EmbeddingKind,
        content_hash: &str,
        embedding: &[f32],
        metadata: Option<&str>,
    ) -> anyhow::Result<String> {
        if embedding.is_empty() {
            anyhow::bail!("Refusing to store an empty embedding vector");
        }

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT id FROM embeddings
             WHERE content_hash = ? AND session_id = ? AND tab_id = ? AND kind = ? AND turn_number = ?",
        )
        .bind(content_hash)
        .bind(session_id)
        .bind(tab_id)
        .bind(kind.as_str())
        .bind(turn_number)
        .fetch_optional(self.pool())
        .await?;

        if let Some(id) = existing {
            debug!(session_id, turn_number, kind = kind.as_str(), "Embedding already stored");
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO embeddings (id, session_id, tab_id, turn_number, kind, content_hash, embedding, metadata, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(tab_id)
        .bind(turn_number)
        .bind(kind.as_str())
        .bind(content_hash)
        .bind(encode_embedding(embedding))
        .bind(metadata)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;

        Ok(id)
    }

    /// Embed `query` via the configured endpoint and rank stored vectors by
    /// cosine similarity. Embedding failure propagates here — search *is*
    /// the requested operation.
    pub async fn semantic_search(
        &self,
        query: &str,
        filter: &SearchFilter,
    ) -> anyhow::Result<Vec<SearchMatch>> {
        let query_vec = self.embedder()?.embed_one(query).await?;
        self.search_by_vector(&query_vec, filter).await
    }

    /// Rank stored vectors against an already-computed query vector.
    pub async fn search_by_vector(
        &self,
        query_vec: &[f32],
        filter: &SearchFilter,
    ) -> anyhow::Result<Vec<SearchMatch>> {
        let mut sql = String::from(
            "SELECT id, session_id, tab_id, turn_number, kind, content_hash, embedding, metadata, timestamp
             FROM embeddings WHERE 1=1",
        );
        if filter.session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if filter.tab_id.is_some() {
            sql.push_str(" AND tab_id = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND kind = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ref sid) = filter.session_id {
            query = query.bind(sid);
        }
        if let Some(tid) = filter.tab_id {
            query = query.bind(tid);
        }
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }

        let rows = query.fetch_all(self.pool()).await?;

        let mut matches = Vec::new();
        for row in &rows {
            let record = row_to_record(row)?;
            // Dimension mismatch is a data-integrity error, not a skip.
            let similarity = cosine_similarity(query_vec, &record.embedding)?;
            if similarity >= filter.threshold {
                matches.push(SearchMatch { record, similarity });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let limit = if filter.limit == 0 { 10 } else { filter.limit };
        matches.truncate(limit);

        debug!(
            candidates = rows.len(),
            hits = matches.len(),
            threshold = filter.threshold,
            "Semantic search"
        );
        Ok(matches)
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<EmbeddingRecord> {
    let kind_str: String = row.get("kind");
    let blob: Vec<u8> = row.get("embedding");
    let timestamp_str: String = row.get("timestamp");

    Ok(EmbeddingRecord {
        id: row.get("id"),
        session_id: row.get("session_id"),
        tab_id: row.get("tab_id"),
        turn_number: row.get("turn_number"),
        kind: EmbeddingKind::parse(&kind_str)?,
        content_hash: row.get("content_hash"),
        embedding: decode_embedding(&blob)?,
        metadata: row.get("metadata"),
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::super::{content_hash, MemoryStore};
    use super::*;

    #[tokio::test]
    async fn duplicate_embedding_returns_original_id() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let hash = content_hash("hello");
        let vec = vec![0.1f32, 0.2, 0.3];

        let first = store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, &hash, &vec, None)
            .await
            .unwrap();
        let second = store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, &hash, &vec, None)
            .await
            .unwrap();
        assert_eq!(first, second);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn different_coordinates_store_separately() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let hash = content_hash("hello");
        let vec = vec![0.1f32, 0.2, 0.3];

        let a = store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, &hash, &vec, None)
            .await
            .unwrap();
        let b = store
            .store_embedding("s1", 1, 2, EmbeddingKind::User, &hash, &vec, None)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_vector_rejected() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let result = store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, "h", &[], None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn search_ranks_filters_and_caps() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();

        store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, "h1", &[1.0, 0.0], None)
            .await
            .unwrap();
        store
            .store_embedding("s1", 1, 2, EmbeddingKind::User, "h2", &[0.7, 0.7], None)
            .await
            .unwrap();
        store
            .store_embedding("s2", 2, 1, EmbeddingKind::User, "h3", &[1.0, 0.0], None)
            .await
            .unwrap();

        let filter = SearchFilter {
            session_id: Some("s1".to_string()),
            threshold: 0.5,
            limit: 10,
            ..Default::default()
        };
        let matches = store.search_by_vector(&[1.0, 0.0], &filter).await.unwrap();
        assert_eq!(matches.len(), 2);
        // Exact match first.
        assert_eq!(matches[0].record.content_hash, "h1");
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
        assert!(matches[0].similarity >= matches[1].similarity);

        let capped = SearchFilter {
            session_id: Some("s1".to_string()),
            threshold: 0.0,
            limit: 1,
            ..Default::default()
        };
        let matches = store.search_by_vector(&[1.0, 0.0], &capped).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_raises() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        store
            .store_embedding("s1", 1, 1, EmbeddingKind::User, "h1", &[1.0, 0.0, 0.0], None)
            .await
            .unwrap();

        let filter = SearchFilter {
            session_id: Some("s1".to_string()),
            ..Default::default()
        };
        let result = store.search_by_vector(&[1.0, 0.0], &filter).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn search_without_embedder_errors() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let result = store.semantic_search("query", &SearchFilter::default()).await;
        assert!(result.is_err());
    }
}
