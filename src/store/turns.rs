//! Completed-turn storage. One row per exchange, immutable once written.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, warn};

use crate::utils::truncate_str;

use super::{content_hash, estimate_tokens, EmbeddingKind, MemoryStore, Turn};

/// Per-side cap for the stored Q/A summary line.
const SUMMARY_SIDE_CHARS: usize = 150;

impl MemoryStore {
    /// Persist a completed exchange with a cheap token estimate and a
    /// truncated Q/A summary used later for history compression.
    pub async fn store_turn(
        &self,
        session_id: &str,
        turn_number: i64,
        user_message: &str,
        assistant_response: &str,
    ) -> anyhow::Result<Turn> {
        let turn = Turn {
            session_id: session_id.to_string(),
            turn_number,
            user_message: user_message.to_string(),
            assistant_response: assistant_response.to_string(),
            timestamp: Utc::now(),
            tokens: (estimate_tokens(user_message) + estimate_tokens(assistant_response)) as i64,
            summary: summarize_turn(user_message, assistant_response),
        };

        sqlx::query(
            "INSERT INTO turns (session_id, turn_number, user_message, assistant_response, timestamp, tokens, summary)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&turn.session_id)
        .bind(turn.turn_number)
        .bind(&turn.user_message)
        .bind(&turn.assistant_response)
        .bind(turn.timestamp.to_rfc3339())
        .bind(turn.tokens)
        .bind(&turn.summary)
        .execute(self.pool())
        .await?;

        debug!(session_id, turn_number, tokens = turn.tokens, "Stored turn");
        Ok(turn)
    }

    /// Store the turn, then embed and store vectors for both sides.
    /// Embedding failure is logged and swallowed: the chat flow must not
    /// fail because the embedding endpoint is down.
    pub async fn store_turn_with_embeddings(
        &self,
        session_id: &str,
        tab_id: i64,
        turn_number: i64,
        user_message: &str,
        assistant_response: &str,
    ) -> anyhow::Result<Turn> {
        let turn = self
            .store_turn(session_id, turn_number, user_message, assistant_response)
            .await?;

        for (kind, text) in [
            (EmbeddingKind::User, user_message),
            (EmbeddingKind::Assistant, assistant_response),
        ] {
            if text.trim().is_empty() {
                continue;
            }
            let result = async {
                let vector = self.embedder()?.embed_one(text).await?;
                self.store_embedding(
                    session_id,
                    tab_id,
                    turn_number,
                    kind,
                    &content_hash(text),
                    &vector,
                    None,
                )
                .await
            }
            .await;

            if let Err(e) = result {
                warn!(
                    session_id,
                    turn_number,
                    kind = %kind,
                    "Embedding storage failed (continuing): {}",
                    e
                );
            }
        }

        Ok(turn)
    }

    /// All turns for a session in turn order.
    pub async fn turns_for_session(&self, session_id: &str) -> anyhow::Result<Vec<Turn>> {
        let rows = sqlx::query(
            "SELECT session_id, turn_number, user_message, assistant_response, timestamp, tokens, summary
             FROM turns WHERE session_id = ? ORDER BY turn_number",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_turn).collect()
    }

    /// Look up one turn by its number within a session.
    pub async fn turn_by_number(
        &self,
        session_id: &str,
        turn_number: i64,
    ) -> anyhow::Result<Option<Turn>> {
        let row = sqlx::query(
            "SELECT session_id, turn_number, user_message, assistant_response, timestamp, tokens, summary
             FROM turns WHERE session_id = ? AND turn_number = ?",
        )
        .bind(session_id)
        .bind(turn_number)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_turn(&r)).transpose()
    }
}

fn summarize_turn(user_message: &str, assistant_response: &str) -> String {
    format!(
        "Q: {} A: {}",
        truncate_str(user_message.trim(), SUMMARY_SIDE_CHARS),
        truncate_str(assistant_response.trim(), SUMMARY_SIDE_CHARS)
    )
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Turn> {
    let timestamp_str: String = row.get("timestamp");
    Ok(Turn {
        session_id: row.get("session_id"),
        turn_number: row.get("turn_number"),
        user_message: row.get("user_message"),
        assistant_response: row.get("assistant_response"),
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)?.with_timezone(&Utc),
        tokens: row.get("tokens"),
        summary: row.get("summary"),
    })
}

#[cfg(test)]
mod tests {
    use super::super::MemoryStore;

    #[tokio::test]
    async fn stores_and_retrieves_turns_in_order() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        store
            .store_turn(&session.id, 1, "Hello", "Hi there")
            .await
            .unwrap();
        store
            .store_turn(&session.id, 2, "How are you?", "Fine")
            .await
            .unwrap();

        let turns = store.turns_for_session(&session.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn_number, 1);
        assert_eq!(turns[0].user_message, "Hello");
        assert_eq!(turns[1].assistant_response, "Fine");
    }

    #[tokio::test]
    async fn turn_carries_estimate_and_summary() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let turn = store
            .store_turn(&session.id, 1, "Hello", "Hi there")
            .await
            .unwrap();
        // ceil(5/4) + ceil(8/4) = 2 + 2
        assert_eq!(turn.tokens, 4);
        assert_eq!(turn.summary, "Q: Hello A: Hi there");
    }

    #[tokio::test]
    async fn lookup_by_turn_number() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        store.store_turn(&session.id, 1, "a", "b").await.unwrap();

        let found = store.turn_by_number(&session.id, 1).await.unwrap();
        assert!(found.is_some());
        let missing = store.turn_by_number(&session.id, 2).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn turn_without_embedder_still_stores() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        // No embedder configured: turn storage succeeds, embeddings skipped.
        let turn = store
            .store_turn_with_embeddings(&session.id, 1, 1, "Hello", "Hi")
            .await
            .unwrap();
        assert_eq!(turn.turn_number, 1);
    }
}
