//! Session CRUD. At most one session carries the "active" designation at a
//! time; activation is an explicit clear-then-set inside one transaction,
//! never ambient state.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::ChatMessage;
use crate::utils::truncate_str;

use super::{MemoryStore, Session};

/// Session titles derive from the first user message, capped for list UIs.
const TITLE_MAX_CHARS: usize = 60;

impl MemoryStore {
    /// Create a session titled after the first user message and mark it
    /// active (clearing any previously active session).
    pub async fn create_session(&self, first_user_message: &str) -> anyhow::Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: derive_title(first_user_message),
            turn_number: 0,
            messages: Vec::new(),
            active: true,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE sessions SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO sessions (id, title, turn_number, messages_json, active, created_at, updated_at)
             VALUES (?, ?, 0, '[]', 1, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(session_id = %session.id, title = %session.title, "Created session");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, title, turn_number, messages_json, active, created_at, updated_at
             FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    /// The currently active session, if any.
    pub async fn active_session(&self) -> anyhow::Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, title, turn_number, messages_json, active, created_at, updated_at
             FROM sessions WHERE active = 1 LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    /// Make `session_id` the single active session.
    pub async fn set_active_session(&self, session_id: &str) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE sessions SET active = 0 WHERE active = 1")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("UPDATE sessions SET active = 1 WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("No session with id '{}'", session_id);
        }
        Ok(())
    }

    /// Most recently updated sessions, newest first.
    pub async fn list_recent_sessions(&self, limit: usize) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, title, turn_number, messages_json, active, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// Append messages to the session snapshot and bump `updated_at`.
    pub async fn append_session_messages(
        &self,
        session_id: &str,
        new_messages: &[ChatMessage],
    ) -> anyhow::Result<()> {
        let Some(mut session) = self.get_session(session_id).await? else {
            anyhow::bail!("No session with id '{}'", session_id);
        };
        session.messages.extend_from_slice(new_messages);

        sqlx::query("UPDATE sessions SET messages_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&session.messages)?)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Advance the session's turn counter and return the new turn number.
    /// Turn numbers are strictly increasing per session, starting at 1.
    pub async fn next_turn_number(&self, session_id: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "UPDATE sessions SET turn_number = turn_number + 1, updated_at = ?
             WHERE id = ? RETURNING turn_number",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(r) => Ok(r.get("turn_number")),
            None => anyhow::bail!("No session with id '{}'", session_id),
        }
    }

    /// Delete a session and everything keyed to it (turns, context,
    /// embeddings).
    pub async fn delete_session(&self, session_id: &str) -> anyhow::Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM embeddings WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM context WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(session_id, "Deleted session and dependent records");
        Ok(())
    }

    /// Bulk delete: every session and all dependent records.
    pub async fn delete_all_sessions(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM context").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM turns").execute(&mut *tx).await?;
        let result = sqlx::query("DELETE FROM sessions").execute(&mut *tx).await?;
        tx.commit().await?;

        info!(sessions = result.rows_affected(), "Bulk-deleted sessions");
        Ok(result.rows_affected())
    }
}

fn derive_title(first_user_message: &str) -> String {
    let collapsed = first_user_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "New chat".to_string()
    } else {
        truncate_str(&collapsed, TITLE_MAX_CHARS)
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Session> {
    let messages_json: String = row.get("messages_json");
    let created_str: String = row.get("created_at");
    let updated_str: String = row.get("updated_at");
    let active: i64 = row.get("active");

    Ok(Session {
        id: row.get("id"),
        title: row.get("title"),
        turn_number: row.get("turn_number"),
        messages: serde_json::from_str(&messages_json)?,
        active: active != 0,
        created_at: DateTime::parse_from_rfc3339(&created_str)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_str)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::super::MemoryStore;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn only_one_session_is_active() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let first = store.create_session("first question").await.unwrap();
        let second = store.create_session("second question").await.unwrap();

        let active = store.active_session().await.unwrap().unwrap();
        assert_eq!(active.id, second.id);

        store.set_active_session(&first.id).await.unwrap();
        let active = store.active_session().await.unwrap().unwrap();
        assert_eq!(active.id, first.id);
    }

    #[tokio::test]
    async fn turn_numbers_start_at_one_and_increase() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hello").await.unwrap();
        assert_eq!(store.next_turn_number(&session.id).await.unwrap(), 1);
        assert_eq!(store.next_turn_number(&session.id).await.unwrap(), 2);
        assert_eq!(store.next_turn_number(&session.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn title_derives_from_first_message() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store
            .create_session("  what   is\nthis page about? ")
            .await
            .unwrap();
        assert_eq!(session.title, "what is this page about?");

        let long = "x".repeat(200);
        let session = store.create_session(&long).await.unwrap();
        assert!(session.title.chars().count() <= 60);
        assert!(session.title.ends_with("..."));
    }

    #[tokio::test]
    async fn message_snapshot_appends() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        store
            .append_session_messages(
                &session.id,
                &[ChatMessage::user("hi"), ChatMessage::assistant("hello")],
            )
            .await
            .unwrap();
        let loaded = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }

    #[tokio::test]
    async fn delete_session_removes_it() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        store.delete_session(&session.id).await.unwrap();
        assert!(store.get_session(&session.id).await.unwrap().is_none());
    }
}
