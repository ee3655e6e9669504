//! Per-session context snapshots: current page, attachments, and the
//! FIFO-capped page history.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::debug;

use crate::types::{Attachment, AttachmentKind};
use crate::utils::truncate_str;

use super::{ContextSnapshot, MemoryStore, PageRecord};

impl MemoryStore {
    pub async fn get_context(&self, session_id: &str) -> anyhow::Result<Option<ContextSnapshot>> {
        let row = sqlx::query(
            "SELECT session_id, tab_id, page_content, page_hash, page_summary,
                    attachments_json, attachment_summaries_json, pages_json, timestamp
             FROM context WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_context(&r)).transpose()
    }

    /// Merge new page/attachment data into the session's snapshot.
    ///
    /// A changed `page_hash` supersedes the stored page: fresh content wins
    /// and the stale summary is dropped. Same hash keeps the cached summary.
    /// Attachments replace the stored set when provided.
    pub async fn upsert_context(
        &self,
        session_id: &str,
        tab_id: i64,
        page_content: Option<&str>,
        page_hash: Option<&str>,
        attachments: Option<&[Attachment]>,
    ) -> anyhow::Result<ContextSnapshot> {
        let mut snapshot = self
            .get_context(session_id)
            .await?
            .unwrap_or_else(|| ContextSnapshot {
                session_id: session_id.to_string(),
                ..Default::default()
            });

        snapshot.tab_id = tab_id;

        if let (Some(content), Some(hash)) = (page_content, page_hash) {
            if snapshot.page_hash.as_deref() != Some(hash) {
                debug!(session_id, "Page changed; superseding stored summary");
                snapshot.page_summary = None;
            }
            snapshot.page_content = Some(content.to_string());
            snapshot.page_hash = Some(hash.to_string());
        }

        if let Some(new_attachments) = attachments {
            snapshot.attachments = new_attachments.to_vec();
            // Summaries are keyed positionally, so they are recomputed
            // whenever the attachment set changes.
            snapshot.attachment_summaries = new_attachments
                .iter()
                .map(summarize_attachment)
                .collect();
        }

        snapshot.timestamp = Some(Utc::now());
        self.write_context(&snapshot).await?;
        Ok(snapshot)
    }

    /// Cache a one-paragraph summary for the current page.
    pub async fn set_page_summary(&self, session_id: &str, summary: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE context SET page_summary = ? WHERE session_id = ?")
            .bind(summary)
            .bind(session_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Drop the stored attachments once their turn has been sent. They are
    /// transient inputs to one turn, not session history.
    pub async fn clear_pending_attachments(&self, session_id: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE context SET attachments_json = '[]', attachment_summaries_json = '[]'
             WHERE session_id = ?",
        )
        .bind(session_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Remember a page for the session. Returns `false` when the page is
    /// already present (same content hash). Once the cap is reached the
    /// oldest page is evicted (FIFO).
    pub async fn add_page_to_session(
        &self,
        session_id: &str,
        tab_id: i64,
        url: &str,
        title: Option<&str>,
        content_hash: &str,
    ) -> anyhow::Result<bool> {
        let mut snapshot = self
            .get_context(session_id)
            .await?
            .unwrap_or_else(|| ContextSnapshot {
                session_id: session_id.to_string(),
                tab_id,
                ..Default::default()
            });

        if snapshot.pages.iter().any(|p| p.content_hash == content_hash) {
            debug!(session_id, url, "Page already in session history");
            return Ok(false);
        }

        snapshot.pages.push(PageRecord {
            url: url.to_string(),
            title: title.map(|t| t.to_string()),
            content_hash: content_hash.to_string(),
            added_at: Utc::now(),
        });
        while snapshot.pages.len() > self.page_cap() {
            let evicted = snapshot.pages.remove(0);
            debug!(session_id, url = %evicted.url, "Evicted oldest page (FIFO cap)");
        }

        snapshot.timestamp = Some(Utc::now());
        self.write_context(&snapshot).await?;
        Ok(true)
    }

    pub(crate) fn page_cap(&self) -> usize {
        self.page_cap
    }

    async fn write_context(&self, snapshot: &ContextSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO context (session_id, tab_id, page_content, page_hash, page_summary,
                                  attachments_json, attachment_summaries_json, pages_json, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                tab_id = excluded.tab_id,
                page_content = excluded.page_content,
                page_hash = excluded.page_hash,
                page_summary = excluded.page_summary,
                attachments_json = excluded.attachments_json,
                attachment_summaries_json = excluded.attachment_summaries_json,
                pages_json = excluded.pages_json,
                timestamp = excluded.timestamp",
        )
        .bind(&snapshot.session_id)
        .bind(snapshot.tab_id)
        .bind(&snapshot.page_content)
        .bind(&snapshot.page_hash)
        .bind(&snapshot.page_summary)
        .bind(serde_json::to_string(&snapshot.attachments)?)
        .bind(serde_json::to_string(&snapshot.attachment_summaries)?)
        .bind(serde_json::to_string(&snapshot.pages)?)
        .bind(snapshot.timestamp.map(|t| t.to_rfc3339()))
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// One extractive line per attachment, keyed positionally alongside the
/// stored attachment list.
fn summarize_attachment(attachment: &Attachment) -> String {
    match attachment.kind {
        AttachmentKind::Image => match attachment.filename.as_deref() {
            Some(name) => format!("image: {}", name),
            None => "image attachment".to_string(),
        },
        AttachmentKind::Snippet => truncate_str(&attachment.content, 120),
    }
}

fn row_to_context(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ContextSnapshot> {
    let attachments_json: String = row.get("attachments_json");
    let summaries_json: String = row.get("attachment_summaries_json");
    let pages_json: String = row.get("pages_json");
    let timestamp_str: Option<String> = row.get("timestamp");

    Ok(ContextSnapshot {
        session_id: row.get("session_id"),
        tab_id: row.get("tab_id"),
        page_content: row.get("page_content"),
        page_hash: row.get("page_hash"),
        page_summary: row.get("page_summary"),
        attachments: serde_json::from_str(&attachments_json)?,
        attachment_summaries: serde_json::from_str(&summaries_json)?,
        pages: serde_json::from_str(&pages_json)?,
        timestamp: timestamp_str
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc)))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::{content_hash, MemoryStore};
    use crate::types::{Attachment, AttachmentKind};

    fn snippet(id: &str, content: &str) -> Attachment {
        Attachment {
            id: id.to_string(),
            cmd: None,
            kind: AttachmentKind::Snippet,
            content: content.to_string(),
            source_url: None,
            page_hash: None,
            filename: Some(format!("{}.txt", id)),
        }
    }

    #[tokio::test]
    async fn upsert_summarizes_attachments() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        let long = "word ".repeat(100);
        store
            .upsert_context(&session.id, 1, None, None, Some(&[snippet("notes", &long)]))
            .await
            .unwrap();

        let ctx = store.get_context(&session.id).await.unwrap().unwrap();
        assert_eq!(ctx.attachments.len(), 1);
        assert_eq!(ctx.attachment_summaries.len(), 1);
        assert!(ctx.attachment_summaries[0].chars().count() <= 120);
        assert!(ctx.attachment_summaries[0].starts_with("word"));
    }

    #[tokio::test]
    async fn clearing_pending_attachments_keeps_the_page() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        let hash = content_hash("page body");
        store
            .upsert_context(
                &session.id,
                1,
                Some("page body"),
                Some(&hash),
                Some(&[snippet("a", "alpha"), snippet("b", "beta")]),
            )
            .await
            .unwrap();
        store.clear_pending_attachments(&session.id).await.unwrap();

        let ctx = store.get_context(&session.id).await.unwrap().unwrap();
        assert!(ctx.attachments.is_empty());
        assert!(ctx.attachment_summaries.is_empty());
        assert_eq!(ctx.page_content.as_deref(), Some("page body"));
    }

    #[tokio::test]
    async fn page_change_supersedes_summary() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        store
            .upsert_context(&session.id, 1, Some("first page"), Some(&content_hash("first page")), None)
            .await
            .unwrap();
        store.set_page_summary(&session.id, "a summary").await.unwrap();

        // Same hash: summary survives.
        store
            .upsert_context(&session.id, 1, Some("first page"), Some(&content_hash("first page")), None)
            .await
            .unwrap();
        let ctx = store.get_context(&session.id).await.unwrap().unwrap();
        assert_eq!(ctx.page_summary.as_deref(), Some("a summary"));

        // New hash: fresh content wins, summary dropped.
        store
            .upsert_context(&session.id, 1, Some("second page"), Some(&content_hash("second page")), None)
            .await
            .unwrap();
        let ctx = store.get_context(&session.id).await.unwrap().unwrap();
        assert_eq!(ctx.page_content.as_deref(), Some("second page"));
        assert!(ctx.page_summary.is_none());
    }

    #[tokio::test]
    async fn page_history_dedupes_and_evicts_fifo() {
        let store = MemoryStore::open_in_memory(None, 3).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        for i in 0..3 {
            let added = store
                .add_page_to_session(
                    &session.id,
                    1,
                    &format!("https://example.com/{}", i),
                    None,
                    &content_hash(&format!("page {}", i)),
                )
                .await
                .unwrap();
            assert!(added);
        }

        // Duplicate content: no-op.
        let added = store
            .add_page_to_session(
                &session.id,
                1,
                "https://example.com/0-again",
                None,
                &content_hash("page 0"),
            )
            .await
            .unwrap();
        assert!(!added);

        // Fourth distinct page evicts the oldest.
        let added = store
            .add_page_to_session(
                &session.id,
                1,
                "https://example.com/3",
                None,
                &content_hash("page 3"),
            )
            .await
            .unwrap();
        assert!(added);

        let ctx = store.get_context(&session.id).await.unwrap().unwrap();
        assert_eq!(ctx.pages.len(), 3);
        let urls: Vec<&str> = ctx.pages.iter().map(|p| p.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/1",
                "https://example.com/2",
                "https://example.com/3"
            ]
        );
    }
}
