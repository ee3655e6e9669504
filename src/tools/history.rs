//! Conversation-memory tools backed by the [`MemoryStore`].
//!
//! These tools are session-scoped: the orchestrator injects `_session_id`
//! and `_tab_id` into the argument object before dispatch, so the model
//! never has to know (or guess) session identifiers. The injected fields
//! are not part of the advertised schemas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::store::{MemoryStore, SearchFilter};
use crate::utils::truncate_str;

use super::Tool;

fn injected_session_id(arguments: &Value) -> anyhow::Result<String> {
    arguments
        .get("_session_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Missing session scope on memory tool call"))
}

/// Lists the pages remembered for the current session.
pub struct SessionPagesTool {
    store: Arc<MemoryStore>,
}

impl SessionPagesTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SessionPagesTool {
    fn name(&self) -> &str {
        "get_session_pages"
    }

    fn description(&self) -> &str {
        "List the web pages visited during this conversation"
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {},
                "required": []
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let session_id = injected_session_id(arguments)?;
        let context = self.store.get_context(&session_id).await?;

        let pages = match context {
            Some(ctx) if !ctx.pages.is_empty() => ctx.pages,
            _ => return Ok("No pages have been recorded for this conversation.".to_string()),
        };

        let mut out = format!("Pages in this conversation ({}):\n", pages.len());
        for (i, page) in pages.iter().enumerate() {
            match &page.title {
                Some(title) => {
                    out.push_str(&format!("{}. {} — {}\n", i + 1, title, page.url));
                }
                None => out.push_str(&format!("{}. {}\n", i + 1, page.url)),
            }
        }
        Ok(out)
    }
}

/// Fetches one past exchange by its turn number.
pub struct TurnLookupTool {
    store: Arc<MemoryStore>,
}

impl TurnLookupTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TurnLookupTool {
    fn name(&self) -> &str {
        "get_turn"
    }

    fn description(&self) -> &str {
        "Retrieve the full text of an earlier exchange in this conversation by turn number"
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {
                    "turn_number": {
                        "type": "integer",
                        "description": "1-based turn number of the exchange to retrieve"
                    }
                },
                "required": ["turn_number"]
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let session_id = injected_session_id(arguments)?;
        let turn_number = match arguments.get("turn_number").and_then(|v| v.as_i64()) {
            Some(n) if n > 0 => n,
            _ => {
                return Ok(
                    "Please provide turn_number as a positive integer, e.g. {\"turn_number\": 2}."
                        .to_string(),
                )
            }
        };

        match self.store.turn_by_number(&session_id, turn_number).await? {
            Some(turn) => Ok(format!(
                "Turn {} ({}):\nUser: {}\nAssistant: {}",
                turn.turn_number,
                turn.timestamp.format("%Y-%m-%d %H:%M UTC"),
                turn.user_message,
                turn.assistant_response
            )),
            None => Ok(format!(
                "There is no turn {} in this conversation yet.",
                turn_number
            )),
        }
    }
}

/// Semantic search over embedded conversation history.
pub struct SemanticHistorySearchTool {
    store: Arc<MemoryStore>,
}

impl SemanticHistorySearchTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SemanticHistorySearchTool {
    fn name(&self) -> &str {
        "search_history"
    }

    fn description(&self) -> &str {
        "Search earlier messages in this conversation by meaning, not keywords"
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "What to look for"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results (default 5)"
                    }
                },
                "required": ["query"]
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let session_id = injected_session_id(arguments)?;
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return Ok("Please provide a non-empty query string.".to_string()),
        };
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(5);

        let filter = SearchFilter {
            session_id: Some(session_id.clone()),
            limit,
            threshold: 0.3,
            ..Default::default()
        };

        let matches = match self.store.semantic_search(query, &filter).await {
            Ok(m) => m,
            // No embedder or endpoint down: degrade to text, not failure.
            Err(e) => return Ok(format!("History search is unavailable right now: {}", e)),
        };

        if matches.is_empty() {
            return Ok(format!("Nothing in this conversation matched '{}'.", query));
        }

        let mut out = format!("Matches for '{}':\n", query);
        for m in &matches {
            let snippet = m
                .record
                .metadata
                .as_deref()
                .map(|s| truncate_str(s, 200))
                .unwrap_or_else(|| format!("turn {}", m.record.turn_number));
            out.push_str(&format!(
                "- [{} turn {}, score {:.2}] {}\n",
                m.record.kind, m.record.turn_number, m.similarity, snippet
            ));
        }
        Ok(out)
    }
}

/// Lists recent sessions, the active one marked.
pub struct RecentSessionsTool {
    store: Arc<MemoryStore>,
}

impl RecentSessionsTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for RecentSessionsTool {
    fn name(&self) -> &str {
        "list_recent_sessions"
    }

    fn description(&self) -> &str {
        "List recent conversations with their titles and turn counts"
    }

    fn schema(&self) -> Value {
        json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": {
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of sessions to list (default 10)"
                    }
                },
                "required": []
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(10);

        let sessions = self.store.list_recent_sessions(limit).await?;
        if sessions.is_empty() {
            return Ok("There are no saved conversations.".to_string());
        }

        let mut out = format!("Recent conversations ({}):\n", sessions.len());
        for s in &sessions {
            let marker = if s.active { " (current)" } else { "" };
            out.push_str(&format!(
                "- {}{} — {} turns, updated {}\n",
                truncate_str(&s.title, 60),
                marker,
                s.turn_number,
                s.updated_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        Ok(out)
    }
}
