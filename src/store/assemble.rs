//! Token-budgeted context assembly.
//!
//! Priority order under the budget: system instructions, page content (full
//! or cached summary), attachments (verbatim early, summarized later), a
//! capped history-summary block, then as many recent raw turns as fit.
//! The new user message goes last, unconditionally — only the recent-turn
//! window flexes under budget pressure.

use chrono::Utc;
use tracing::debug;

use crate::config::ContextConfig;
use crate::types::{Attachment, AttachmentKind, ChatMessage};
use crate::utils::truncate_str;

use super::{estimate_tokens, MemoryStore, Turn};

/// Placeholder the user types to pull the full page into the turn.
pub const PAGE_PLACEHOLDER: &str = "@{{page}}";

/// Inputs for one assembly pass.
pub struct ContextParams<'a> {
    pub session_id: &'a str,
    pub new_message: &'a str,
    pub turn_number: i64,
    pub system_instructions: Option<&'a str>,
    /// Fresh page text for this turn, if the shell captured one.
    pub page_content: Option<&'a str>,
    pub page_hash: Option<&'a str>,
    pub attachments: &'a [Attachment],
    pub config: &'a ContextConfig,
}

impl MemoryStore {
    /// Build the ordered wire-format message list for a new request.
    pub async fn build_optimised_context(
        &self,
        params: &ContextParams<'_>,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        let budget = params.config.token_budget;
        let mut used = 0usize;
        let mut messages: Vec<ChatMessage> = Vec::new();

        // (a) System instructions always survive.
        if let Some(instructions) = params.system_instructions {
            if !instructions.trim().is_empty() {
                used += estimate_tokens(instructions);
                messages.push(ChatMessage::system(instructions));
            }
        }

        let snapshot = self.get_context(params.session_id).await?;

        // (b) Page content: full on turn 1 or on explicit reference (or
        // when no summary has been cached yet); summary otherwise.
        let fresh_page = params.page_content;
        let stored_page = snapshot.as_ref().and_then(|s| s.page_content.as_deref());
        let page_text = fresh_page.or(stored_page);
        let summary = snapshot.as_ref().and_then(|s| s.page_summary.as_deref());
        let hash_changed = match (params.page_hash, snapshot.as_ref().and_then(|s| s.page_hash.as_deref())) {
            (Some(new), Some(old)) => new != old,
            _ => false,
        };

        if let Some(page) = page_text {
            let wants_full = params.turn_number <= 1
                || params.new_message.contains(PAGE_PLACEHOLDER)
                || hash_changed
                || summary.is_none();
            let content = if wants_full {
                format!("[PAGE CONTENT]\n{}", page)
            } else {
                // summary.is_none() is covered by wants_full above.
                format!("[PAGE SUMMARY]\n{}", summary.unwrap_or_default())
            };
            used += estimate_tokens(&content);
            messages.push(ChatMessage::system(content));
        }

        // (c) Attachments: verbatim for the first turns, then one summary
        // line each. Images ride on the user message instead.
        let stored_summaries = snapshot
            .as_ref()
            .map(|s| s.attachment_summaries.clone())
            .unwrap_or_default();
        for (i, attachment) in params.attachments.iter().enumerate() {
            if attachment.kind == AttachmentKind::Image {
                continue;
            }
            let label = attachment.filename.as_deref().unwrap_or("snippet");
            let content = if params.turn_number <= params.config.verbatim_attachment_turns as i64 {
                format!("[ATTACHMENT {}]\n{}", label, attachment.content)
            } else {
                let line = stored_summaries
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| truncate_str(&attachment.content, 120));
                format!("[ATTACHMENT {} (summary)] {}", label, line)
            };
            used += estimate_tokens(&content);
            messages.push(ChatMessage::system(content));
        }

        let turns = self.turns_for_session(params.session_id).await?;

        // (d) Distant history collapses into a capped summary block.
        if params.turn_number > 3 && !turns.is_empty() {
            let joined = turns
                .iter()
                .map(|t| t.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let capped = truncate_str(&joined, params.config.history_summary_tokens * 4);
            let content = format!("[HISTORY]\n{}", capped);
            used += estimate_tokens(&content);
            messages.push(ChatMessage::system(content));
        }

        // (e) Recent raw turns, newest first, while they fit. Stop at the
        // first turn that would blow the budget — older ones cannot help.
        let mut window: Vec<&Turn> = Vec::new();
        for turn in turns.iter().rev() {
            let cost =
                estimate_tokens(&turn.user_message) + estimate_tokens(&turn.assistant_response);
            if used + cost > budget {
                break;
            }
            used += cost;
            window.push(turn);
        }
        for turn in window.into_iter().rev() {
            messages.push(ChatMessage::user(&turn.user_message));
            messages.push(ChatMessage::assistant(&turn.assistant_response));
        }

        // (f) The new user message, unconditionally, carrying any images.
        let images: Vec<String> = params
            .attachments
            .iter()
            .filter(|a| a.kind == AttachmentKind::Image)
            .map(|a| a.content.clone())
            .collect();
        let mut user = ChatMessage::user(params.new_message);
        if !images.is_empty() {
            user.images = Some(images);
        }
        messages.push(user);

        debug!(
            session_id = params.session_id,
            turn_number = params.turn_number,
            estimated_tokens = used,
            budget,
            message_count = messages.len(),
            "Assembled context"
        );
        Ok(messages)
    }
}

/// Expand time/url placeholder commands in user input. `@{{page}}` is left
/// for the assembly step, which keys full-page inclusion off it.
pub fn expand_placeholders(input: &str, url: Option<&str>) -> String {
    let now = Utc::now();
    let mut out = input.replace("@{{now}}", &now.to_rfc3339());
    out = out.replace("@{{today}}", &now.format("%Y-%m-%d").to_string());
    if let Some(u) = url {
        out = out.replace("@{{url}}", u);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::{content_hash, MemoryStore};
    use super::*;
    use crate::types::Role;

    fn params<'a>(
        session_id: &'a str,
        new_message: &'a str,
        turn_number: i64,
        config: &'a ContextConfig,
    ) -> ContextParams<'a> {
        ContextParams {
            session_id,
            new_message,
            turn_number,
            system_instructions: Some("You are a helpful page assistant."),
            page_content: None,
            page_hash: None,
            attachments: &[],
            config,
        }
    }

    fn estimated_total(messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| estimate_tokens(&m.content)).sum()
    }

    #[tokio::test]
    async fn first_turn_includes_full_page() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let config = ContextConfig::default();

        let mut p = params(&session.id, "What is this page?", 1, &config);
        p.page_content = Some("Long page body here");
        p.page_hash = Some("abc");

        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.role == Role::System && m.content.starts_with("[PAGE CONTENT]")));
        assert_eq!(messages.last().unwrap().content, "What is this page?");
    }

    #[tokio::test]
    async fn later_turns_use_cached_summary() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let hash = content_hash("page body");
        store
            .upsert_context(&session.id, 1, Some("page body"), Some(&hash), None)
            .await
            .unwrap();
        store
            .set_page_summary(&session.id, "One paragraph about the page.")
            .await
            .unwrap();

        let config = ContextConfig::default();
        let mut p = params(&session.id, "Tell me more", 4, &config);
        p.page_hash = Some(hash.as_str());

        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content.starts_with("[PAGE SUMMARY]")));
        assert!(!messages.iter().any(|m| m.content.starts_with("[PAGE CONTENT]")));
    }

    #[tokio::test]
    async fn page_placeholder_forces_full_page() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let hash = content_hash("page body");
        store
            .upsert_context(&session.id, 1, Some("page body"), Some(&hash), None)
            .await
            .unwrap();
        store.set_page_summary(&session.id, "summary").await.unwrap();

        let config = ContextConfig::default();
        let mut p = params(&session.id, "Quote @{{page}} verbatim", 5, &config);
        p.page_hash = Some(hash.as_str());

        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content.starts_with("[PAGE CONTENT]")));
    }

    #[tokio::test]
    async fn history_block_appears_after_turn_three() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        for i in 1..=4 {
            store
                .store_turn(&session.id, i, &format!("q{}", i), &format!("a{}", i))
                .await
                .unwrap();
        }

        let config = ContextConfig::default();
        let p = params(&session.id, "next", 5, &config);
        let messages = store.build_optimised_context(&p).await.unwrap();
        let history = messages
            .iter()
            .find(|m| m.content.starts_with("[HISTORY]"))
            .expect("history block present");
        assert!(history.content.contains("Q: q1"));

        // Turn 2 has no history block.
        let p = params(&session.id, "next", 2, &config);
        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(!messages.iter().any(|m| m.content.starts_with("[HISTORY]")));
    }

    #[tokio::test]
    async fn budget_bounds_the_recent_turn_window() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();

        // Each turn ~200 estimated tokens; a 500-token budget fits few.
        let filler = "x".repeat(400);
        for i in 1..=8 {
            store
                .store_turn(&session.id, i, &filler, &filler)
                .await
                .unwrap();
        }

        let config = ContextConfig {
            token_budget: 500,
            ..Default::default()
        };
        let p = ContextParams {
            system_instructions: None,
            ..params(&session.id, "short question", 9, &config)
        };
        let messages = store.build_optimised_context(&p).await.unwrap();

        // Everything except the unconditional new message fits the budget.
        let without_new = &messages[..messages.len() - 1];
        assert!(
            estimated_total(without_new) <= config.token_budget,
            "estimated {} > budget {}",
            estimated_total(without_new),
            config.token_budget
        );

        // More stored turns never widen the window beyond the budget.
        for i in 9..=20 {
            store
                .store_turn(&session.id, i, &filler, &filler)
                .await
                .unwrap();
        }
        let p2 = ContextParams {
            system_instructions: None,
            ..params(&session.id, "short question", 21, &config)
        };
        let more = store.build_optimised_context(&p2).await.unwrap();
        let without_new = &more[..more.len() - 1];
        assert!(estimated_total(without_new) <= config.token_budget);
    }

    #[tokio::test]
    async fn recent_turns_stay_in_chronological_order() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        store.store_turn(&session.id, 1, "first", "one").await.unwrap();
        store.store_turn(&session.id, 2, "second", "two").await.unwrap();

        let config = ContextConfig::default();
        let p = ContextParams {
            system_instructions: None,
            ..params(&session.id, "third", 3, &config)
        };
        let messages = store.build_optimised_context(&p).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "one", "second", "two", "third"]);
    }

    #[tokio::test]
    async fn attachments_verbatim_then_summarized() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let config = ContextConfig::default();
        let attachments = vec![Attachment {
            id: "a1".to_string(),
            cmd: None,
            kind: AttachmentKind::Snippet,
            content: "fn main() {}".to_string(),
            source_url: None,
            page_hash: None,
            filename: Some("main.rs".to_string()),
        }];

        let mut p = params(&session.id, "explain", 2, &config);
        p.attachments = &attachments;
        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content.contains("[ATTACHMENT main.rs]") && m.content.contains("fn main")));

        let mut p = params(&session.id, "explain", 3, &config);
        p.attachments = &attachments;
        let messages = store.build_optimised_context(&p).await.unwrap();
        assert!(messages
            .iter()
            .any(|m| m.content.contains("[ATTACHMENT main.rs (summary)]")));
    }

    #[tokio::test]
    async fn image_attachments_ride_on_the_user_message() {
        let store = MemoryStore::open_in_memory(None, 10).await.unwrap();
        let session = store.create_session("hi").await.unwrap();
        let config = ContextConfig::default();
        let attachments = vec![Attachment {
            id: "img".to_string(),
            cmd: None,
            kind: AttachmentKind::Image,
            content: "aGVsbG8=".to_string(),
            source_url: None,
            page_hash: None,
            filename: None,
        }];

        let mut p = params(&session.id, "what is in this image?", 1, &config);
        p.attachments = &attachments;
        let messages = store.build_optimised_context(&p).await.unwrap();
        let last = messages.last().unwrap();
        assert_eq!(last.images.as_ref().unwrap().len(), 1);
        // Not duplicated as a system attachment.
        assert!(!messages.iter().any(|m| m.content.contains("[ATTACHMENT")));
    }

    #[test]
    fn placeholder_expansion() {
        let out = expand_placeholders(
            "On @{{today}} I was reading @{{url}}",
            Some("https://example.com"),
        );
        assert!(out.contains("https://example.com"));
        assert!(!out.contains("@{{today}}"));
        // Page placeholder is intentionally untouched.
        let out = expand_placeholders("summarize @{{page}}", None);
        assert!(out.contains("@{{page}}"));
    }
}
