//! Per-turn request/response orchestration.
//!
//! Each submitted turn walks a fixed state machine: build the budgeted
//! context, call the chat endpoint, execute any requested tools (bounded
//! rounds), and finish with exactly one terminal outcome. Abort is a
//! first-class outcome, not an error; an empty final response is an error.
//! Progress reaches the UI shell only through the event channel.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ChatTransport, EndpointError};
use crate::config::AppConfig;
use crate::store::{content_hash, expand_placeholders, ContextParams, MemoryStore};
use crate::tools::ToolRouter;
use crate::types::{
    ChatMessage, ToolCall, ToolFunction, TurnOutcome, TurnPhase, TurnRequest, UiEvent,
};
use crate::utils::{truncate_str, truncate_with_note};

/// Page text sent to the summarization request is capped to keep that
/// side-call cheap.
const SUMMARY_INPUT_MAX_CHARS: usize = 8000;
/// Fallback summary length when the endpoint cannot summarize.
const EXTRACTIVE_SUMMARY_CHARS: usize = 600;

pub struct Orchestrator {
    store: Arc<MemoryStore>,
    transport: Arc<dyn ChatTransport>,
    router: ToolRouter,
    config: AppConfig,
    /// Wire-format `options` object, prebuilt from the generation config.
    options: Option<Value>,
    /// One cancellation token per tab, last writer wins: a new turn on the
    /// same tab replaces (and thereby orphans) the previous token.
    cancel_tokens: RwLock<HashMap<i64, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<MemoryStore>,
        transport: Arc<dyn ChatTransport>,
        router: ToolRouter,
        config: AppConfig,
    ) -> Self {
        let options = config.generation.to_wire();
        Self {
            store,
            transport,
            router,
            config,
            options,
            cancel_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Cancel the in-flight turn for `tab_id`, if any. Idempotent.
    pub async fn abort(&self, tab_id: i64) {
        if let Some(token) = self.cancel_tokens.read().await.get(&tab_id) {
            info!(tab_id, "Abort requested");
            token.cancel();
        }
    }

    /// Run one full turn. Progress is reported on `events`; the return
    /// value only distinguishes completion from abort, with errors as `Err`.
    pub async fn submit_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<UiEvent>,
    ) -> anyhow::Result<TurnOutcome> {
        let cancel = CancellationToken::new();
        self.cancel_tokens
            .write()
            .await
            .insert(request.tab_id, cancel.clone());

        let result = self.run_turn(&request, &events, &cancel).await;
        self.cancel_tokens.write().await.remove(&request.tab_id);

        match &result {
            Ok(TurnOutcome::Done { .. }) => {}
            Ok(TurnOutcome::Aborted) => {
                debug!(tab_id = request.tab_id, phase = %TurnPhase::Aborted, "Turn aborted");
                let _ = events.send(UiEvent::Aborted).await;
            }
            Err(e) => {
                warn!(tab_id = request.tab_id, phase = %TurnPhase::Errored, "Turn failed: {}", e);
                let _ = events
                    .send(UiEvent::Error {
                        message: user_facing_message(e),
                    })
                    .await;
            }
        }
        result
    }

    async fn run_turn(
        &self,
        request: &TurnRequest,
        events: &mpsc::Sender<UiEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        debug!(tab_id = request.tab_id, phase = %TurnPhase::BuildingContext, "Turn started");

        let session = match self.store.active_session().await? {
            Some(s) => s,
            None => self.store.create_session(&request.user_input).await?,
        };
        // Provisional: the session counter only advances once the turn
        // completes, so an abort or error leaves no gap in turn numbers.
        let turn_number = session.turn_number + 1;
        let user_input = expand_placeholders(&request.user_input, request.url.as_deref());

        let page_hash = request.page_content.as_deref().map(content_hash);
        self.store
            .upsert_context(
                &session.id,
                request.tab_id,
                request.page_content.as_deref(),
                page_hash.as_deref(),
                (!request.attachments.is_empty()).then_some(request.attachments.as_slice()),
            )
            .await?;
        if let (Some(url), Some(hash)) = (request.url.as_deref(), page_hash.as_deref()) {
            self.store
                .add_page_to_session(&session.id, request.tab_id, url, None, hash)
                .await?;
        }

        let mut messages = self
            .store
            .build_optimised_context(&ContextParams {
                session_id: &session.id,
                new_message: &user_input,
                turn_number,
                system_instructions: request.system_instructions.as_deref(),
                page_content: request.page_content.as_deref(),
                page_hash: page_hash.as_deref(),
                attachments: &request.attachments,
                config: &self.config.context,
            })
            .await?;

        let mut include_tools = request.tools_enabled && !self.router.definitions().is_empty();
        let mut tools_fallback_used = false;
        let mut rounds: u32 = 0;

        let final_content = loop {
            debug!(
                session_id = %session.id,
                turn_number,
                rounds,
                phase = %TurnPhase::AwaitingResponse,
                "Calling endpoint"
            );
            let body = self.build_body(&messages, include_tools);

            let response = tokio::select! {
                _ = cancel.cancelled() => return Ok(TurnOutcome::Aborted),
                r = self.transport.chat(&body) => r,
            };

            let reply = match response {
                Ok(reply) => reply,
                Err(e) => {
                    // Some endpoints reject any request carrying tools.
                    // Strip them, note it for the model, and retry once.
                    let unsupported = e
                        .downcast_ref::<EndpointError>()
                        .is_some_and(|ee| ee.is_tools_unsupported());
                    if include_tools && unsupported && !tools_fallback_used {
                        warn!(session_id = %session.id, "Endpoint rejects tools; retrying without");
                        tools_fallback_used = true;
                        include_tools = false;
                        messages.push(ChatMessage::system(
                            "Note: tools are unavailable for this request. \
                             Answer directly from the conversation.",
                        ));
                        continue;
                    }
                    return Err(e);
                }
            };

            let tool_calls = reply.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() || !include_tools {
                if reply.content.trim().is_empty() {
                    anyhow::bail!("The model returned an empty response");
                }
                break reply.content;
            }

            debug!(
                session_id = %session.id,
                requested = tool_calls.len(),
                phase = %TurnPhase::ToolRequested,
                "Model requested tools"
            );

            if rounds >= self.config.tools.max_tool_rounds {
                info!(session_id = %session.id, rounds, "Tool round cap reached");
                messages.push(reply);
                messages.push(ChatMessage::system(
                    "No further tool calls are available. \
                     Answer the user with the information gathered so far.",
                ));
                include_tools = false;
                continue;
            }
            rounds += 1;

            messages.push(reply);
            for call in &tool_calls {
                debug!(tool = %call.function.name, phase = %TurnPhase::ExecutingTool, "Executing tool");
                let _ = events
                    .send(UiEvent::ToolExecuting {
                        name: call.function.name.clone(),
                    })
                    .await;

                let scoped = scope_tool_call(call, &session.id, request.tab_id);
                let result = tokio::select! {
                    _ = cancel.cancelled() => return Ok(TurnOutcome::Aborted),
                    r = self.router.resolve(&scoped) => r,
                };
                // Tool failures fold into the conversation so the model can
                // correct itself or answer without the tool.
                let text = match result {
                    Ok(text) => text,
                    Err(e) => format!("Error: {}", e),
                };
                let compressed =
                    truncate_with_note(&text, self.config.tools.tool_result_max_chars);
                messages.push(ChatMessage::tool(&call.function.name, compressed));
            }
        };

        // Persist before reporting: a turn the user saw but the store lost
        // would corrupt every later context assembly.
        let turn_number = self.store.next_turn_number(&session.id).await?;
        self.store
            .store_turn_with_embeddings(
                &session.id,
                request.tab_id,
                turn_number,
                &user_input,
                &final_content,
            )
            .await?;
        self.store
            .append_session_messages(
                &session.id,
                &[
                    ChatMessage::user(&user_input),
                    ChatMessage::assistant(&final_content),
                ],
            )
            .await?;
        // Attachments were folded into this turn's context; drop them so
        // they do not linger in the snapshot.
        self.store.clear_pending_attachments(&session.id).await?;

        info!(session_id = %session.id, turn_number, rounds, phase = %TurnPhase::Done, "Turn complete");
        let _ = events
            .send(UiEvent::FinalResponse {
                session_id: session.id.clone(),
                content: final_content,
            })
            .await;

        self.cache_page_summary(&session.id).await;

        Ok(TurnOutcome::Done {
            session_id: session.id,
        })
    }

    /// Cache a one-paragraph page summary so later turns send it instead of
    /// the full page text. Best-effort: a failed summarization falls back to
    /// plain truncation, and a failed write is only logged.
    async fn cache_page_summary(&self, session_id: &str) {
        let snapshot = match self.store.get_context(session_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                warn!(session_id, "Context lookup for summarization failed: {}", e);
                return;
            }
        };
        if snapshot.page_summary.is_some() {
            return;
        }
        let Some(page) = snapshot.page_content else {
            return;
        };
        if page.trim().is_empty() {
            return;
        }

        let summary = match self.summarize_page(&page).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => truncate_str(page.trim(), EXTRACTIVE_SUMMARY_CHARS),
            Err(e) => {
                warn!(session_id, "Page summarization failed; using truncation: {}", e);
                truncate_str(page.trim(), EXTRACTIVE_SUMMARY_CHARS)
            }
        };
        if let Err(e) = self.store.set_page_summary(session_id, &summary).await {
            warn!(session_id, "Failed to cache page summary: {}", e);
        }
    }

    async fn summarize_page(&self, page: &str) -> anyhow::Result<String> {
        let body = json!({
            "model": self.config.endpoint.model,
            "messages": [
                ChatMessage::system(
                    "Summarize the following web page content in one short \
                     paragraph. Reply with the summary only.",
                ),
                ChatMessage::user(truncate_str(page, SUMMARY_INPUT_MAX_CHARS)),
            ],
            "stream": false,
        });
        let reply = self.transport.chat(&body).await?;
        Ok(reply.content.trim().to_string())
    }

    fn build_body(&self, messages: &[ChatMessage], include_tools: bool) -> Value {
        let mut body = json!({
            "model": self.config.endpoint.model,
            "messages": messages,
            "stream": false,
        });
        if include_tools {
            body["tools"] = Value::Array(self.router.definitions());
            body["tool_choice"] = json!("auto");
        }
        if let Some(ref options) = self.options {
            body["options"] = options.clone();
        }
        body
    }
}

/// Inject the session scope the memory tools need. The model never sees or
/// supplies these fields.
fn scope_tool_call(call: &ToolCall, session_id: &str, tab_id: i64) -> ToolCall {
    let mut args = match &call.function.arguments {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    args.insert("_session_id".to_string(), json!(session_id));
    args.insert("_tab_id".to_string(), json!(tab_id));
    ToolCall {
        function: ToolFunction {
            name: call.function.name.clone(),
            arguments: Value::Object(args),
        },
    }
}

fn user_facing_message(e: &anyhow::Error) -> String {
    match e.downcast_ref::<EndpointError>() {
        Some(endpoint_err) => endpoint_err.user_message(),
        None => e.to_string(),
    }
}
