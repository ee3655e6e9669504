//! Boundary and wire types shared between the UI shell, the orchestrator,
//! and the chat endpoint.
//!
//! Everything crossing the UI boundary is a tagged serde enum rather than a
//! stringly-typed `action` field, so malformed requests fail at
//! deserialization instead of deep inside a handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a wire-format chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the request/response exchange with the LLM endpoint.
///
/// Constructed fresh per request from the session, context snapshot, and
/// turn history; never persisted in this shape except inside the session's
/// message snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64-encoded images attached to a user message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Name of the tool that produced a `role: tool` message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: None,
            tool_calls: None,
            tool_name: None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunction {
    pub name: String,
    /// Arguments object as sent by the endpoint. Ollama-style servers send
    /// a JSON object; a missing value is treated as `{}`.
    #[serde(default)]
    pub arguments: Value,
}

/// Kind of user-supplied attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Snippet,
    Image,
}

/// Content the user attached to the pending turn: a dropped file/selection
/// snippet, a picked page element, or an expanded placeholder command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    /// Placeholder command this attachment came from (e.g. "page", "now"),
    /// if it was produced by `@{{...}}` expansion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    pub kind: AttachmentKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// A user-submitted turn, as handed over by the UI shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_input: String,
    /// Browser tab the request originated from; scopes cancellation and
    /// page context.
    pub tab_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
    #[serde(default)]
    pub tools_enabled: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Freshly captured page text, if the shell extracted it for this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_content: Option<String>,
}

/// Requests the UI shell can make of the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiRequest {
    SubmitTurn(TurnRequest),
    Abort { tab_id: i64 },
}

/// Events the core emits back to the UI shell. This is the only channel the
/// shell observes progress on; there is no return value describing output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// A tool round started executing.
    ToolExecuting { name: String },
    /// Final content-bearing response for the turn.
    FinalResponse { session_id: String, content: String },
    /// The turn failed; `message` is safe to show in an error banner.
    Error { message: String },
    /// The user cancelled the turn. Not an error.
    Aborted,
}

/// Request sent over the content-script bridge to extract structure from
/// the active tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

/// Bridge reply: exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Phase of the per-turn state machine, logged as the orchestrator advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    BuildingContext,
    AwaitingResponse,
    ToolRequested,
    ExecutingTool,
    Done,
    Aborted,
    Errored,
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::BuildingContext => "building_context",
            TurnPhase::AwaitingResponse => "awaiting_response",
            TurnPhase::ToolRequested => "tool_requested",
            TurnPhase::ExecutingTool => "executing_tool",
            TurnPhase::Done => "done",
            TurnPhase::Aborted => "aborted",
            TurnPhase::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// How a completed turn ended. Errors surface as `Err` from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Done { session_id: String },
    Aborted,
}
