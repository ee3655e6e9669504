//! HTTP client for the configured chat endpoint.
//!
//! Speaks the Ollama-style wire format: POST `{ model, messages, tools?,
//! tool_choice?, options? }`, expect `{ message: { role, content,
//! tool_calls? } }` or an `error` field. The [`ChatTransport`] trait is the
//! seam the orchestrator talks through, so tests can script responses
//! without a live server.

mod embeddings;
mod error;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::types::ChatMessage;

pub use embeddings::{derive_embedding_url, EmbeddingClient};
pub use error::{EndpointError, EndpointErrorKind};

/// Executes one chat request and parses the endpoint's reply.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat(&self, body: &Value) -> anyhow::Result<ChatMessage>;
}

pub struct ChatClient {
    client: Client,
    chat_url: String,
}

/// Validate an endpoint URL before any request is made.
/// HTTPS is always allowed; HTTP only for localhost (local LLM servers).
pub(crate) fn validate_endpoint_url(url: &str) -> Result<(), String> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| format!("Invalid endpoint URL '{}': {}", url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote endpoints ('{}'). \
                     Use HTTPS, or point at a localhost server.",
                    url
                ))
            }
        }
        _ => Err(format!(
            "Unsupported URL scheme '{}' in '{}'. Only http and https are allowed.",
            scheme, url
        )),
    }
}

/// Build the shared HTTP client. Proxy discovery is skipped in tests where
/// it can panic in constrained runtimes.
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, String> {
    let builder = Client::builder().timeout(timeout);
    let builder = if cfg!(test) { builder.no_proxy() } else { builder };
    builder
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))
}

impl ChatClient {
    pub fn new(chat_url: &str, timeout: Duration) -> Result<Self, EndpointError> {
        validate_endpoint_url(chat_url).map_err(EndpointError::config)?;
        let client = build_http_client(timeout).map_err(EndpointError::config)?;
        Ok(Self {
            client,
            chat_url: chat_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatTransport for ChatClient {
    async fn chat(&self, body: &Value) -> anyhow::Result<ChatMessage> {
        let model = body.get("model").and_then(|m| m.as_str()).unwrap_or("");
        let message_count = body
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        info!(model, url = %self.chat_url, message_count, "Calling chat endpoint");

        let resp = match self.client.post(&self.chat_url).json(body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Chat request failed: {}", e);
                return Err(EndpointError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(status = %status, "Chat endpoint error: {}", text);
            return Err(EndpointError::from_status(status.as_u16(), &text).into());
        }

        // Truncate for debug logging on a UTF-8 boundary.
        let truncated = if text.len() > 2000 {
            let mut end = 2000;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            &text
        };
        debug!("Chat endpoint response: {}", truncated);

        parse_chat_response(&text)
    }
}

/// Parse a 2xx response body. A body can still carry an `error` field (some
/// servers report model-level failures with status 200).
fn parse_chat_response(text: &str) -> anyhow::Result<ChatMessage> {
    let data: Value = serde_json::from_str(text)
        .map_err(|e| EndpointError::malformed(format!("invalid JSON: {}", e)))?;

    if let Some(err) = data.get("error") {
        let message = err
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| err.to_string());
        warn!("Chat endpoint returned error field: {}", message);
        return Err(EndpointError::from_status(400, &message).into());
    }

    let message = data
        .get("message")
        .ok_or_else(|| EndpointError::malformed("response has no 'message' field"))?;

    let parsed: ChatMessage = serde_json::from_value(message.clone())
        .map_err(|e| EndpointError::malformed(format!("unparseable message: {}", e)))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn https_accepted() {
        assert!(validate_endpoint_url("https://llm.example.com/api/chat").is_ok());
    }

    #[test]
    fn http_localhost_accepted() {
        assert!(validate_endpoint_url("http://localhost:11434/api/chat").is_ok());
        assert!(validate_endpoint_url("http://127.0.0.1:11434/api/chat").is_ok());
        assert!(validate_endpoint_url("http://[::1]:11434/api/chat").is_ok());
    }

    #[test]
    fn http_remote_rejected() {
        let err = validate_endpoint_url("http://llm.example.com/api/chat").unwrap_err();
        assert!(err.contains("HTTP is not allowed"), "got: {}", err);
    }

    #[test]
    fn ftp_rejected() {
        let err = validate_endpoint_url("ftp://example.com").unwrap_err();
        assert!(err.contains("Unsupported URL scheme"), "got: {}", err);
    }

    #[test]
    fn parse_plain_assistant_message() {
        let msg = parse_chat_response(
            r#"{"message":{"role":"assistant","content":"Hi there"}}"#,
        )
        .unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Hi there");
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn parse_tool_call_message() {
        let msg = parse_chat_response(
            r#"{"message":{"role":"assistant","content":"",
                "tool_calls":[{"function":{"name":"get_date","arguments":{}}}]}}"#,
        )
        .unwrap();
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "get_date");
    }

    #[test]
    fn error_field_raises() {
        let err = parse_chat_response(r#"{"error":"model 'x' not found"}"#).unwrap_err();
        let endpoint_err = err.downcast_ref::<EndpointError>().unwrap();
        assert!(endpoint_err.message.contains("not found"));
    }

    #[test]
    fn missing_message_is_malformed() {
        let err = parse_chat_response(r#"{"done":true}"#).unwrap_err();
        let endpoint_err = err.downcast_ref::<EndpointError>().unwrap();
        assert_eq!(endpoint_err.kind, EndpointErrorKind::Malformed);
    }
}
