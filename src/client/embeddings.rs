//! Client for the embedding endpoint (`POST { model, input: [text] }` →
//! `{ embeddings: number[][] }`).
//!
//! Each failure mode gets its own error so callers can tell a config gap
//! from a transport failure from a malformed vector. Callers on the
//! turn-storage path treat all of them as non-fatal; semantic search
//! propagates them.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error};

use super::{build_http_client, validate_endpoint_url, EndpointError};

#[derive(Debug)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

/// Derive the embedding URL from the chat URL when none is configured:
/// the last path segment `chat` becomes `embed`
/// (`.../api/chat` → `.../api/embed`).
pub fn derive_embedding_url(chat_url: &str) -> Option<String> {
    let trimmed = chat_url.trim_end_matches('/');
    trimmed
        .strip_suffix("/chat")
        .map(|base| format!("{}/embed", base))
}

impl EmbeddingClient {
    /// `url` falls back to a derivation from `chat_url`; if neither yields
    /// an endpoint, or `model` is empty, this is a config error.
    pub fn new(
        url: Option<&str>,
        chat_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        let url = match url {
            Some(u) if !u.trim().is_empty() => u.to_string(),
            _ => derive_embedding_url(chat_url).ok_or_else(|| {
                EndpointError::config(
                    "No embedding endpoint configured and none derivable from the chat URL",
                )
            })?,
        };
        if model.trim().is_empty() {
            return Err(EndpointError::config("No embedding model configured"));
        }
        validate_endpoint_url(&url).map_err(EndpointError::config)?;
        let client = build_http_client(timeout).map_err(EndpointError::config)?;
        Ok(Self {
            client,
            url,
            model: model.to_string(),
        })
    }

    /// Embed one or more texts. Returns one vector per input, in order.
    pub async fn embed(&self, input: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model,
            "input": input,
        });

        debug!(url = %self.url, model = %self.model, inputs = input.len(), "Embedding request");

        let resp = match self.client.post(&self.url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Embedding request failed: {}", e);
                return Err(EndpointError::network(&e).into());
            }
        };

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            error!(status = %status, "Embedding endpoint error: {}", text);
            return Err(EndpointError::from_status(status.as_u16(), &text).into());
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| EndpointError::malformed(format!("embedding response: {}", e)))?;

        parse_embeddings(&data, input.len()).map_err(Into::into)
    }

    /// Embed a single text, unwrapping the first vector.
    pub async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }
}

fn parse_embeddings(data: &Value, expected: usize) -> Result<Vec<Vec<f32>>, EndpointError> {
    let rows = data
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EndpointError::malformed("embedding response has no 'embeddings' array"))?;

    if rows.len() != expected {
        return Err(EndpointError::malformed(format!(
            "expected {} embedding vectors, got {}",
            expected,
            rows.len()
        )));
    }

    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let values = row
            .as_array()
            .ok_or_else(|| EndpointError::malformed(format!("embedding {} is not an array", i)))?;
        if values.is_empty() {
            return Err(EndpointError::malformed(format!("embedding {} is empty", i)));
        }
        let mut vec = Vec::with_capacity(values.len());
        for v in values {
            let f = v.as_f64().ok_or_else(|| {
                EndpointError::malformed(format!("embedding {} contains a non-numeric value", i))
            })?;
            vec.push(f as f32);
        }
        out.push(vec);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_embed_from_chat_url() {
        assert_eq!(
            derive_embedding_url("http://localhost:11434/api/chat").as_deref(),
            Some("http://localhost:11434/api/embed")
        );
        assert_eq!(
            derive_embedding_url("http://localhost:11434/api/chat/").as_deref(),
            Some("http://localhost:11434/api/embed")
        );
        assert_eq!(derive_embedding_url("http://localhost:9999/v1/respond"), None);
    }

    #[test]
    fn missing_model_is_config_error() {
        let err = EmbeddingClient::new(
            None,
            "http://localhost:11434/api/chat",
            "",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(err.message.contains("model"), "got: {}", err.message);
    }

    #[test]
    fn missing_url_is_config_error() {
        let err = EmbeddingClient::new(
            None,
            "http://localhost:9999/v1/respond",
            "nomic-embed-text",
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(err.message.contains("embedding endpoint"), "got: {}", err.message);
    }

    #[test]
    fn parse_valid_embeddings() {
        let data = serde_json::json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]]});
        let out = parse_embeddings(&data, 2).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), 2);
    }

    #[test]
    fn parse_rejects_empty_vector() {
        let data = serde_json::json!({"embeddings": [[]]});
        assert!(parse_embeddings(&data, 1).is_err());
    }

    #[test]
    fn parse_rejects_non_numeric() {
        let data = serde_json::json!({"embeddings": [["a"]]});
        assert!(parse_embeddings(&data, 1).is_err());
    }

    #[test]
    fn parse_rejects_count_mismatch() {
        let data = serde_json::json!({"embeddings": [[0.1]]});
        assert!(parse_embeddings(&data, 2).is_err());
    }
}
