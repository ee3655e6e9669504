//! Dispatch to user-registered external tool endpoints.
//!
//! An external tool lives at `{base_url}/{tool_name}` and takes the call's
//! argument object as its JSON POST body. Transport failure degrades to a
//! conversational message instead of failing the turn — the model gets to
//! see that the tool was unavailable and react.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::EndpointError;

/// Result text injected when the endpoint cannot be reached.
const ENDPOINT_UNAVAILABLE: &str = "Tool execution failed — endpoint unavailable.";

/// Declared signature of a user-registered external tool.
#[derive(Debug, Clone)]
pub struct ExternalToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-schema-like parameter declaration used for validation and the
    /// request catalogue.
    pub parameters: Value,
}

pub struct ExternalToolClient {
    client: reqwest::Client,
    base_url: String,
    specs: Vec<ExternalToolSpec>,
}

impl ExternalToolClient {
    pub fn new(
        base_url: &str,
        specs: Vec<ExternalToolSpec>,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        crate::client::validate_endpoint_url(base_url).map_err(EndpointError::config)?;
        let client = crate::client::build_http_client(timeout).map_err(EndpointError::config)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            specs,
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&ExternalToolSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Catalogue entries in the same shape as internal tool definitions.
    pub fn definitions(&self) -> Vec<Value> {
        self.specs
            .iter()
            .map(|s| {
                json!({
                    "type": "function",
                    "function": {
                        "name": s.name,
                        "description": s.description,
                        "parameters": s.parameters,
                    }
                })
            })
            .collect()
    }

    /// POST the argument object to the tool endpoint. Always returns text:
    /// transport and server failures are folded into the result so the
    /// conversation can continue.
    pub async fn call(&self, name: &str, arguments: &Value) -> String {
        let url = format!("{}/{}", self.base_url, name);
        let body = if arguments.is_object() {
            arguments.clone()
        } else {
            json!({})
        };

        debug!(tool = name, url = %url, "Calling external tool");

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(tool = name, "External tool unreachable: {}", e);
                return ENDPOINT_UNAVAILABLE.to_string();
            }
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(tool = name, "External tool body read failed: {}", e);
                return ENDPOINT_UNAVAILABLE.to_string();
            }
        };

        if !status.is_success() {
            warn!(tool = name, status = %status, "External tool returned an error");
            return format!("Tool '{}' failed with status {}: {}", name, status, text);
        }

        // Error-shaped 200 bodies: { "status": "error", "message": ... }
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            if parsed.get("status").and_then(|s| s.as_str()) == Some("error") {
                let message = parsed
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error");
                return format!("Tool '{}' reported an error: {}", name, message);
            }
        }

        text
    }
}
