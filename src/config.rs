//! Crate configuration, loaded from TOML.
//!
//! Every section is optional and falls back to defaults suitable for a
//! stock local Ollama install; only a missing model is a hard error,
//! surfaced before any request is attempted.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub generation: GenerationOptions,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    /// Chat endpoint URL (Ollama-style `/api/chat`).
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    /// Model name for chat requests.
    #[serde(default)]
    pub model: String,
    /// Embedding endpoint URL. When unset it is derived from `chat_url`.
    #[serde(default)]
    pub embedding_url: Option<String>,
    /// Model name for embedding requests.
    #[serde(default)]
    pub embedding_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            chat_url: default_chat_url(),
            model: String::new(),
            embedding_url: None,
            embedding_model: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_chat_url() -> String {
    "http://localhost:11434/api/chat".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Estimated-token budget for an assembled request.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// Cap on the `[HISTORY]` summary block appended for turns beyond 3.
    #[serde(default = "default_history_summary_tokens")]
    pub history_summary_tokens: usize,
    /// Attachments are included verbatim for this many initial turns,
    /// then collapse to one summary line each.
    #[serde(default = "default_verbatim_attachment_turns")]
    pub verbatim_attachment_turns: u32,
    /// Maximum pages remembered per session (FIFO eviction).
    #[serde(default = "default_page_cap")]
    pub page_cap: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            history_summary_tokens: default_history_summary_tokens(),
            verbatim_attachment_turns: default_verbatim_attachment_turns(),
            page_cap: default_page_cap(),
        }
    }
}

fn default_token_budget() -> usize {
    3200
}

fn default_history_summary_tokens() -> usize {
    300
}

fn default_verbatim_attachment_turns() -> u32 {
    2
}

fn default_page_cap() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    /// Base URL for user-registered external tools. Calls go to
    /// `{external_base_url}/{tool_name}`. Unset disables external routing.
    #[serde(default)]
    pub external_base_url: Option<String>,
    /// Upper bound on tool rounds per turn, so a model that keeps
    /// requesting tools cannot loop forever.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Tool results longer than this are truncated with an annotation
    /// before being folded into the conversation.
    #[serde(default = "default_tool_result_max_chars")]
    pub tool_result_max_chars: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            external_base_url: None,
            max_tool_rounds: default_max_tool_rounds(),
            tool_result_max_chars: default_tool_result_max_chars(),
        }
    }
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_tool_result_max_chars() -> usize {
    8000
}

/// Sampling options forwarded to the endpoint verbatim under `options`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GenerationOptions {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub num_ctx: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
}

impl GenerationOptions {
    /// Build the `options` object for the outbound request. Returns `None`
    /// when nothing is set, so the field is omitted entirely.
    pub fn to_wire(&self) -> Option<Value> {
        let mut map = serde_json::Map::new();
        if let Some(t) = self.temperature {
            map.insert("temperature".into(), json!(t));
        }
        if let Some(p) = self.top_p {
            map.insert("top_p".into(), json!(p));
        }
        if let Some(n) = self.num_ctx {
            map.insert("num_ctx".into(), json!(n));
        }
        if let Some(s) = self.seed {
            map.insert("seed".into(), json!(s));
        }
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "pagepilot.db".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Check the pieces every chat turn needs. Called once at startup so a
    /// missing model fails fast instead of on the first request.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.chat_url.trim().is_empty() {
            anyhow::bail!("endpoint.chat_url is not set");
        }
        if self.endpoint.model.trim().is_empty() {
            anyhow::bail!("endpoint.model is not set");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_ollama() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.endpoint.chat_url, "http://localhost:11434/api/chat");
        assert_eq!(config.context.token_budget, 3200);
        assert_eq!(config.context.page_cap, 10);
        assert_eq!(config.tools.max_tool_rounds, 5);
    }

    #[test]
    fn validate_requires_model() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_err());

        let config: AppConfig = toml::from_str("[endpoint]\nmodel = \"llama3.2\"").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn generation_options_omitted_when_empty() {
        let opts = GenerationOptions::default();
        assert!(opts.to_wire().is_none());

        let opts: GenerationOptions =
            toml::from_str("temperature = 0.2\nnum_ctx = 8192").unwrap();
        let wire = opts.to_wire().unwrap();
        assert_eq!(wire["temperature"], 0.2);
        assert_eq!(wire["num_ctx"], 8192);
        assert!(wire.get("top_p").is_none());
    }

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [endpoint]
            chat_url = "http://localhost:11434/api/chat"
            model = "qwen2.5"
            embedding_model = "nomic-embed-text"

            [tools]
            external_base_url = "http://localhost:8000/tools"

            [context]
            token_budget = 4096
        "#;
        let config: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.endpoint.model, "qwen2.5");
        assert_eq!(config.context.token_budget, 4096);
        assert_eq!(
            config.tools.external_base_url.as_deref(),
            Some("http://localhost:8000/tools")
        );
    }
}
