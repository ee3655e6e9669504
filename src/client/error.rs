use std::fmt;

/// Classified endpoint error — tells the caller *why* the request failed so
/// it can pick the right recovery strategy (surface, retry without tools,
/// or treat as cancellation).
#[derive(Debug)]
pub struct EndpointError {
    pub kind: EndpointErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    /// Missing or invalid configuration (URL, model). Nothing was sent.
    Config,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// The endpoint took too long.
    Timeout,
    /// 400 — the endpoint rejected the request body.
    BadRequest,
    /// 404 or "model not found".
    NotFound,
    /// 500/502/503/504 — server-side failure.
    ServerError,
    /// Response body did not match the expected shape (missing message,
    /// empty embedding vector, malformed JSON).
    Malformed,
    /// Anything else.
    Unknown,
}

impl EndpointError {
    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: EndpointErrorKind::Config,
            status: None,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: EndpointErrorKind::Malformed,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => EndpointErrorKind::BadRequest,
            404 => EndpointErrorKind::NotFound,
            408 => EndpointErrorKind::Timeout,
            500 | 502 | 503 | 504 => EndpointErrorKind::ServerError,
            _ => EndpointErrorKind::Unknown,
        };
        Self {
            kind,
            status: Some(status),
            message: truncate_body(body),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            EndpointErrorKind::Timeout
        } else {
            EndpointErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }

    /// True if the endpoint is telling us the model cannot do tool calls.
    /// Ollama and OpenAI-compatible servers both phrase this in the error
    /// body rather than a status code.
    pub fn is_tools_unsupported(&self) -> bool {
        let msg = self.message.to_ascii_lowercase();
        msg.contains("does not support tools") || msg.contains("tool_choice is not supported")
    }

    /// User-facing summary suitable for the UI error banner.
    pub fn user_message(&self) -> String {
        match self.kind {
            EndpointErrorKind::Config => format!("Configuration error: {}", self.message),
            EndpointErrorKind::Network => {
                "Cannot reach the LLM endpoint (network error). Is the server running?".to_string()
            }
            EndpointErrorKind::Timeout => "The LLM endpoint timed out.".to_string(),
            EndpointErrorKind::BadRequest => {
                format!("The endpoint rejected the request: {}", self.message)
            }
            EndpointErrorKind::NotFound => {
                "Model not found on the endpoint. Check the configured model name.".to_string()
            }
            EndpointErrorKind::ServerError => {
                "The LLM endpoint is experiencing issues (server error).".to_string()
            }
            EndpointErrorKind::Malformed => {
                format!("Unexpected response from the endpoint: {}", self.message)
            }
            EndpointErrorKind::Unknown => format!("LLM error: {}", self.message),
        }
    }
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "endpoint error ({}): {}", status, self.message),
            None => write!(f, "endpoint error: {}", self.message),
        }
    }
}

impl std::error::Error for EndpointError {}

/// Keep error bodies loggable: cap length on a UTF-8 boundary.
fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            EndpointError::from_status(404, "model 'x' not found").kind,
            EndpointErrorKind::NotFound
        );
        assert_eq!(
            EndpointError::from_status(503, "").kind,
            EndpointErrorKind::ServerError
        );
        assert_eq!(
            EndpointError::from_status(400, "bad").kind,
            EndpointErrorKind::BadRequest
        );
        assert_eq!(
            EndpointError::from_status(418, "teapot").kind,
            EndpointErrorKind::Unknown
        );
    }

    #[test]
    fn tools_unsupported_detection() {
        let err = EndpointError::from_status(400, "registry.ollama.ai/library/llama2 does not support tools");
        assert!(err.is_tools_unsupported());
        let err = EndpointError::from_status(400, "invalid role");
        assert!(!err.is_tools_unsupported());
    }

    #[test]
    fn body_truncated_on_char_boundary() {
        let body = "\u{1F980}".repeat(200); // 4 bytes each, 800 bytes total
        let err = EndpointError::from_status(500, &body);
        assert!(err.message.len() <= 504);
        assert!(err.message.ends_with("..."));
    }
}
