//! Tool-call routing: a fixed internal registry plus user-registered
//! external HTTP endpoints.
//!
//! Validation failures become corrective natural-language strings fed back
//! to the model rather than hard errors — the recovery strategy is "tell
//! the model what it did wrong and let it retry", not aborting the turn.

mod datetime;
mod external;
mod history;
mod page;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::types::ToolCall;

pub use datetime::{DateMathTool, GetDateTool};
pub use external::{ExternalToolClient, ExternalToolSpec};
pub use history::{RecentSessionsTool, SemanticHistorySearchTool, SessionPagesTool, TurnLookupTool};
pub use page::{page_tools, PageBridge, PageExtractTool};

/// An internal tool the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// OpenAI-format function schema as a JSON value.
    fn schema(&self) -> Value;
    /// Execute with the argument object from the tool call; returns result
    /// text to fold back into the conversation.
    async fn call(&self, arguments: &Value) -> anyhow::Result<String>;
}

/// Routes a model-requested tool call to the internal registry or the
/// external HTTP dispatcher.
pub struct ToolRouter {
    tools: Vec<Arc<dyn Tool>>,
    external: Option<ExternalToolClient>,
}

impl ToolRouter {
    pub fn new(tools: Vec<Arc<dyn Tool>>, external: Option<ExternalToolClient>) -> Self {
        for tool in &tools {
            info!(name = tool.name(), "Registered internal tool");
        }
        Self { tools, external }
    }

    /// The merged internal + external tool catalogue for the request body.
    pub fn definitions(&self) -> Vec<Value> {
        let mut defs: Vec<Value> = self
            .tools
            .iter()
            .map(|t| json!({"type": "function", "function": t.schema()}))
            .collect();
        if let Some(ref external) = self.external {
            defs.extend(external.definitions());
        }
        defs
    }

    /// Every tool name the router knows, used by the argument-vs-tool-name
    /// confusion heuristic and unknown-tool messages.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.name().to_string()).collect();
        if let Some(ref external) = self.external {
            names.extend(external.names());
        }
        names
    }

    /// Resolve one tool call to result text.
    ///
    /// Internal registry hits execute locally. Misses dispatch to the
    /// external endpoint when one is configured. Validation and transport
    /// problems come back as `Ok` corrective text; an unknown tool with no
    /// external route is a hard error the caller may still fold into the
    /// conversation.
    pub async fn resolve(&self, call: &ToolCall) -> anyhow::Result<String> {
        let name = &call.function.name;
        let args = &call.function.arguments;

        for tool in &self.tools {
            if tool.name() == *name {
                debug!(tool = %name, "Executing internal tool");
                return tool.call(args).await;
            }
        }

        if let Some(ref external) = self.external {
            if let Some(spec) = external.spec(name) {
                if let Some(correction) =
                    validate_arguments(args, &spec.parameters, &self.known_names())
                {
                    debug!(tool = %name, "Tool arguments failed validation");
                    return Ok(correction);
                }
            }
            debug!(tool = %name, "Dispatching external tool");
            return Ok(external.call(name, args).await);
        }

        let available = self.known_names().join(", ");
        anyhow::bail!(
            "Unknown tool '{}'. Available tools: [{}]. Use one of these or respond with text only.",
            name,
            available
        )
    }
}

/// Check an argument object against a JSON-schema-like parameter spec.
///
/// Returns a corrective message on the first violation, `None` when the
/// arguments are acceptable. Reusable outside the router.
pub fn validate_arguments(
    args: &Value,
    parameters: &Value,
    known_tool_names: &[String],
) -> Option<String> {
    let args_obj = match args {
        Value::Null => return None, // treated as {}
        Value::Object(map) => map,
        other => {
            return Some(format!(
                "The arguments must be a JSON object, but {} was provided. \
                 Retry with an object matching the tool's parameters.",
                json_type_name(other)
            ))
        }
    };

    let properties = parameters.get("properties").and_then(|p| p.as_object());

    if let Some(required) = parameters.get("required").and_then(|r| r.as_array()) {
        for req in required {
            let Some(req_name) = req.as_str() else { continue };
            if !args_obj.contains_key(req_name) {
                return Some(format!(
                    "Missing required parameter '{}'. Provide it and call the tool again.",
                    req_name
                ));
            }
        }
    }

    for (key, value) in args_obj {
        // A parameter value that is itself a tool name usually means the
        // model confused the argument slot with the tool to call.
        if let Some(s) = value.as_str() {
            if known_tool_names.iter().any(|n| n == s) {
                return Some(format!(
                    "The value '{}' for parameter '{}' is the name of another tool. \
                     If you meant to call '{}', call it directly; otherwise provide a real value.",
                    s, key, s
                ));
            }
        }

        let Some(props) = properties else { continue };
        let Some(declared) = props.get(key) else { continue };
        let Some(expected) = declared.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        if !value_matches_type(value, expected) {
            return Some(format!(
                "Parameter '{}' should be of type {}, but a {} was provided. \
                 Fix the value and call the tool again.",
                key,
                expected,
                json_type_name(value)
            ));
        }
    }

    None
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string"},
                "days": {"type": "integer"}
            },
            "required": ["city"]
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"city": "Oslo", "days": 3});
        assert!(validate_arguments(&args, &schema(), &[]).is_none());
    }

    #[test]
    fn missing_required_parameter_corrects() {
        let args = json!({"days": 3});
        let msg = validate_arguments(&args, &schema(), &[]).unwrap();
        assert!(msg.contains("Missing required parameter 'city'"), "got: {}", msg);
    }

    #[test]
    fn wrong_type_corrects() {
        let args = json!({"city": "Oslo", "days": "three"});
        let msg = validate_arguments(&args, &schema(), &[]).unwrap();
        assert!(msg.contains("'days'"), "got: {}", msg);
        assert!(msg.contains("integer"), "got: {}", msg);
    }

    #[test]
    fn tool_name_as_argument_corrects() {
        let args = json!({"city": "get_weather"});
        let names = vec!["get_weather".to_string(), "get_date".to_string()];
        let msg = validate_arguments(&args, &schema(), &names).unwrap();
        assert!(msg.contains("name of another tool"), "got: {}", msg);
    }

    #[test]
    fn null_arguments_treated_as_empty_object() {
        let no_required = json!({"type": "object", "properties": {}});
        assert!(validate_arguments(&Value::Null, &no_required, &[]).is_none());
    }

    #[test]
    fn non_object_arguments_correct() {
        let msg = validate_arguments(&json!("just a string"), &schema(), &[]).unwrap();
        assert!(msg.contains("JSON object"), "got: {}", msg);
    }

    #[tokio::test]
    async fn unknown_tool_without_external_route_errors() {
        let router = ToolRouter::new(vec![Arc::new(GetDateTool)], None);
        let call = crate::types::ToolCall {
            function: crate::types::ToolFunction {
                name: "launch_rocket".to_string(),
                arguments: json!({}),
            },
        };
        let err = router.resolve(&call).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool 'launch_rocket'"));
        assert!(err.to_string().contains("get_date"));
    }
}
