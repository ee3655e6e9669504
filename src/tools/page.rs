//! Browser-introspection tools, resolved by message-passing to the content
//! script in the active tab.
//!
//! The shell implements [`PageBridge`]; each tool forwards a named
//! extraction function over it and maps the `{ result } | { error }` reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::types::{ExtractRequest, ExtractResponse};

use super::Tool;

/// Request/response bridge into the content script of the active tab.
#[async_trait]
pub trait PageBridge: Send + Sync {
    async fn extract(&self, request: ExtractRequest) -> anyhow::Result<ExtractResponse>;
}

/// One page-extraction tool: a fixed extraction function plus the metadata
/// the model sees. The six extraction tools differ only in these fields.
pub struct PageExtractTool {
    name: &'static str,
    description: &'static str,
    /// Extraction function the content script dispatches on.
    function_name: &'static str,
    /// Whether the tool accepts an optional CSS-selector argument.
    takes_selector: bool,
    bridge: Arc<dyn PageBridge>,
}

#[async_trait]
impl Tool for PageExtractTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn schema(&self) -> Value {
        let properties = if self.takes_selector {
            json!({
                "selector": {
                    "type": "string",
                    "description": "Optional CSS selector to scope the extraction"
                }
            })
        } else {
            json!({})
        };
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": []
            }
        })
    }

    async fn call(&self, arguments: &Value) -> anyhow::Result<String> {
        let argument = arguments
            .get("selector")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string());

        let response = self
            .bridge
            .extract(ExtractRequest {
                function_name: self.function_name.to_string(),
                argument,
            })
            .await?;

        if let Some(error) = response.error {
            warn!(tool = self.name, "Page extraction failed: {}", error);
            return Ok(format!("Could not read the page: {}", error));
        }
        Ok(response
            .result
            .unwrap_or_else(|| "The page returned no content.".to_string()))
    }
}

/// The fixed set of page-introspection tools over a shared bridge.
pub fn page_tools(bridge: Arc<dyn PageBridge>) -> Vec<Arc<dyn Tool>> {
    let defs: [(&'static str, &'static str, &'static str, bool); 6] = [
        (
            "get_page_url",
            "Get the URL of the page in the active tab",
            "getPageUrl",
            false,
        ),
        (
            "get_page_content",
            "Get the readable text content of the page in the active tab",
            "getPageTextContent",
            true,
        ),
        (
            "get_page_metadata",
            "Get the title and meta tags of the page in the active tab",
            "getPageMetadata",
            false,
        ),
        (
            "get_page_tables",
            "Extract tables from the page in the active tab",
            "getPageTables",
            true,
        ),
        (
            "get_page_lists",
            "Extract bullet and numbered lists from the page in the active tab",
            "getPageLists",
            true,
        ),
        (
            "get_page_code_blocks",
            "Extract code blocks from the page in the active tab",
            "getPageCodeBlocks",
            true,
        ),
    ];

    defs.into_iter()
        .map(|(name, description, function_name, takes_selector)| {
            Arc::new(PageExtractTool {
                name,
                description,
                function_name,
                takes_selector,
                bridge: bridge.clone(),
            }) as Arc<dyn Tool>
        })
        .collect()
}
