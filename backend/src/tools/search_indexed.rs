// backend/src/tools/search_indexed.rs

use crate::services::search_proxy::{SearchProxy, SearchRequest};
use crate::tools::{RetrievalTool, ToolContext, ToolError, ToolInput};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::info;

const DEFAULT_TOP_K: u64 = 5;
const MAX_TOP_K: u64 = 10;
const EXCERPT_CHARS: usize = 500;

/// Semantic search over the tenant-visible corpus, routed through the search
/// proxy so the ownership filter is enforced by construction.
pub struct SearchIndexedContentTool {
    proxy: Arc<dyn SearchProxy>,
}

impl SearchIndexedContentTool {
    pub fn new(proxy: Arc<dyn SearchProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RetrievalTool for SearchIndexedContentTool {
    fn name(&self) -> &'static str {
        "search_indexed_content"
    }

    fn description(&self) -> &'static str {
        "Search the indexed regulatory documents for relevant information. Use this tool FIRST when answering questions. Returns document snippets with citations; fetch the complete text of promising sections with the source-specific fetch tools."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural language search query (e.g., 'HIRF protection requirements')",
                },
                "top_k": {
                    "type": "integer",
                    "description": "Number of results to return (default: 5, max: 10)",
                    "default": 5,
                },
                "doc_type": {
                    "type": "string",
                    "description": "Optional: filter by document type",
                },
            },
            "required": ["query"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn wants_fingerprint(&self) -> bool {
        true
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParams("'query' is required".to_string()))?;
        let top = input["top_k"].as_u64().unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K) as u32;
        let doc_type = input["doc_type"].as_str().map(String::from);
        let fingerprint = ctx.fingerprint.clone().ok_or_else(|| {
            ToolError::ExecutionFailed(
                "Unable to identify user. Please ensure you're properly authenticated.".to_string(),
            )
        })?;

        info!(index = %ctx.index_name, top, "Index search: '{query}'");
        let response = self
            .proxy
            .search(SearchRequest {
                query: query.to_string(),
                index: ctx.index_name.clone(),
                fingerprint,
                top,
                doc_type,
            })
            .await?;

        if response.results.is_empty() {
            return Ok(format!("No results found for: {query}"));
        }

        let mut formatted = vec![format!("## Search Results for: {query}\n")];
        for (i, hit) in response.results.iter().enumerate() {
            let title = if hit.title.is_empty() {
                "Untitled"
            } else {
                &hit.title
            };
            formatted.push(format!("### {}. {title}", i + 1));
            if let Some(citation) = hit.citation.as_deref().filter(|c| !c.is_empty()) {
                formatted.push(format!("**Citation:** {citation}"));
            }
            if !hit.source.is_empty() {
                formatted.push(format!("**Source:** {}", hit.source));
            }
            let excerpt: String = hit.content.chars().take(EXCERPT_CHARS).collect();
            formatted.push(format!("\n{excerpt}…"));
            formatted.push(String::new());
        }

        Ok(formatted.join("\n"))
    }
}
