// backend/src/tools/drs.rs
//
// DRS search and cache-first document fetch.

use crate::clients::drs::{DrsClient, normalize_doc_number};
use crate::errors::AppError;
use crate::models::documents::{CachedDocument, DocSource};
use crate::services::cache::{self, DocumentCache, KeyLocks};
use crate::services::indexer::{IndexScheduler, should_promote};
use crate::tools::{RetrievalTool, ToolContext, ToolError, ToolInput, truncate_result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const MAX_FETCH_CHARS: usize = 15_000;

pub struct SearchDrsTool {
    adapter: Arc<DrsClient>,
}

impl SearchDrsTool {
    pub fn new(adapter: Arc<DrsClient>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RetrievalTool for SearchDrsTool {
    fn name(&self) -> &'static str {
        "search_drs"
    }

    fn description(&self) -> &'static str {
        "Search the FAA Dynamic Regulatory System (DRS) for Advisory Circulars and other regulatory documents. Use when looking for ACs, Orders, ADs, or TSOs that the index did not surface. Results include document numbers and titles; fetch full text with fetch_drs_document."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "keywords": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Keywords to search for (e.g., ['HIRF', 'protection'])",
                },
                "doc_type": {
                    "type": "string",
                    "description": "Document type to search",
                    "enum": ["AC", "AD", "TSO", "Order"],
                    "default": "AC",
                },
                "status_filter": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Status filter (default: ['Current'])",
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results to return (default: 10)",
                    "default": 10,
                },
            },
            "required": ["keywords"],
        })
    }

    async fn execute(&self, input: &ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let keywords: Vec<String> = input["keywords"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .filter(|k: &Vec<String>| !k.is_empty())
            .ok_or_else(|| ToolError::InvalidParams("'keywords' is required".to_string()))?;
        let doc_type = input["doc_type"].as_str().unwrap_or("AC").to_string();
        let max_results = input["max_results"].as_u64().unwrap_or(10) as usize;
        let status_filter: Vec<String> = input["status_filter"]
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| vec!["Current".to_string()]);

        let results = self
            .adapter
            .search(&keywords, &doc_type, &status_filter)
            .await?;

        if results.documents.is_empty() {
            return Ok(format!("No DRS documents found for keywords: {keywords:?}"));
        }

        let mut formatted = vec![format!(
            "## DRS Search Results\n**Keywords:** {}\n**Type:** {doc_type}\n",
            keywords.join(", ")
        )];
        for (i, doc) in results.documents.iter().take(max_results).enumerate() {
            formatted.push(format!("### {}. {}", i + 1, doc.document_number));
            formatted.push(format!("**Title:** {}", doc.title));
            if !doc.status.is_empty() {
                formatted.push(format!("**Status:** {}", doc.status));
            }
            if !doc.guid.is_empty() {
                formatted.push(format!("**GUID:** {}", doc.guid));
            }
            formatted.push(String::new());
        }
        formatted.push(format!(
            "\n*Showing {} of {} results*",
            results.documents.len().min(max_results),
            results.total.max(results.documents.len() as u64)
        ));

        Ok(formatted.join("\n"))
    }
}

pub struct FetchDrsDocumentTool {
    adapter: Arc<DrsClient>,
    cache: Arc<dyn DocumentCache>,
    indexer: Arc<IndexScheduler>,
    locks: Arc<KeyLocks>,
    cache_enabled: bool,
    auto_index: bool,
}

impl FetchDrsDocumentTool {
    pub fn new(
        adapter: Arc<DrsClient>,
        cache: Arc<dyn DocumentCache>,
        indexer: Arc<IndexScheduler>,
        locks: Arc<KeyLocks>,
        cache_enabled: bool,
        auto_index: bool,
    ) -> Self {
        Self {
            adapter,
            cache,
            indexer,
            locks,
            cache_enabled,
            auto_index,
        }
    }
}

#[async_trait]
impl RetrievalTool for FetchDrsDocumentTool {
    fn name(&self) -> &'static str {
        "fetch_drs_document"
    }

    fn description(&self) -> &'static str {
        "Fetch a specific FAA document from DRS by its document number (e.g., 'AC 25.1309-1A'). Downloads the attachment and extracts the text content."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "doc_number": {
                    "type": "string",
                    "description": "Document number (e.g., 'AC 25.1309-1A', 'AC 23-8C')",
                },
                "doc_type": {
                    "type": "string",
                    "description": "Document type",
                    "enum": ["AC", "AD", "TSO", "Order"],
                    "default": "AC",
                },
            },
            "required": ["doc_number"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        // PDF download and extraction dominate.
        Duration::from_secs(60)
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let doc_number = input["doc_number"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParams("'doc_number' is required".to_string()))?;
        let doc_type = input["doc_type"].as_str().unwrap_or("AC");

        let doc_id = cache::drs_id(doc_type, &normalize_doc_number(doc_number));

        if self.cache_enabled {
            match self.cache.get(DocSource::Drs, &doc_id).await {
                Ok(Some(doc)) => {
                    info!("Cache hit for DRS {doc_id}");
                    if should_promote(&doc, self.auto_index) {
                        self.indexer.schedule(doc.clone(), &ctx.index_name);
                    }
                    return Ok(doc.content);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Cache lookup failed, falling back to API"),
            }
        }

        let _guard = self.locks.acquire(&format!("drs/{doc_id}")).await;
        if self.cache_enabled {
            if let Ok(Some(doc)) = self.cache.get(DocSource::Drs, &doc_id).await {
                if should_promote(&doc, self.auto_index) {
                    self.indexer.schedule(doc.clone(), &ctx.index_name);
                }
                return Ok(doc.content);
            }
        }

        let fetched = self
            .adapter
            .fetch_document(doc_number, doc_type)
            .await
            .map_err(|e| match e {
                AppError::UpstreamNotFound(_) => ToolError::ExecutionFailed(format!(
                    "Document not found: {doc_type}/{doc_number}"
                )),
                other => ToolError::ExecutionFailed(format!("DRS fetch failed: {other}")),
            })?;

        let content = truncate_result(&fetched.body, MAX_FETCH_CHARS);

        if self.cache_enabled {
            let doc = CachedDocument::regulatory(
                DocSource::Drs,
                doc_id.clone(),
                fetched.title,
                fetched.citation,
                content.clone(),
                Utc::now(),
                fetched.metadata,
            );
            if let Err(e) = self.cache.put(DocSource::Drs, &doc_id, &doc).await {
                warn!(error = %e, "Failed to cache DRS document");
            }
        }

        Ok(content)
    }
}
