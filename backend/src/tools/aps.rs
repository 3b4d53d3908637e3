// backend/src/tools/aps.rs
//
// NRC ADAMS search and cache-first document fetch.

use crate::clients::aps::ApsClient;
use crate::errors::AppError;
use crate::models::documents::{CachedDocument, DocSource};
use crate::services::cache::{self, DocumentCache, KeyLocks};
use crate::services::indexer::{IndexScheduler, should_promote};
use crate::tools::{RetrievalTool, ToolContext, ToolError, ToolInput};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SearchApsTool {
    adapter: Arc<ApsClient>,
}

impl SearchApsTool {
    pub fn new(adapter: Arc<ApsClient>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RetrievalTool for SearchApsTool {
    fn name(&self) -> &'static str {
        "search_aps"
    }

    fn description(&self) -> &'static str {
        "Search NRC ADAMS for documents (NUREGs, Regulatory Guides, Generic Letters, inspection reports, Part 21 correspondence). Use only after search_indexed_content returned nothing relevant; the live ADAMS API is slower and rate-limited. Results include accession numbers; fetch full text with fetch_aps_document."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Full-text search query (e.g., 'Part 21 reporting defects')",
                },
                "doc_type": {
                    "type": "string",
                    "description": "Optional document type filter (e.g., 'NUREG', 'Inspection Report')",
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum results to return (default: 20)",
                    "default": 20,
                },
                "date_from": {
                    "type": "string",
                    "description": "Optional start date filter, YYYY-MM-DD",
                },
                "date_to": {
                    "type": "string",
                    "description": "Optional end date filter, YYYY-MM-DD",
                },
            },
            "required": ["query"],
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, input: &ToolInput, _ctx: &ToolContext) -> Result<String, ToolError> {
        let query = input["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParams("'query' is required".to_string()))?;
        let doc_type = input["doc_type"].as_str();
        let max_results = input["max_results"].as_u64().unwrap_or(20) as usize;
        let date_from = input["date_from"].as_str();
        let date_to = input["date_to"].as_str();

        let results = self
            .adapter
            .search(query, doc_type, date_from, date_to)
            .await?;

        if results.documents.is_empty() {
            return Ok(format!("No results found for: {query}"));
        }

        let mut output = vec![
            "## NRC ADAMS Search Results\n".to_string(),
            format!("Found {} documents for: {query}\n", results.total),
        ];
        for (i, doc) in results.documents.iter().take(max_results).enumerate() {
            output.push(format!("\n### {}. {}", i + 1, doc.title));
            output.push(format!("- **Accession Number:** {}", doc.accession_number));
            if !doc.doc_types.is_empty() {
                output.push(format!("- **Type:** {}", doc.doc_types.join(", ")));
            }
            if !doc.document_date.is_empty() {
                output.push(format!("- **Date:** {}", doc.document_date));
            }
        }
        if results.total > max_results as u64 {
            output.push(format!(
                "\n*Showing {} of {} results*",
                results.documents.len().min(max_results),
                results.total
            ));
        }

        Ok(output.join("\n"))
    }
}

pub struct FetchApsDocumentTool {
    adapter: Arc<ApsClient>,
    cache: Arc<dyn DocumentCache>,
    indexer: Arc<IndexScheduler>,
    locks: Arc<KeyLocks>,
    cache_enabled: bool,
    auto_index: bool,
}

impl FetchApsDocumentTool {
    pub fn new(
        adapter: Arc<ApsClient>,
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
impl RetrievalTool for FetchApsDocumentTool {
    fn name(&self) -> &'static str {
        "fetch_aps_document"
    }

    fn description(&self) -> &'static str {
        "Fetch a specific NRC document from ADAMS by accession number (e.g., 'ML13095A205'). Returns document metadata and full text when available."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "accession_number": {
                    "type": "string",
                    "description": "ADAMS accession number (e.g., 'ML13095A205')",
                },
            },
            "required": ["accession_number"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let accession = input["accession_number"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParams("'accession_number' is required".to_string()))?;
        let doc_id = cache::aps_id(accession);

        if self.cache_enabled {
            match self.cache.get(DocSource::Aps, &doc_id).await {
                Ok(Some(doc)) => {
                    info!("APS cache hit: {doc_id}");
                    if should_promote(&doc, self.auto_index) {
                        self.indexer.schedule(doc.clone(), &ctx.index_name);
                    }
                    return Ok(doc.content);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "APS cache check failed"),
            }
        }

        let _guard = self.locks.acquire(&format!("aps/{doc_id}")).await;
        if self.cache_enabled {
            if let Ok(Some(doc)) = self.cache.get(DocSource::Aps, &doc_id).await {
                if should_promote(&doc, self.auto_index) {
                    self.indexer.schedule(doc.clone(), &ctx.index_name);
                }
                return Ok(doc.content);
            }
        }

        let fetched = self
            .adapter
            .fetch_document(&doc_id)
            .await
            .map_err(|e| match e {
                AppError::UpstreamNotFound(_) => {
                    ToolError::ExecutionFailed(format!("No document at ADAMS {doc_id}"))
                }
                other => ToolError::ExecutionFailed(format!("ADAMS fetch failed: {other}")),
            })?;

        if self.cache_enabled {
            let doc = CachedDocument::regulatory(
                DocSource::Aps,
                doc_id.clone(),
                fetched.title,
                fetched.citation,
                fetched.body.clone(),
                Utc::now(),
                fetched.metadata,
            );
            if let Err(e) = self.cache.put(DocSource::Aps, &doc_id, &doc).await {
                warn!(error = %e, "Failed to cache APS document");
            }
        }

        Ok(fetched.body)
    }
}
