// backend/src/tools/cfr.rs
//
// Cache-first fetch of CFR sections: check the blob cache, schedule
// background indexing on the promotion rule, otherwise fetch from eCFR and
// write through.

use crate::clients::ecfr::EcfrClient;
use crate::errors::AppError;
use crate::models::documents::{CachedDocument, DocSource};
use crate::services::cache::{self, DocumentCache, KeyLocks};
use crate::services::indexer::{IndexScheduler, should_promote};
use crate::tools::{RetrievalTool, ToolContext, ToolError, ToolInput};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{info, warn};

pub struct FetchCfrSectionTool {
    adapter: Arc<EcfrClient>,
    cache: Arc<dyn DocumentCache>,
    indexer: Arc<IndexScheduler>,
    locks: Arc<KeyLocks>,
    cache_enabled: bool,
    auto_index: bool,
}

impl FetchCfrSectionTool {
    pub fn new(
        adapter: Arc<EcfrClient>,
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

    fn promote_if_due(&self, doc: &CachedDocument, index_name: &str) {
        if should_promote(doc, self.auto_index) {
            self.indexer.schedule(doc.clone(), index_name);
        }
    }
}

/// The model sometimes passes numeric sections as numbers.
fn section_argument(input: &ToolInput) -> Option<String> {
    match &input["section"] {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl RetrievalTool for FetchCfrSectionTool {
    fn name(&self) -> &'static str {
        "fetch_cfr_section"
    }

    fn description(&self) -> &'static str {
        "Fetch the complete text of a Code of Federal Regulations (CFR) section from the official eCFR API. Use this when you need the full regulatory text or want to verify exact wording. FAA regulations are in Title 14, NRC in Title 10, DoD acquisition in Titles 32 and 48. Example: for §25.1309 use title=14, part=25, section=\"1309\"."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "integer",
                    "description": "CFR title number (14 for FAA, 10 for NRC, 32/48 for DoD). Defaults to 14.",
                    "default": 14,
                },
                "part": {
                    "type": "integer",
                    "description": "CFR part number (e.g., 25 for transport category airplanes)",
                },
                "section": {
                    "type": "string",
                    "description": "Section number (e.g., '1309' for §25.1309)",
                },
                "date": {
                    "type": "string",
                    "description": "Optional issue date YYYY-MM-DD; defaults to the latest available",
                },
            },
            "required": ["part", "section"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let part = input["part"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidParams("'part' is required".to_string()))?
            as u32;
        let section = section_argument(input)
            .ok_or_else(|| ToolError::InvalidParams("'section' is required".to_string()))?;
        let title = input["title"].as_u64().unwrap_or(14) as u32;
        let date = input["date"].as_str();

        let section_base = section
            .split(['(', '['])
            .next()
            .unwrap_or(&section)
            .trim()
            .to_string();
        let doc_id = cache::cfr_id(title, part, &section_base);

        if !self.cache_enabled {
            let fetched = self
                .adapter
                .fetch_section(title, part, &section_base, date)
                .await
                .map_err(|e| map_fetch_error(e, title, part, &section_base))?;
            return Ok(fetched.body);
        }

        match self.cache.get(DocSource::Cfr, &doc_id).await {
            Ok(Some(doc)) => {
                info!("Cache hit for CFR {doc_id}");
                self.promote_if_due(&doc, &ctx.index_name);
                return Ok(doc.content);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cache lookup failed, falling back to API"),
        }

        // Coalesce concurrent fetches of the same missing section.
        let _guard = self.locks.acquire(&format!("cfr/{doc_id}")).await;
        if let Ok(Some(doc)) = self.cache.get(DocSource::Cfr, &doc_id).await {
            self.promote_if_due(&doc, &ctx.index_name);
            return Ok(doc.content);
        }

        let fetched = self
            .adapter
            .fetch_section(title, part, &section_base, date)
            .await
            .map_err(|e| map_fetch_error(e, title, part, &section_base))?;

        let doc = CachedDocument::regulatory(
            DocSource::Cfr,
            doc_id.clone(),
            fetched.title,
            fetched.citation,
            fetched.body.clone(),
            Utc::now(),
            fetched.metadata,
        );
        if let Err(e) = self.cache.put(DocSource::Cfr, &doc_id, &doc).await {
            warn!(error = %e, "Failed to cache CFR section");
        }

        Ok(fetched.body)
    }
}

fn map_fetch_error(e: AppError, title: u32, part: u32, section: &str) -> ToolError {
    match e {
        AppError::UpstreamNotFound(_) => {
            ToolError::ExecutionFailed(format!("Section not found: {title} CFR {part}.{section}"))
        }
        AppError::HttpRequestError(msg) if msg.contains("timed out") || msg.contains("timeout") => {
            ToolError::ExecutionFailed("upstream timeout, please retry".to_string())
        }
        other => ToolError::ExecutionFailed(format!(
            "fetching {title} CFR {part}.{section} failed: {other}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_argument_accepts_string_and_number() {
        assert_eq!(
            section_argument(&json!({"section": "1309"})).as_deref(),
            Some("1309")
        );
        assert_eq!(
            section_argument(&json!({"section": 1309})).as_deref(),
            Some("1309")
        );
        assert!(section_argument(&json!({})).is_none());
    }

    #[test]
    fn fetch_errors_become_model_facing_strings() {
        let e = map_fetch_error(AppError::UpstreamNotFound("x".into()), 14, 25, "1309");
        assert_eq!(e.to_string(), "Section not found: 14 CFR 25.1309");

        let e = map_fetch_error(
            AppError::HttpRequestError("operation timed out".into()),
            14,
            25,
            "1309",
        );
        assert_eq!(e.to_string(), "upstream timeout, please retry");
    }
}
