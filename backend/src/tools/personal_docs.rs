// backend/src/tools/personal_docs.rs
//
// Personal document tools. Everything here goes through the search proxy
// with the turn's fingerprint; the proxy is the component that actually
// enforces ownership.

use crate::errors::AppError;
use crate::llm::{EmbeddingClient, EmbeddingInputType};
use crate::services::search_proxy::SearchProxy;
use crate::tools::{RetrievalTool, ToolContext, ToolError, ToolInput};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// First fetch returns at most this much text; the remainder is reachable
/// through search_personal_document.
const MAX_FETCH_CHARS: usize = 50_000;
/// Memoized full text is bounded the same way.
const MAX_MEMO_CHARS: usize = 50_000;
/// Search responses stay well under the tool-result budget.
const MAX_SEARCH_RESULT_CHARS: usize = 10_000;
const TOP_PASSAGES: usize = 3;

fn memo_key(document_id: &str) -> String {
    format!("personal_doc_{document_id}")
}

fn require_fingerprint(ctx: &ToolContext) -> Result<&str, ToolError> {
    ctx.fingerprint.as_deref().ok_or_else(|| {
        ToolError::ExecutionFailed(
            "Unable to identify user. Please ensure you're properly authenticated.".to_string(),
        )
    })
}

fn require_document_id(input: &ToolInput) -> Result<&str, ToolError> {
    input["document_id"].as_str().filter(|s| !s.is_empty()).ok_or_else(|| {
        ToolError::InvalidParams(
            "No document ID provided. Use list_my_documents to see your documents and their IDs."
                .to_string(),
        )
    })
}

// --- list_my_documents ---

pub struct ListMyDocumentsTool {
    proxy: Arc<dyn SearchProxy>,
}

impl ListMyDocumentsTool {
    pub fn new(proxy: Arc<dyn SearchProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RetrievalTool for ListMyDocumentsTool {
    fn name(&self) -> &'static str {
        "list_my_documents"
    }

    fn description(&self) -> &'static str {
        "List all documents the user has uploaded to their personal document index, with titles, upload dates, and document IDs."
    }

    fn input_schema(&self) -> JsonValue {
        json!({"type": "object", "properties": {}, "required": []})
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn wants_fingerprint(&self) -> bool {
        true
    }

    async fn execute(&self, _input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let fingerprint = require_fingerprint(ctx)?;
        let response = self
            .proxy
            .list_documents(fingerprint, &ctx.index_name)
            .await?;

        if response.documents.is_empty() {
            return Ok(
                "You haven't uploaded any documents yet. You can upload PDFs using the document upload feature."
                    .to_string(),
            );
        }

        let mut lines = vec![format!(
            "You have {} uploaded document(s):\n",
            response.documents.len()
        )];
        for (i, doc) in response.documents.iter().enumerate() {
            let title = if doc.title.is_empty() {
                "Untitled"
            } else {
                &doc.title
            };
            lines.push(format!("{}. **{title}**", i + 1));
            lines.push(format!("   - Document ID: `{}`", doc.id));
            lines.push(format!("   - Uploaded: {}", doc.uploaded_at));
            lines.push(format!(
                "   - Pages: {}, Chunks: {}",
                doc.page_count
                    .map_or_else(|| "?".to_string(), |p| p.to_string()),
                doc.chunk_count
            ));
            lines.push(String::new());
        }
        Ok(lines.join("\n"))
    }
}

// --- fetch_personal_document ---

pub struct FetchPersonalDocumentTool {
    proxy: Arc<dyn SearchProxy>,
}

impl FetchPersonalDocumentTool {
    pub fn new(proxy: Arc<dyn SearchProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RetrievalTool for FetchPersonalDocumentTool {
    fn name(&self) -> &'static str {
        "fetch_personal_document"
    }

    fn description(&self) -> &'static str {
        "Fetch the complete text of an uploaded personal document, reassembled from its chunks. Large documents are truncated at 50,000 characters with an offer to search the remainder. The document content is authoritative - base answers on what it actually says."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "The ID of the document to fetch. Get this from list_my_documents or search results.",
                },
            },
            "required": ["document_id"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn wants_fingerprint(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let fingerprint = require_fingerprint(ctx)?;
        let document_id = require_document_id(input)?;

        let doc = self
            .proxy
            .document_content(document_id, fingerprint, &ctx.index_name)
            .await
            .map_err(map_document_error)?;

        // Memoize for follow-up in-document searches this conversation.
        let memo_text: String = doc.content.chars().take(MAX_MEMO_CHARS).collect();
        ctx.memo.insert(memo_key(document_id), memo_text);
        info!(
            "Memoized personal document {document_id} ({} chars)",
            doc.content.len().min(MAX_MEMO_CHARS)
        );

        let mut lines = vec![
            format!("## {}", doc.title),
            format!("**Document ID:** `{document_id}`"),
            format!(
                "**Pages:** {} | **Chunks:** {} | **Total characters:** {}",
                doc.page_count
                    .map_or_else(|| "unknown".to_string(), |p| p.to_string()),
                doc.chunk_count,
                doc.total_chars
            ),
            String::new(),
            "---".to_string(),
            String::new(),
        ];

        if doc.content.chars().count() > MAX_FETCH_CHARS {
            let truncated: String = doc.content.chars().take(MAX_FETCH_CHARS).collect();
            lines.push(truncated);
            lines.push(String::new());
            lines.push("---".to_string());
            lines.push(String::new());
            lines.push(format!(
                "**[Document truncated at {MAX_FETCH_CHARS} characters. Full document is {} characters.]**",
                doc.total_chars
            ));
            lines.push(String::new());
            lines.push(
                "Ask me to search the remainder for specific topics with search_personal_document."
                    .to_string(),
            );
        } else {
            lines.push(doc.content);
        }

        Ok(lines.join("\n"))
    }
}

// --- search_personal_document ---

pub struct SearchPersonalDocumentTool {
    proxy: Arc<dyn SearchProxy>,
    embeddings: Arc<dyn EmbeddingClient>,
}

impl SearchPersonalDocumentTool {
    pub fn new(proxy: Arc<dyn SearchProxy>, embeddings: Arc<dyn EmbeddingClient>) -> Self {
        Self { proxy, embeddings }
    }

    async fn full_text(
        &self,
        document_id: &str,
        fingerprint: &str,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        if let Some(text) = ctx.memo.get(&memo_key(document_id)) {
            return Ok(text);
        }
        let doc = self
            .proxy
            .document_content(document_id, fingerprint, &ctx.index_name)
            .await
            .map_err(map_document_error)?;
        let text: String = doc.content.chars().take(MAX_MEMO_CHARS).collect();
        ctx.memo.insert(memo_key(document_id), text.clone());
        Ok(text)
    }
}

#[async_trait]
impl RetrievalTool for SearchPersonalDocumentTool {
    fn name(&self) -> &'static str {
        "search_personal_document"
    }

    fn description(&self) -> &'static str {
        "Semantically search within one personal document for specific topics. Use when fetch_personal_document returned truncated content, or to find all mentions of a concept throughout a document. Returns the most relevant passages with surrounding context."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "The ID of the document to search.",
                },
                "query": {
                    "type": "string",
                    "description": "The topic, question, or concept to search for in the document.",
                },
            },
            "required": ["document_id", "query"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn wants_fingerprint(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let fingerprint = require_fingerprint(ctx)?;
        let document_id = require_document_id(input)?;
        let query = input["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| {
                ToolError::InvalidParams(
                    "No search query provided. Please specify what to find in the document."
                        .to_string(),
                )
            })?;

        let text = self.full_text(document_id, fingerprint, ctx).await?;
        let paragraphs: Vec<&str> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            return Ok(format!(
                "No relevant passages found for '{query}' in this document."
            ));
        }

        let query_vector = self
            .embeddings
            .embed_one(query, EmbeddingInputType::Query)
            .await?;
        let paragraph_texts: Vec<String> = paragraphs.iter().map(|p| (*p).to_string()).collect();
        let paragraph_vectors = self
            .embeddings
            .embed_batch(&paragraph_texts, EmbeddingInputType::Document)
            .await?;

        let mut scored: Vec<(usize, f32)> = paragraph_vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query_vector, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut output = vec![format!(
            "## Search Results for: {query}\n\n**Document:** {document_id}\n\n---"
        )];
        let mut used = output[0].len();
        for (rank, (idx, score)) in scored.iter().take(TOP_PASSAGES).enumerate() {
            // ±1 paragraph of context around each match.
            let start = idx.saturating_sub(1);
            let end = (idx + 1).min(paragraphs.len() - 1);
            let passage = paragraphs[start..=end].join("\n\n");
            let section = format!(
                "\n**Match {} (relevance {score:.2})**\n\n{passage}\n\n---",
                rank + 1
            );
            if used + section.len() > MAX_SEARCH_RESULT_CHARS {
                break;
            }
            used += section.len();
            output.push(section);
        }

        if output.len() == 1 {
            return Ok(format!(
                "No relevant passages found for '{query}' in this document."
            ));
        }
        Ok(output.join("\n"))
    }
}

// --- delete_my_document ---

pub struct DeleteMyDocumentTool {
    proxy: Arc<dyn SearchProxy>,
}

impl DeleteMyDocumentTool {
    pub fn new(proxy: Arc<dyn SearchProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RetrievalTool for DeleteMyDocumentTool {
    fn name(&self) -> &'static str {
        "delete_my_document"
    }

    fn description(&self) -> &'static str {
        "Delete a document from the user's personal document index. Requires the document_id from list_my_documents. Only use when the user explicitly asks to remove an uploaded document."
    }

    fn input_schema(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "The ID of the document to delete. Get this from list_my_documents.",
                },
            },
            "required": ["document_id"],
        })
    }

    fn wants_index(&self) -> bool {
        true
    }

    fn wants_fingerprint(&self) -> bool {
        true
    }

    async fn execute(&self, input: &ToolInput, ctx: &ToolContext) -> Result<String, ToolError> {
        let fingerprint = require_fingerprint(ctx)?;
        let document_id = require_document_id(input)?;

        match self
            .proxy
            .delete_document(document_id, fingerprint, &ctx.index_name)
            .await
        {
            Ok(outcome) if outcome.chunks_deleted > 0 => Ok(format!(
                "Successfully deleted document `{document_id}` and all its chunks ({} chunk(s) removed).",
                outcome.chunks_deleted
            )),
            Ok(_) => Ok(format!(
                "Document `{document_id}` was not found or has already been deleted."
            )),
            Err(AppError::NotFound(_)) => Ok(format!(
                "Document with ID `{document_id}` was not found. It may have already been deleted."
            )),
            Err(AppError::OwnershipViolation(_)) => Ok(
                "You don't have permission to delete this document. You can only delete documents you uploaded."
                    .to_string(),
            ),
            Err(e) => Err(e.into()),
        }
    }
}

fn map_document_error(e: AppError) -> ToolError {
    match e {
        AppError::NotFound(_) => ToolError::ExecutionFailed(
            "Document was not found. Use list_my_documents to see your uploaded documents."
                .to_string(),
        ),
        AppError::OwnershipViolation(_) => ToolError::ExecutionFailed(
            "You don't have permission to access this document. You can only access documents you uploaded."
                .to_string(),
        ),
        other => ToolError::App(other),
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn memo_key_format_matches_cache_family() {
        assert_eq!(memo_key("fp-abc-123"), "personal_doc_fp-abc-123");
    }
}
