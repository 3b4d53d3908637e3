// search-proxy/src/routes.rs
//
// The proxy API. Every read applies the compiled ownership filter; every
// write validates chunk ownership against the request identity. The backend
// has no other path to the index.

use crate::errors::ProxyError;
use crate::models::{
    DeleteResponse, DocumentContent, DocumentInfo, DocumentsResponse, IndexDocument, IndexRequest,
    IndexResponse, SearchRequest, SearchResponse, SearchResult,
};
use crate::qdrant::{
    ChunkPoint, StoredChunk, owned_document_filter, owned_only_filter, read_filter,
};
use crate::state::ProxyState;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

const MIN_FINGERPRINT_LEN: usize = 10;
const SEARCH_CONTENT_CHARS: usize = 1000;
const MAX_DOCUMENT_CHUNKS: u32 = 1000;

fn validate_index(state: &ProxyState, index: &str) -> Result<(), ProxyError> {
    let valid = state.config.valid_index_list();
    if valid.contains(&index) {
        Ok(())
    } else {
        Err(ProxyError::Validation(format!(
            "Invalid index '{index}'. Must be one of: {valid:?}"
        )))
    }
}

fn validate_fingerprint(fingerprint: &str) -> Result<(), ProxyError> {
    if fingerprint.len() < MIN_FINGERPRINT_LEN {
        return Err(ProxyError::Validation(
            "Invalid fingerprint (too short)".to_string(),
        ));
    }
    Ok(())
}

/// Write-side ownership validation.
///
/// Personal uploads: every chunk's owner must equal the request fingerprint.
/// Regulatory uploads (no fingerprint): every owner must be null and the
/// request must carry the regulatory service credential.
pub fn validate_upload(
    fingerprint: Option<&str>,
    service_token: Option<&str>,
    expected_service_token: Option<&str>,
    documents: &[IndexDocument],
) -> Result<(), ProxyError> {
    match fingerprint {
        Some(fingerprint) => {
            validate_fingerprint(fingerprint)?;
            for doc in documents {
                match doc.owner_fingerprint.as_deref() {
                    Some(owner) if owner == fingerprint => {}
                    Some(_) => {
                        return Err(ProxyError::Ownership(
                            "Document fingerprint mismatch. Cannot upload documents for other users."
                                .to_string(),
                        ));
                    }
                    None => {
                        return Err(ProxyError::Ownership(
                            "Cannot upload documents with null owner_fingerprint (regulatory docs protected)"
                                .to_string(),
                        ));
                    }
                }
            }
            Ok(())
        }
        None => {
            let expected = expected_service_token.ok_or(ProxyError::NotConfigured(
                "regulatory write credential",
            ))?;
            if service_token != Some(expected) {
                return Err(ProxyError::Ownership(
                    "Regulatory writes require the service credential".to_string(),
                ));
            }
            if let Some(doc) = documents.iter().find(|d| d.owner_fingerprint.is_some()) {
                return Err(ProxyError::Ownership(format!(
                    "Regulatory upload contains an owned chunk ({})",
                    doc.id
                )));
            }
            Ok(())
        }
    }
}

/// Chunk index from an id of the form `{parent}-chunk{N}`.
pub fn chunk_number(chunk_id: &str) -> u32 {
    chunk_id
        .rsplit_once("-chunk")
        .and_then(|(_, n)| n.parse().ok())
        .unwrap_or(0)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "search-proxy"}))
}

#[instrument(skip(state, request), fields(index = %request.index, top = request.top))]
async fn search(
    State(state): State<ProxyState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ProxyError> {
    validate_index(&state, &request.index)?;
    validate_fingerprint(&request.fingerprint)?;
    let top = request.top.clamp(1, 20);

    let vector = state.embedder.embed_query(&request.query).await?;
    let filter = read_filter(&request.fingerprint, request.doc_type.as_deref());

    let hits = state
        .index
        .search(&request.index, vector, u64::from(top), filter)
        .await?;

    info!(found = hits.len(), "Search completed");
    let results: Vec<SearchResult> = hits
        .iter()
        .map(|chunk| SearchResult {
            id: chunk.str_field("id").unwrap_or_default(),
            title: chunk.str_field("title").unwrap_or_default(),
            content: chunk
                .str_field("content")
                .unwrap_or_default()
                .chars()
                .take(SEARCH_CONTENT_CHARS)
                .collect(),
            source: chunk.str_field("source").unwrap_or_default(),
            doc_type: chunk.str_field("doc_type"),
            citation: chunk.str_field("citation"),
            owner_fingerprint: chunk.str_field("owner_fingerprint"),
            score: chunk.score,
        })
        .collect();

    Ok(Json(SearchResponse {
        total_count: results.len(),
        results,
    }))
}

#[instrument(skip(state, headers, request), fields(index = %request.index, count = request.documents.len()))]
async fn index_documents(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ProxyError> {
    validate_index(&state, &request.index)?;

    let service_token = headers
        .get("x-service-token")
        .and_then(|value| value.to_str().ok());
    validate_upload(
        request.fingerprint.as_deref(),
        service_token,
        state.config.regulatory_write_token.as_deref(),
        &request.documents,
    )?;

    state.index.ensure_collection(&request.index).await?;

    let mut points = Vec::new();
    let mut errors = Vec::new();
    for doc in &request.documents {
        let Some(vector) = doc.embedding.clone() else {
            errors.push(format!("chunk {} has no embedding", doc.id));
            continue;
        };
        let mut payload = json!({
            "id": doc.id,
            "parent_id": doc.parent_id,
            "title": doc.title,
            "content": doc.content,
            "source": doc.source,
            "doc_type": doc.doc_type,
            "uploaded_at": doc.uploaded_at,
        });
        if let Some(citation) = &doc.citation {
            payload["citation"] = json!(citation);
        }
        if let Some(owner) = &doc.owner_fingerprint {
            payload["owner_fingerprint"] = json!(owner);
        }
        if let Some(pages) = doc.page_count {
            payload["page_count"] = json!(pages);
        }
        if let Some(hash) = &doc.file_hash {
            payload["file_hash"] = json!(hash);
        }
        points.push(ChunkPoint {
            chunk_id: doc.id.clone(),
            vector,
            payload,
        });
    }

    let indexed = points.len();
    state.index.upsert(&request.index, points).await?;

    if !errors.is_empty() {
        warn!(failed = errors.len(), "Some chunks were rejected");
    }
    info!(indexed, "Indexed chunks");
    Ok(Json(IndexResponse {
        indexed_count: indexed,
        failed_count: request.documents.len() - indexed,
        errors,
    }))
}

#[derive(serde::Deserialize)]
struct OwnerParams {
    fingerprint: String,
    index: String,
}

#[instrument(skip(state, params), fields(index = %params.index))]
async fn list_documents(
    State(state): State<ProxyState>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<DocumentsResponse>, ProxyError> {
    validate_index(&state, &params.index)?;
    validate_fingerprint(&params.fingerprint)?;

    let chunks = state
        .index
        .scroll(
            &params.index,
            owned_only_filter(&params.fingerprint),
            MAX_DOCUMENT_CHUNKS,
        )
        .await?;

    // Group chunks into documents by parent id.
    let mut grouped: HashMap<String, DocumentInfo> = HashMap::new();
    for chunk in &chunks {
        let parent_id = chunk
            .str_field("parent_id")
            .or_else(|| {
                chunk
                    .str_field("id")
                    .map(|id| id.rsplit_once("-chunk").map_or(id.clone(), |(base, _)| base.to_string()))
            })
            .unwrap_or_default();
        if parent_id.is_empty() {
            continue;
        }
        let entry = grouped.entry(parent_id.clone()).or_insert_with(|| DocumentInfo {
            id: parent_id,
            title: chunk.str_field("title").unwrap_or_default(),
            uploaded_at: chunk.str_field("uploaded_at").unwrap_or_default(),
            page_count: chunk.u64_field("page_count").map(|p| p as u32),
            chunk_count: 0,
            file_hash: chunk.str_field("file_hash"),
        });
        entry.chunk_count += 1;
    }

    let mut documents: Vec<DocumentInfo> = grouped.into_values().collect();
    documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

    Ok(Json(DocumentsResponse {
        total_count: documents.len(),
        documents,
    }))
}

fn document_chunks_sorted(mut chunks: Vec<StoredChunk>) -> Vec<StoredChunk> {
    chunks.sort_by_key(|chunk| chunk.str_field("id").map_or(0, |id| chunk_number(&id)));
    chunks
}

#[instrument(skip(state, params), fields(index = %params.index, %document_id))]
async fn document_content(
    State(state): State<ProxyState>,
    Path(document_id): Path<String>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<DocumentContent>, ProxyError> {
    validate_index(&state, &params.index)?;
    validate_fingerprint(&params.fingerprint)?;

    let chunks = state
        .index
        .scroll(
            &params.index,
            owned_document_filter(&params.fingerprint, &document_id),
            MAX_DOCUMENT_CHUNKS,
        )
        .await?;
    if chunks.is_empty() {
        return Err(ProxyError::NotFound("Document not found".to_string()));
    }

    let chunks = document_chunks_sorted(chunks);
    let content = chunks
        .iter()
        .filter_map(|chunk| chunk.str_field("content"))
        .collect::<Vec<_>>()
        .join("\n\n");
    let total_chars = content.chars().count();

    info!(chunks = chunks.len(), total_chars, "Reassembled document");
    Ok(Json(DocumentContent {
        id: document_id,
        title: chunks[0].str_field("title").unwrap_or_default(),
        content,
        page_count: chunks[0].u64_field("page_count").map(|p| p as u32),
        chunk_count: chunks.len(),
        uploaded_at: chunks[0].str_field("uploaded_at").unwrap_or_default(),
        total_chars,
    }))
}

#[instrument(skip(state, params), fields(index = %params.index, %document_id))]
async fn delete_document(
    State(state): State<ProxyState>,
    Path(document_id): Path<String>,
    Query(params): Query<OwnerParams>,
) -> Result<Json<DeleteResponse>, ProxyError> {
    validate_index(&state, &params.index)?;
    validate_fingerprint(&params.fingerprint)?;

    let filter = owned_document_filter(&params.fingerprint, &document_id);
    let chunks = state
        .index
        .scroll(&params.index, filter.clone(), MAX_DOCUMENT_CHUNKS)
        .await?;
    if chunks.is_empty() {
        return Err(ProxyError::NotFound("Document not found".to_string()));
    }

    state.index.delete_by_filter(&params.index, filter).await?;

    info!(chunks = chunks.len(), "Deleted document");
    Ok(Json(DeleteResponse {
        document_id,
        chunks_deleted: chunks.len(),
    }))
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/index", post(index_documents))
        .route("/documents", get(list_documents))
        .route("/documents/{document_id}/content", get(document_content))
        .route("/documents/{document_id}", axum::routing::delete(delete_document))
        .with_state(state)
}
