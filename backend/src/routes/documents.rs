// backend/src/routes/documents.rs
//
// Personal document uploads. PDFs are extracted, chunked, embedded, and
// indexed through the search proxy immediately (no second-hit wait: the
// uploader's intent is explicit). Files are deduplicated per user by
// SHA-256 of the bytes.

use crate::errors::AppError;
use crate::models::documents::ChunkUpload;
use crate::routes::authenticate;
use crate::services::cache::personal_id;
use crate::services::indexer::MAX_CHUNKS_PER_DOCUMENT;
use crate::state::AppState;
use crate::text_processing::chunking::{ChunkConfig, chunk_text};
use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DocumentsQuery {
    #[serde(default = "default_agent")]
    pub agent: String,
}

fn default_agent() -> String {
    "faa".to_string()
}

#[derive(Serialize)]
pub struct DocumentUploadResponse {
    pub id: String,
    pub title: String,
    pub page_count: u32,
    pub chunk_count: usize,
    pub status: String,
}

#[instrument(skip(state, headers, multipart), fields(agent = %query.agent))]
pub async fn upload_document(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let visitor = authenticate(&state, &headers)?;
    let fingerprint = visitor
        .fingerprint
        .clone()
        .ok_or_else(|| AppError::BadRequest("Uploads require a visitor fingerprint".to_string()))?;
    let agent = state
        .agents
        .get(&query.agent)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown agent '{}'", query.agent)))?;

    let mut file_bytes: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .unwrap_or("document.pdf")
                .to_string();
            let bytes = field.bytes().await?;
            file_bytes = Some((filename, bytes.to_vec()));
        }
    }
    let (filename, bytes) =
        file_bytes.ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;

    let max_bytes = state.config.personal_doc_max_size_mb * 1024 * 1024;
    if bytes.len() > max_bytes {
        return Err(AppError::BadRequest(format!(
            "File exceeds the {} MB limit",
            state.config.personal_doc_max_size_mb
        )));
    }

    let file_hash = hex::encode(Sha256::digest(&bytes));

    let existing = state
        .search_proxy
        .list_documents(&fingerprint, &agent.search_index)
        .await?;
    check_upload_admissible(&existing, &file_hash, state.config.personal_docs_per_user)?;

    // Extraction is CPU-bound; keep it off the async workers.
    let extractor = state.pdf.clone();
    let (text, page_count) =
        tokio::task::spawn_blocking(move || extractor.extract_text(&bytes)).await??;
    if text.trim().is_empty() {
        return Err(AppError::BadRequest(
            "No extractable text in this PDF".to_string(),
        ));
    }

    let mut chunks = chunk_text(&text, ChunkConfig::default());
    if chunks.len() > MAX_CHUNKS_PER_DOCUMENT {
        warn!(
            total = chunks.len(),
            kept = MAX_CHUNKS_PER_DOCUMENT,
            "Upload exceeds chunk cap, indexing prefix only"
        );
        chunks.truncate(MAX_CHUNKS_PER_DOCUMENT);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = state
        .embedding_client
        .embed_batch(&texts, crate::llm::EmbeddingInputType::Document)
        .await?;

    let document_id = personal_id(&fingerprint, &Uuid::new_v4().to_string());
    let uploaded_at = Utc::now();
    let uploads: Vec<ChunkUpload> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (chunk, embedding))| ChunkUpload {
            id: format!("{document_id}-chunk{i}"),
            parent_id: document_id.clone(),
            title: filename.clone(),
            content: chunk.content,
            source: "personal".to_string(),
            doc_type: "user_upload".to_string(),
            citation: None,
            owner_fingerprint: Some(fingerprint.clone()),
            uploaded_at,
            page_count: Some(page_count),
            file_hash: Some(file_hash.clone()),
            embedding: Some(embedding),
        })
        .collect();
    let chunk_count = uploads.len();

    let response = state
        .search_proxy
        .index_chunks(&agent.search_index, Some(&fingerprint), uploads)
        .await?;
    if response.failed_count > 0 {
        warn!(failed = response.failed_count, "Some upload chunks failed to index");
    }

    info!(%document_id, chunk_count, page_count, "Personal document uploaded and indexed");
    Ok((
        StatusCode::CREATED,
        Json(DocumentUploadResponse {
            id: document_id,
            title: filename,
            page_count,
            chunk_count,
            status: "indexed".to_string(),
        }),
    ))
}

#[instrument(skip(state, headers), fields(agent = %query.agent))]
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let visitor = authenticate(&state, &headers)?;
    let fingerprint = visitor
        .fingerprint
        .ok_or_else(|| AppError::BadRequest("A visitor fingerprint is required".to_string()))?;
    let agent = state
        .agents
        .get(&query.agent)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown agent '{}'", query.agent)))?;

    let documents = state
        .search_proxy
        .list_documents(&fingerprint, &agent.search_index)
        .await?;
    Ok(Json(documents))
}

#[instrument(skip(state, headers), fields(agent = %query.agent, %document_id))]
pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    Query(query): Query<DocumentsQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let visitor = authenticate(&state, &headers)?;
    let fingerprint = visitor
        .fingerprint
        .ok_or_else(|| AppError::BadRequest("A visitor fingerprint is required".to_string()))?;
    let agent = state
        .agents
        .get(&query.agent)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown agent '{}'", query.agent)))?;

    let outcome = state
        .search_proxy
        .delete_document(&document_id, &fingerprint, &agent.search_index)
        .await?;
    Ok(Json(outcome))
}

/// Per-user admission: at most `max_docs` uploads, and a file whose SHA-256
/// matches an existing upload is a duplicate (409).
pub fn check_upload_admissible(
    existing: &crate::services::search_proxy::DocumentsResponse,
    file_hash: &str,
    max_docs: usize,
) -> Result<(), AppError> {
    if existing.documents.len() >= max_docs {
        return Err(AppError::BadRequest(format!(
            "Document limit reached ({max_docs} per user); delete one first"
        )));
    }
    if existing
        .documents
        .iter()
        .any(|doc| doc.file_hash.as_deref() == Some(file_hash))
    {
        return Err(AppError::Conflict(
            "This file has already been uploaded".to_string(),
        ));
    }
    Ok(())
}

pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_document).get(list_documents))
        .route("/{document_id}", delete(delete_document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::search_proxy::{DocumentInfo, DocumentsResponse};

    fn existing(hashes: &[&str]) -> DocumentsResponse {
        DocumentsResponse {
            documents: hashes
                .iter()
                .enumerate()
                .map(|(i, hash)| DocumentInfo {
                    id: format!("fp-0123456789-doc{i}"),
                    title: format!("doc{i}.pdf"),
                    uploaded_at: String::new(),
                    page_count: Some(1),
                    chunk_count: 1,
                    file_hash: Some((*hash).to_string()),
                })
                .collect(),
            total_count: hashes.len(),
        }
    }

    #[test]
    fn duplicate_hash_is_a_conflict() {
        let docs = existing(&["aaa", "bbb"]);
        assert!(matches!(
            check_upload_admissible(&docs, "bbb", 20),
            Err(AppError::Conflict(_))
        ));
        assert!(check_upload_admissible(&docs, "ccc", 20).is_ok());
    }

    #[test]
    fn upload_limit_is_enforced() {
        let docs = existing(&["aaa", "bbb"]);
        assert!(matches!(
            check_upload_admissible(&docs, "ccc", 2),
            Err(AppError::BadRequest(_))
        ));
    }
}
