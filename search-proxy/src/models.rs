// search-proxy/src/models.rs
//
// Wire models for the proxy API. The backend keeps its own mirror of these;
// the two services share nothing but the JSON contract.

use serde::{Deserialize, Serialize};

fn default_top() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub index: String,
    pub fingerprint: String,
    #[serde(default = "default_top")]
    pub top: u32,
    #[serde(default)]
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub doc_type: Option<String>,
    pub citation: Option<String>,
    pub owner_fingerprint: Option<String>,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub doc_type: String,
    #[serde(default)]
    pub citation: Option<String>,
    pub owner_fingerprint: Option<String>,
    pub uploaded_at: String,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexRequest {
    pub index: String,
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub documents: Vec<IndexDocument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    pub indexed_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    pub uploaded_at: String,
    pub page_count: Option<u32>,
    pub chunk_count: usize,
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentInfo>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentContent {
    pub id: String,
    pub title: String,
    pub content: String,
    pub page_count: Option<u32>,
    pub chunk_count: usize,
    pub uploaded_at: String,
    pub total_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub document_id: String,
    pub chunks_deleted: usize,
}
