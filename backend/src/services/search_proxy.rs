// backend/src/services/search_proxy.rs
//
// Typed client for the search proxy, the only path from this service to the
// vector index. The proxy enforces the per-tenant ownership filter; this
// client only carries identities, it never sees index credentials.

use crate::errors::AppError;
use crate::models::documents::ChunkUpload;
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub index: String,
    pub fingerprint: String,
    pub top: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub owner_fingerprint: Option<String>,
    #[serde(default)]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
struct IndexRequest<'a> {
    index: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<&'a str>,
    documents: &'a [ChunkUpload],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub indexed_count: usize,
    pub failed_count: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uploaded_at: String,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub chunk_count: usize,
    #[serde(default)]
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentInfo>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentContent {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub page_count: Option<u32>,
    pub chunk_count: usize,
    #[serde(default)]
    pub uploaded_at: String,
    pub total_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub document_id: String,
    pub chunks_deleted: usize,
}

#[async_trait]
pub trait SearchProxy: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, AppError>;

    /// Uploads chunks. Personal uploads carry the owner fingerprint;
    /// regulatory uploads carry `None` and authenticate with the service
    /// credential instead.
    async fn index_chunks(
        &self,
        index: &str,
        fingerprint: Option<&str>,
        documents: Vec<ChunkUpload>,
    ) -> Result<IndexResponse, AppError>;

    async fn list_documents(
        &self,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentsResponse, AppError>;

    async fn document_content(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentContent, AppError>;

    async fn delete_document(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DeleteResponse, AppError>;
}

#[derive(Clone)]
pub struct HttpSearchProxy {
    client: ReqwestClient,
    base_url: String,
    /// Credential authorizing regulatory (null-owner) chunk writes. Never
    /// exposed on user-facing paths.
    regulatory_write_token: Option<String>,
}

impl HttpSearchProxy {
    pub fn new(base_url: &str, regulatory_write_token: Option<String>) -> Result<Self, AppError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            regulatory_write_token,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::FORBIDDEN => {
                let detail = response.text().await.unwrap_or_default();
                error!(%detail, "Search proxy refused request: ownership violation");
                Err(AppError::OwnershipViolation(detail))
            }
            StatusCode::NOT_FOUND => Err(AppError::NotFound("document not found".to_string())),
            status => {
                let detail = response.text().await.unwrap_or_default();
                Err(AppError::HttpRequestError(format!(
                    "search proxy error {status}: {}",
                    detail.chars().take(200).collect::<String>()
                )))
            }
        }
    }
}

#[async_trait]
impl SearchProxy for HttpSearchProxy {
    #[instrument(skip(self, request), fields(index = %request.index, top = request.top), err)]
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, AppError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, documents), fields(index, count = documents.len()), err)]
    async fn index_chunks(
        &self,
        index: &str,
        fingerprint: Option<&str>,
        documents: Vec<ChunkUpload>,
    ) -> Result<IndexResponse, AppError> {
        let body = IndexRequest {
            index,
            fingerprint,
            documents: &documents,
        };
        let mut request = self
            .client
            .post(format!("{}/index", self.base_url))
            .json(&body);
        if fingerprint.is_none() {
            let token = self.regulatory_write_token.as_ref().ok_or_else(|| {
                AppError::ConfigError(
                    "regulatory write token not configured for null-owner upload".to_string(),
                )
            })?;
            request = request.header("x-service-token", token);
        }
        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, fingerprint), fields(index), err)]
    async fn list_documents(
        &self,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentsResponse, AppError> {
        let response = self
            .client
            .get(format!("{}/documents", self.base_url))
            .query(&[("fingerprint", fingerprint), ("index", index)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, fingerprint), fields(document_id, index), err)]
    async fn document_content(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentContent, AppError> {
        let response = self
            .client
            .get(format!("{}/documents/{document_id}/content", self.base_url))
            .query(&[("fingerprint", fingerprint), ("index", index)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    #[instrument(skip(self, fingerprint), fields(document_id, index), err)]
    async fn delete_document(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DeleteResponse, AppError> {
        let response = self
            .client
            .delete(format!("{}/documents/{document_id}", self.base_url))
            .query(&[("fingerprint", fingerprint), ("index", index)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
