// search-proxy/src/embeddings.rs
//
// Query-side embedding client. Same deployment the backend embeds documents
// with, so query and document vectors live in one space.

use crate::config::Config;
use crate::errors::ProxyError;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

const MAX_QUERY_CHARS: usize = 8000;

#[async_trait]
pub trait QueryEmbedder: Send + Sync {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProxyError>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Clone)]
pub struct CohereQueryEmbedder {
    client: ReqwestClient,
    config: Arc<Config>,
}

impl CohereQueryEmbedder {
    pub fn new(config: Arc<Config>) -> Result<Self, ProxyError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl QueryEmbedder for CohereQueryEmbedder {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ProxyError> {
        let endpoint = self
            .config
            .embeddings_endpoint
            .as_ref()
            .ok_or(ProxyError::NotConfigured("embeddings"))?;
        let api_key = self
            .config
            .embeddings_api_key
            .as_ref()
            .ok_or(ProxyError::NotConfigured("embeddings"))?;

        let url = format!(
            "{}/models/embeddings?api-version=2024-05-01-preview",
            endpoint.trim_end_matches('/')
        );
        let end = query
            .char_indices()
            .nth(MAX_QUERY_CHARS)
            .map_or(query.len(), |(i, _)| i);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("extra-parameters", "pass-through")
            .json(&EmbeddingRequest {
                input: vec![&query[..end]],
                model: &self.config.embeddings_model,
                input_type: "query",
            })
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Query embedding request failed");
                ProxyError::Upstream(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ProxyError::Upstream(format!("embedding API error {status}")));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::Upstream(format!("bad embedding response: {e}")))?;
        parsed
            .data
            .pop()
            .map(|d| d.embedding)
            .ok_or_else(|| ProxyError::Upstream("empty embedding response".to_string()))
    }
}
