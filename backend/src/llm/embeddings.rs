// backend/src/llm/embeddings.rs
//
// Embedding client for the Cohere deployment behind an Azure AI inference
// endpoint. Produces 1024-dimensional vectors for both indexing and querying.

use crate::config::Config;
use crate::errors::AppError;
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, instrument};

// Each text is truncated before embedding; the Cohere context window is
// larger but anything past this adds no retrieval value.
const MAX_EMBED_CHARS: usize = 8000;
// Conservative batch size (the API allows ~96).
const BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingInputType {
    /// Indexing side.
    Document,
    /// Search side.
    Query,
}

impl EmbeddingInputType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embeds a batch of texts, preserving order.
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: EmbeddingInputType,
    ) -> Result<Vec<Vec<f32>>, AppError>;

    async fn embed_one(
        &self,
        text: &str,
        input_type: EmbeddingInputType,
    ) -> Result<Vec<f32>, AppError> {
        let mut results = self.embed_batch(&[text.to_string()], input_type).await?;
        results
            .pop()
            .ok_or_else(|| AppError::EmbeddingError("empty embedding response".to_string()))
    }
}

// --- Request/response wire structs ---

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
pub struct CohereEmbeddingClient {
    reqwest_client: ReqwestClient,
    config: Arc<Config>,
}

pub fn build_embedding_client(config: Arc<Config>) -> Result<CohereEmbeddingClient, AppError> {
    let reqwest_client = ReqwestClient::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

    Ok(CohereEmbeddingClient {
        reqwest_client,
        config,
    })
}

#[async_trait]
impl EmbeddingClient for CohereEmbeddingClient {
    #[instrument(skip(self, texts), fields(count = texts.len(), ?input_type), err)]
    async fn embed_batch(
        &self,
        texts: &[String],
        input_type: EmbeddingInputType,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let endpoint = self.config.embeddings_endpoint.as_ref().ok_or_else(|| {
            AppError::ConfigError("EMBEDDINGS_ENDPOINT not configured".to_string())
        })?;
        let api_key = self.config.embeddings_api_key.as_ref().ok_or_else(|| {
            AppError::ConfigError("EMBEDDINGS_API_KEY not configured".to_string())
        })?;

        let url = format!(
            "{}/models/embeddings?api-version=2024-05-01-preview",
            endpoint.trim_end_matches('/')
        );

        let mut results = Vec::with_capacity(texts.len());

        for batch in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = batch
                .iter()
                .map(|t| {
                    let end = t
                        .char_indices()
                        .nth(MAX_EMBED_CHARS)
                        .map_or(t.len(), |(i, _)| i);
                    &t[..end]
                })
                .collect();

            let request_body = EmbeddingRequest {
                input: truncated,
                model: &self.config.embeddings_model,
                input_type: input_type.as_str(),
            };

            let response = self
                .reqwest_client
                .post(&url)
                .bearer_auth(api_key)
                .header("extra-parameters", "pass-through")
                .json(&request_body)
                .send()
                .await
                .map_err(|e| {
                    error!(error = %e, "Embedding request failed");
                    AppError::HttpRequestError(e.to_string())
                })?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                error!(%status, "Embedding API returned error status");
                return Err(AppError::EmbeddingError(format!(
                    "embedding API error ({status}): {}",
                    body.chars().take(200).collect::<String>()
                )));
            }

            let parsed = response.json::<EmbeddingResponse>().await.map_err(|e| {
                AppError::SerializationError(format!("failed to parse embedding response: {e}"))
            })?;

            if parsed.data.len() != batch.len() {
                return Err(AppError::EmbeddingError(format!(
                    "embedding count mismatch: sent {}, got {}",
                    batch.len(),
                    parsed.data.len()
                )));
            }

            results.extend(parsed.data.into_iter().map(|d| d.embedding));
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(endpoint: Option<&str>, key: Option<&str>) -> Arc<Config> {
        Arc::new(Config {
            embeddings_endpoint: endpoint.map(String::from),
            embeddings_api_key: key.map(String::from),
            ..Default::default()
        })
    }

    #[test]
    fn build_embedding_client_succeeds() {
        let config = test_config(Some("https://example.invalid"), Some("key"));
        assert!(build_embedding_client(config).is_ok());
    }

    #[tokio::test]
    async fn embed_batch_requires_configuration() {
        let client = build_embedding_client(test_config(None, None)).unwrap();
        let result = client
            .embed_batch(&["text".to_string()], EmbeddingInputType::Document)
            .await;
        match result {
            Err(AppError::ConfigError(msg)) => {
                assert!(msg.contains("EMBEDDINGS_ENDPOINT"));
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn input_type_strings_match_api_contract() {
        assert_eq!(EmbeddingInputType::Document.as_str(), "document");
        assert_eq!(EmbeddingInputType::Query.as_str(), "query");
    }
}
