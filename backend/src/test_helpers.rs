// backend/src/test_helpers.rs
//
// Unit-test scaffolding: an AppState assembled from in-memory fakes.

use crate::agents::AgentRegistry;
use crate::auth::{Claims, TokenVerifier};
use crate::config::Config;
use crate::errors::AppError;
use crate::llm::{
    AiClient, ChatRequest, ChatStream, EmbeddingClient, EmbeddingInputType, LlmError, StreamEvent,
};
use crate::models::documents::ChunkUpload;
use crate::pdf::PdfTextExtractor;
use crate::services::cache::{BlobDocumentCache, KeyLocks};
use crate::services::conversation::InMemoryConversationStore;
use crate::services::indexer::IndexScheduler;
use crate::services::orchestrator::Orchestrator;
use crate::services::quota::InMemoryQuotaTracker;
use crate::services::search_proxy::{
    DeleteResponse, DocumentContent, DocumentsResponse, IndexResponse, SearchProxy, SearchRequest,
    SearchResponse,
};
use crate::state::{AppState, ConversationSessions};
use crate::text_processing::chunking::ChunkConfig;
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use std::sync::Arc;

pub const TEST_JWT_SECRET: &str = "unit-test-secret";

pub fn issue_token(_state: &AppState, fingerprint: Option<&str>, is_admin: bool) -> String {
    let claims = Claims {
        fingerprint: fingerprint.map(String::from),
        is_admin,
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Completes immediately with no content.
pub struct SilentAiClient;

#[async_trait]
impl AiClient for SilentAiClient {
    async fn stream_chat(
        &self,
        _model: &str,
        _request: ChatRequest,
    ) -> Result<ChatStream, LlmError> {
        let stream = futures::stream::iter(vec![Ok(StreamEvent::Done {
            stop_reason: Some("end_turn".to_string()),
        })]);
        Ok(Box::pin(stream))
    }
}

pub struct ZeroEmbeddings;

#[async_trait]
impl EmbeddingClient for ZeroEmbeddings {
    async fn embed_batch(
        &self,
        texts: &[String],
        _input_type: EmbeddingInputType,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|_| vec![0.0f32; 1024]).collect())
    }
}

/// A proxy that fails every call; for tests that never reach it.
pub struct UnreachableProxy;

#[async_trait]
impl SearchProxy for UnreachableProxy {
    async fn search(&self, _request: SearchRequest) -> Result<SearchResponse, AppError> {
        Err(AppError::HttpRequestError("proxy unreachable".into()))
    }

    async fn index_chunks(
        &self,
        _index: &str,
        _fingerprint: Option<&str>,
        _documents: Vec<ChunkUpload>,
    ) -> Result<IndexResponse, AppError> {
        Err(AppError::HttpRequestError("proxy unreachable".into()))
    }

    async fn list_documents(
        &self,
        _fingerprint: &str,
        _index: &str,
    ) -> Result<DocumentsResponse, AppError> {
        Err(AppError::HttpRequestError("proxy unreachable".into()))
    }

    async fn document_content(
        &self,
        _document_id: &str,
        _fingerprint: &str,
        _index: &str,
    ) -> Result<DocumentContent, AppError> {
        Err(AppError::HttpRequestError("proxy unreachable".into()))
    }

    async fn delete_document(
        &self,
        _document_id: &str,
        _fingerprint: &str,
        _index: &str,
    ) -> Result<DeleteResponse, AppError> {
        Err(AppError::HttpRequestError("proxy unreachable".into()))
    }
}

pub fn test_state() -> AppState {
    let config = Arc::new(Config {
        jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        ..Default::default()
    });
    let store = Arc::new(InMemoryConversationStore::new());
    let cache = Arc::new(BlobDocumentCache::new(
        std::env::temp_dir().join(format!("regagent-test-{}", uuid::Uuid::new_v4())),
    ));
    let embeddings = Arc::new(ZeroEmbeddings);
    let proxy = Arc::new(UnreachableProxy);
    let indexer = IndexScheduler::new(
        cache.clone(),
        embeddings.clone(),
        proxy.clone(),
        ChunkConfig::default(),
        true,
    );
    let tools = Arc::new(ToolRegistry::new());
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(SilentAiClient),
        tools,
        config.clone(),
    );

    AppState {
        agents: Arc::new(AgentRegistry::new(&config)),
        orchestrator,
        store,
        cache,
        indexer,
        embedding_client: embeddings,
        search_proxy: proxy,
        quota: Arc::new(InMemoryQuotaTracker::new(config.daily_request_limit)),
        pdf: Arc::new(PdfTextExtractor),
        token_verifier: Some(Arc::new(TokenVerifier::new(TEST_JWT_SECRET))),
        sessions: Arc::new(ConversationSessions::new()),
        fetch_locks: Arc::new(KeyLocks::new()),
        config,
    }
}
