// Shared test doubles for the integration suites: a scripted streaming
// provider, deterministic embeddings, and a functional in-memory stand-in
// for the search proxy that applies the same ownership rules.
#![allow(dead_code)]

use async_trait::async_trait;
use regagent_backend::config::Config;
use regagent_backend::errors::AppError;
use regagent_backend::llm::{
    AiClient, ChatRequest, ChatStream, EmbeddingClient, EmbeddingInputType, LlmError, StreamEvent,
};
use regagent_backend::models::documents::ChunkUpload;
use regagent_backend::services::conversation::InMemoryConversationStore;
use regagent_backend::services::orchestrator::{Orchestrator, TurnEvent};
use regagent_backend::services::search_proxy::{
    DeleteResponse, DocumentContent, DocumentInfo, DocumentsResponse, IndexResponse, SearchHit,
    SearchProxy, SearchRequest, SearchResponse,
};
use regagent_backend::tools::ToolRegistry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// --- Scripted provider ---

pub enum ScriptStep {
    Events(Vec<StreamEvent>),
    Fail(LlmError),
}

/// Records one entry per `stream_chat` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message_count: usize,
    pub tool_count: usize,
}

pub struct ScriptedAiClient {
    script: Mutex<VecDeque<ScriptStep>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAiClient {
    pub fn new(steps: Vec<ScriptStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiClient for ScriptedAiClient {
    async fn stream_chat(&self, _model: &str, request: ChatRequest) -> Result<ChatStream, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            message_count: request.messages.len(),
            tool_count: request.tools.len(),
        });
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptStep::Events(vec![StreamEvent::Done {
                stop_reason: Some("end_turn".to_string()),
            }]));
        match step {
            ScriptStep::Fail(error) => Err(error),
            ScriptStep::Events(events) => {
                let items: Vec<Result<StreamEvent, LlmError>> =
                    events.into_iter().map(Ok).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }
}

/// Convenience builders for script rounds.
pub fn text_round(text: &str) -> ScriptStep {
    ScriptStep::Events(vec![
        StreamEvent::TextDelta(text.to_string()),
        StreamEvent::Done {
            stop_reason: Some("end_turn".to_string()),
        },
    ])
}

pub fn tool_round(calls: &[(&str, &str, serde_json::Value)]) -> ScriptStep {
    let mut events = Vec::new();
    for (i, (id, name, input)) in calls.iter().enumerate() {
        events.push(StreamEvent::ToolUseStart {
            index: i,
            id: (*id).to_string(),
            name: (*name).to_string(),
        });
        events.push(StreamEvent::ToolInputDelta {
            index: i,
            partial_json: input.to_string(),
        });
        events.push(StreamEvent::BlockStop { index: i });
    }
    events.push(StreamEvent::Done {
        stop_reason: Some("tool_use".to_string()),
    });
    ScriptStep::Events(events)
}

// --- Deterministic embeddings ---

/// Bag-of-words embedding: shared vocabulary produces high cosine
/// similarity, disjoint vocabulary near zero. Good enough to test ranking.
pub struct HashEmbeddings;

#[async_trait]
impl EmbeddingClient for HashEmbeddings {
    async fn embed_batch(
        &self,
        texts: &[String],
        _input_type: EmbeddingInputType,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; 1024];
                for word in text.to_lowercase().split_whitespace() {
                    let mut hash: u64 = 1469598103934665603;
                    for byte in word.bytes() {
                        hash ^= u64::from(byte);
                        hash = hash.wrapping_mul(1099511628211);
                    }
                    vector[(hash % 1024) as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

// --- Functional search-proxy stand-in ---

/// In-memory proxy that applies the same ownership semantics as the real
/// one: reads see regulatory chunks plus the caller's own, writes must match
/// the request identity.
#[derive(Default)]
pub struct FakeSearchProxy {
    chunks: Mutex<HashMap<String, Vec<ChunkUpload>>>,
}

impl FakeSearchProxy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn chunks_in(&self, index: &str) -> Vec<ChunkUpload> {
        self.chunks
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    fn chunk_number(id: &str) -> u32 {
        id.rsplit_once("-chunk")
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SearchProxy for FakeSearchProxy {
    async fn search(&self, request: SearchRequest) -> Result<SearchResponse, AppError> {
        let store = self.chunks.lock().unwrap();
        let chunks = store.get(&request.index).cloned().unwrap_or_default();
        let query_words: Vec<String> = request
            .query
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();

        let mut scored: Vec<(f32, &ChunkUpload)> = chunks
            .iter()
            // The ownership filter: regulatory or the caller's own.
            .filter(|chunk| {
                chunk.owner_fingerprint.is_none()
                    || chunk.owner_fingerprint.as_deref() == Some(request.fingerprint.as_str())
            })
            .filter(|chunk| match &request.doc_type {
                Some(doc_type) => chunk.doc_type == *doc_type,
                None => true,
            })
            .map(|chunk| {
                let haystack = chunk.content.to_lowercase();
                let score = query_words
                    .iter()
                    .filter(|word| haystack.contains(word.as_str()))
                    .count() as f32;
                (score, chunk)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        let results: Vec<SearchHit> = scored
            .into_iter()
            .take(request.top as usize)
            .map(|(score, chunk)| SearchHit {
                id: chunk.id.clone(),
                title: chunk.title.clone(),
                content: chunk.content.clone(),
                source: chunk.source.clone(),
                doc_type: Some(chunk.doc_type.clone()),
                citation: chunk.citation.clone(),
                owner_fingerprint: chunk.owner_fingerprint.clone(),
                score: Some(score),
            })
            .collect();

        Ok(SearchResponse {
            total_count: results.len(),
            results,
        })
    }

    async fn index_chunks(
        &self,
        index: &str,
        fingerprint: Option<&str>,
        documents: Vec<ChunkUpload>,
    ) -> Result<IndexResponse, AppError> {
        for doc in &documents {
            match (fingerprint, doc.owner_fingerprint.as_deref()) {
                (Some(fp), Some(owner)) if fp == owner => {}
                (None, None) => {}
                _ => {
                    return Err(AppError::OwnershipViolation(
                        "chunk owner does not match request identity".to_string(),
                    ));
                }
            }
        }
        let count = documents.len();
        let mut store = self.chunks.lock().unwrap();
        let entry = store.entry(index.to_string()).or_default();
        for doc in documents {
            entry.retain(|existing| existing.id != doc.id);
            entry.push(doc);
        }
        Ok(IndexResponse {
            indexed_count: count,
            failed_count: 0,
            errors: vec![],
        })
    }

    async fn list_documents(
        &self,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentsResponse, AppError> {
        let store = self.chunks.lock().unwrap();
        let chunks = store.get(index).cloned().unwrap_or_default();
        let mut grouped: HashMap<String, DocumentInfo> = HashMap::new();
        for chunk in chunks
            .iter()
            .filter(|c| c.owner_fingerprint.as_deref() == Some(fingerprint))
        {
            let entry = grouped
                .entry(chunk.parent_id.clone())
                .or_insert_with(|| DocumentInfo {
                    id: chunk.parent_id.clone(),
                    title: chunk.title.clone(),
                    uploaded_at: chunk.uploaded_at.to_rfc3339(),
                    page_count: chunk.page_count,
                    chunk_count: 0,
                    file_hash: chunk.file_hash.clone(),
                });
            entry.chunk_count += 1;
        }
        let documents: Vec<DocumentInfo> = grouped.into_values().collect();
        Ok(DocumentsResponse {
            total_count: documents.len(),
            documents,
        })
    }

    async fn document_content(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DocumentContent, AppError> {
        let store = self.chunks.lock().unwrap();
        let mut chunks: Vec<ChunkUpload> = store
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| {
                c.parent_id == document_id
                    && c.owner_fingerprint.as_deref() == Some(fingerprint)
            })
            .collect();
        if chunks.is_empty() {
            return Err(AppError::NotFound("document not found".to_string()));
        }
        chunks.sort_by_key(|c| Self::chunk_number(&c.id));
        let content = chunks
            .iter()
            .map(|c| c.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let total_chars = content.chars().count();
        Ok(DocumentContent {
            id: document_id.to_string(),
            title: chunks[0].title.clone(),
            content,
            page_count: chunks[0].page_count,
            chunk_count: chunks.len(),
            uploaded_at: chunks[0].uploaded_at.to_rfc3339(),
            total_chars,
        })
    }

    async fn delete_document(
        &self,
        document_id: &str,
        fingerprint: &str,
        index: &str,
    ) -> Result<DeleteResponse, AppError> {
        let mut store = self.chunks.lock().unwrap();
        let Some(entry) = store.get_mut(index) else {
            return Err(AppError::NotFound("document not found".to_string()));
        };
        let before = entry.len();
        let owned: Vec<&ChunkUpload> = entry
            .iter()
            .filter(|c| c.parent_id == document_id)
            .collect();
        if owned.is_empty() {
            return Err(AppError::NotFound("document not found".to_string()));
        }
        if owned
            .iter()
            .any(|c| c.owner_fingerprint.as_deref() != Some(fingerprint))
        {
            return Err(AppError::OwnershipViolation(
                "cannot delete another user's document".to_string(),
            ));
        }
        entry.retain(|c| c.parent_id != document_id);
        Ok(DeleteResponse {
            document_id: document_id.to_string(),
            chunks_deleted: before - entry.len(),
        })
    }
}

// --- Assembly ---

pub fn test_config() -> Config {
    Config {
        jwt_secret: Some("integration-secret".to_string()),
        ..Default::default()
    }
}

pub struct TestStack {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<InMemoryConversationStore>,
    pub ai: Arc<ScriptedAiClient>,
}

pub fn build_stack(
    script: Vec<ScriptStep>,
    tools: ToolRegistry,
    config: Config,
) -> TestStack {
    let store = Arc::new(InMemoryConversationStore::new());
    let ai = ScriptedAiClient::new(script);
    let orchestrator = Orchestrator::new(
        store.clone(),
        ai.clone(),
        Arc::new(tools),
        Arc::new(config),
    );
    TestStack {
        orchestrator,
        store,
        ai,
    }
}

pub async fn collect_events(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Projection helpers for event-order assertions.
pub fn event_kind(event: &TurnEvent) -> &'static str {
    match event {
        TurnEvent::Text { .. } => "text",
        TurnEvent::Reasoning { .. } => "reasoning",
        TurnEvent::ToolUse { .. } => "tool_use",
        TurnEvent::ToolExecuting { .. } => "tool_executing",
        TurnEvent::ToolResult { .. } => "tool_result",
        TurnEvent::Warning { .. } => "warning",
        TurnEvent::QuotaUpdate { .. } => "quota_update",
        TurnEvent::Error { .. } => "error",
        TurnEvent::Done => "done",
    }
}
