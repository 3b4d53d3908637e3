// backend/src/services/indexer.rs
//
// Background indexing of cached documents into the vector corpus. Retrieval
// tools schedule work here fire-and-forget; the corpus self-evolves because
// only documents that keep getting retrieved are promoted. Tasks are bounded
// by the process lifetime; loss on restart is acceptable because the next
// retrieval-driven hit re-schedules.

use crate::errors::AppError;
use crate::llm::{EmbeddingClient, EmbeddingInputType};
use crate::models::documents::{CachedDocument, ChunkUpload, DocSource};
use crate::services::cache::DocumentCache;
use crate::services::search_proxy::SearchProxy;
use crate::text_processing::chunking::{ChunkConfig, chunk_text};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub const MAX_CHUNKS_PER_DOCUMENT: usize = 100;

/// Promotion rule: a document earns a slot in the searchable corpus on its
/// second retrieval. The first fetch writes it through with `hit_count = 0`;
/// the first cache hit (hit_count >= 1) of an un-indexed entry promotes.
pub fn should_promote(doc: &CachedDocument, auto_index: bool) -> bool {
    auto_index && !doc.indexed && doc.hit_count >= 1
}

/// Stable parent id for a regulatory document's chunks in the index.
pub fn regulatory_parent_id(doc_type: DocSource, doc_id: &str) -> String {
    let digest = Sha256::digest(format!("{doc_type}:{doc_id}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

pub struct IndexScheduler {
    cache: Arc<dyn DocumentCache>,
    embeddings: Arc<dyn EmbeddingClient>,
    proxy: Arc<dyn SearchProxy>,
    chunk_config: ChunkConfig,
    enabled: bool,
    // Single-build: at most one task per (kind, id, index) at a time.
    in_flight: Mutex<HashSet<String>>,
}

impl IndexScheduler {
    pub fn new(
        cache: Arc<dyn DocumentCache>,
        embeddings: Arc<dyn EmbeddingClient>,
        proxy: Arc<dyn SearchProxy>,
        chunk_config: ChunkConfig,
        enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            embeddings,
            proxy,
            chunk_config,
            enabled,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Enqueues background indexing of `doc` into `index_name` and returns
    /// immediately. Duplicate schedules for the same (kind, id, index)
    /// coalesce to the running task and return `None`.
    pub fn schedule(self: &Arc<Self>, doc: CachedDocument, index_name: &str) -> Option<JoinHandle<()>> {
        if !self.enabled {
            debug!("Auto-indexing disabled, skipping {}/{}", doc.doc_type, doc.doc_id);
            return None;
        }

        let key = format!("{}/{}/{}", doc.doc_type, doc.doc_id, index_name);
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(key.clone()) {
                debug!("Indexing already in flight for {key}, coalescing");
                return None;
            }
        }

        info!(
            "Scheduling background indexing for {}/{} -> index {}",
            doc.doc_type, doc.doc_id, index_name
        );

        let scheduler = Arc::clone(self);
        let index_name = index_name.to_string();
        Some(tokio::spawn(async move {
            if let Err(e) = scheduler.index_document(&doc, &index_name).await {
                error!(error = %e, "Background indexing failed for {}/{}", doc.doc_type, doc.doc_id);
            }
            scheduler
                .in_flight
                .lock()
                .expect("in-flight set poisoned")
                .remove(&key);
        }))
    }

    #[instrument(skip(self, doc), fields(doc_type = %doc.doc_type, doc_id = %doc.doc_id, index_name), err)]
    async fn index_document(&self, doc: &CachedDocument, index_name: &str) -> Result<(), AppError> {
        let mut chunks = chunk_text(&doc.content, self.chunk_config);
        if chunks.len() > MAX_CHUNKS_PER_DOCUMENT {
            warn!(
                total = chunks.len(),
                kept = MAX_CHUNKS_PER_DOCUMENT,
                "Document exceeds chunk cap, indexing prefix only"
            );
            chunks.truncate(MAX_CHUNKS_PER_DOCUMENT);
        }
        if chunks.is_empty() {
            warn!("Nothing to index");
            return Ok(());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embeddings
            .embed_batch(&texts, EmbeddingInputType::Document)
            .await?;

        let parent_id = match doc.doc_type {
            DocSource::Personal => doc.doc_id.clone(),
            kind => regulatory_parent_id(kind, &doc.doc_id),
        };
        let uploaded_at = Utc::now();

        let uploads: Vec<ChunkUpload> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, embedding))| ChunkUpload {
                id: format!("{parent_id}-chunk{i}"),
                parent_id: parent_id.clone(),
                title: doc.title.clone(),
                content: chunk.content,
                source: doc.doc_type.to_string(),
                doc_type: doc.doc_type.to_string(),
                citation: if doc.citation.is_empty() {
                    None
                } else {
                    Some(doc.citation.clone())
                },
                owner_fingerprint: doc.owner_fingerprint.clone(),
                uploaded_at,
                page_count: doc.page_count,
                file_hash: doc.content_hash.clone(),
                embedding: Some(embedding),
            })
            .collect();

        let count = uploads.len();
        let response = self
            .proxy
            .index_chunks(index_name, doc.owner_fingerprint.as_deref(), uploads)
            .await?;
        if response.failed_count > 0 {
            warn!(
                failed = response.failed_count,
                errors = ?response.errors,
                "Some chunks failed to index"
            );
        }

        self.cache.mark_indexed(doc.doc_type, &doc.doc_id).await?;
        info!("Indexed {count} chunks into {index_name}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::search_proxy::{
        DeleteResponse, DocumentContent, DocumentsResponse, IndexResponse, SearchRequest,
        SearchResponse,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct StubEmbeddings {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl EmbeddingClient for StubEmbeddings {
        async fn embed_batch(
            &self,
            texts: &[String],
            _input_type: EmbeddingInputType,
        ) -> Result<Vec<Vec<f32>>, AppError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(texts.iter().map(|_| vec![0.1f32; 1024]).collect())
        }
    }

    #[derive(Default)]
    struct CountingProxy {
        uploads: AtomicUsize,
        last_owner: Mutex<Option<Option<String>>>,
        last_index: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SearchProxy for CountingProxy {
        async fn search(&self, _request: SearchRequest) -> Result<SearchResponse, AppError> {
            unimplemented!("not used")
        }

        async fn index_chunks(
            &self,
            index: &str,
            fingerprint: Option<&str>,
            documents: Vec<ChunkUpload>,
        ) -> Result<IndexResponse, AppError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            *self.last_owner.lock().unwrap() = Some(fingerprint.map(String::from));
            *self.last_index.lock().unwrap() = Some(index.to_string());
            Ok(IndexResponse {
                indexed_count: documents.len(),
                failed_count: 0,
                errors: vec![],
            })
        }

        async fn list_documents(
            &self,
            _fingerprint: &str,
            _index: &str,
        ) -> Result<DocumentsResponse, AppError> {
            unimplemented!("not used")
        }

        async fn document_content(
            &self,
            _document_id: &str,
            _fingerprint: &str,
            _index: &str,
        ) -> Result<DocumentContent, AppError> {
            unimplemented!("not used")
        }

        async fn delete_document(
            &self,
            _document_id: &str,
            _fingerprint: &str,
            _index: &str,
        ) -> Result<DeleteResponse, AppError> {
            unimplemented!("not used")
        }
    }

    fn cfr_doc() -> CachedDocument {
        CachedDocument::regulatory(
            DocSource::Cfr,
            "14-25-1309",
            "14 CFR §25.1309",
            "14 CFR §25.1309",
            "Equipment, systems, and installations must be designed so that…",
            Utc::now(),
            json!({}),
        )
    }

    fn scheduler(
        proxy: Arc<CountingProxy>,
        gate: Option<Arc<Notify>>,
    ) -> (Arc<IndexScheduler>, Arc<crate::services::cache::BlobDocumentCache>, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(crate::services::cache::BlobDocumentCache::new(dir.path()));
        let scheduler = IndexScheduler::new(
            cache.clone(),
            Arc::new(StubEmbeddings { gate }),
            proxy,
            ChunkConfig::default(),
            true,
        );
        (scheduler, cache, dir)
    }

    #[test]
    fn promotion_waits_for_second_retrieval() {
        let mut doc = cfr_doc();
        assert!(!should_promote(&doc, true), "fresh write-through must not promote");
        doc.hit_count = 1;
        assert!(should_promote(&doc, true), "first cache hit promotes");
        assert!(!should_promote(&doc, false), "gate respects configuration");
        doc.indexed = true;
        assert!(!should_promote(&doc, true), "already indexed never re-promotes");
    }

    #[tokio::test]
    async fn concurrent_schedules_coalesce_to_one_upload() {
        let proxy = Arc::new(CountingProxy::default());
        let gate = Arc::new(Notify::new());
        let (scheduler, cache, _dir) = scheduler(proxy.clone(), Some(gate.clone()));
        let doc = cfr_doc();
        cache.put(DocSource::Cfr, &doc.doc_id, &doc).await.unwrap();

        let first = scheduler.schedule(doc.clone(), "faa-agent");
        assert!(first.is_some());
        // Second schedule while the first is parked in the embedding call.
        assert!(scheduler.schedule(doc.clone(), "faa-agent").is_none());

        gate.notify_waiters();
        gate.notify_one();
        first.unwrap().await.unwrap();

        assert_eq!(proxy.uploads.load(Ordering::SeqCst), 1);
        // Cache entry was marked indexed by the job.
        let stored = cache.get(DocSource::Cfr, &doc.doc_id).await.unwrap().unwrap();
        assert!(stored.indexed);
    }

    #[tokio::test]
    async fn same_document_different_index_builds_separately() {
        let proxy = Arc::new(CountingProxy::default());
        let (scheduler, cache, _dir) = scheduler(proxy.clone(), None);
        let doc = cfr_doc();
        cache.put(DocSource::Cfr, &doc.doc_id, &doc).await.unwrap();

        let a = scheduler.schedule(doc.clone(), "faa-agent").unwrap();
        let b = scheduler.schedule(doc.clone(), "dod-agent").unwrap();
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(proxy.uploads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn regulatory_upload_carries_null_owner() {
        let proxy = Arc::new(CountingProxy::default());
        let (scheduler, cache, _dir) = scheduler(proxy.clone(), None);
        let doc = cfr_doc();
        cache.put(DocSource::Cfr, &doc.doc_id, &doc).await.unwrap();

        scheduler.schedule(doc, "faa-agent").unwrap().await.unwrap();
        assert_eq!(*proxy.last_owner.lock().unwrap(), Some(None));
        assert_eq!(proxy.last_index.lock().unwrap().as_deref(), Some("faa-agent"));
    }

    #[test]
    fn regulatory_parent_id_is_stable_and_short() {
        let a = regulatory_parent_id(DocSource::Cfr, "14-25-1309");
        let b = regulatory_parent_id(DocSource::Cfr, "14-25-1309");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, regulatory_parent_id(DocSource::Drs, "14-25-1309"));
    }
}
