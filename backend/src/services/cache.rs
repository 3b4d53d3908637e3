// backend/src/services/cache.rs
//
// Content-addressed document cache. One JSON envelope blob per canonical id,
// laid out as `{root}/{kind}/{id}.json`. Canonical ids are agent-agnostic: a
// CFR section fetched on behalf of two agents resolves to one cache entry.

use crate::errors::AppError;
use crate::models::documents::{CachedDocument, DocSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

#[async_trait]
pub trait DocumentCache: Send + Sync {
    /// Returns the cached document, incrementing its hit count, or `None` on
    /// miss. A failed hit-count write degrades to a warning; the content is
    /// still returned.
    async fn get(&self, kind: DocSource, id: &str) -> Result<Option<CachedDocument>, AppError>;

    /// Stores a document, overwriting any existing entry.
    async fn put(&self, kind: DocSource, id: &str, doc: &CachedDocument) -> Result<(), AppError>;

    /// Marks a cached document as indexed. Idempotent; a missing entry is
    /// not an error (the indexing task may have outlived an evicted blob).
    async fn mark_indexed(&self, kind: DocSource, id: &str) -> Result<(), AppError>;
}

// --- Canonical id helpers ---

/// `cfr/{title}-{part}-{section}`, with subsection references stripped
/// (`1309(a)` and `1309` are the same section).
pub fn cfr_id(title: u32, part: u32, section: &str) -> String {
    let section_base = section
        .split(['(', '['])
        .next()
        .unwrap_or(section)
        .trim();
    format!("{title}-{part}-{section_base}")
}

/// `drs/{TYPE}-{NUMBER}` with the number uppercased and separators
/// normalized to dashes.
pub fn drs_id(doc_type: &str, doc_number: &str) -> String {
    let normalized = doc_number
        .to_uppercase()
        .trim()
        .replace([' ', '/'], "-");
    format!("{doc_type}-{normalized}")
}

/// ADAMS accession numbers (`ML13095A205`) are already canonical.
pub fn aps_id(accession_number: &str) -> String {
    accession_number.trim().to_uppercase()
}

/// Personal documents key as `{fingerprint}-{uuid}`.
pub fn personal_id(fingerprint: &str, document_uuid: &str) -> String {
    format!("{fingerprint}-{document_uuid}")
}

// --- Filesystem blob implementation ---

pub struct BlobDocumentCache {
    root: PathBuf,
}

impl BlobDocumentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, kind: DocSource, id: &str) -> PathBuf {
        // Ids are normalized by the key helpers; anything that could still
        // escape the layout is flattened.
        let safe_id = id.replace(['/', '\\'], "-");
        self.root.join(kind.as_str()).join(format!("{safe_id}.json"))
    }

    async fn read_envelope(path: &Path) -> Result<Option<CachedDocument>, AppError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let doc = serde_json::from_slice::<CachedDocument>(&bytes)?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::IoError(e)),
        }
    }

    async fn write_envelope(path: &Path, doc: &CachedDocument) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec(doc)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentCache for BlobDocumentCache {
    #[instrument(skip(self), fields(%kind, id))]
    async fn get(&self, kind: DocSource, id: &str) -> Result<Option<CachedDocument>, AppError> {
        let path = self.blob_path(kind, id);
        let Some(mut doc) = Self::read_envelope(&path).await? else {
            debug!("Cache miss: {}/{}", kind, id);
            return Ok(None);
        };

        doc.hit_count += 1;
        if let Err(e) = Self::write_envelope(&path, &doc).await {
            warn!(error = %e, "Failed to update hit count for {}/{}", kind, id);
        }
        info!("Cache hit: {}/{} (hits: {})", kind, id, doc.hit_count);
        Ok(Some(doc))
    }

    #[instrument(skip(self, doc), fields(%kind, id))]
    async fn put(&self, kind: DocSource, id: &str, doc: &CachedDocument) -> Result<(), AppError> {
        let path = self.blob_path(kind, id);
        Self::write_envelope(&path, doc).await?;
        info!("Cached document: {}/{}", kind, id);
        Ok(())
    }

    #[instrument(skip(self), fields(%kind, id))]
    async fn mark_indexed(&self, kind: DocSource, id: &str) -> Result<(), AppError> {
        let path = self.blob_path(kind, id);
        let Some(mut doc) = Self::read_envelope(&path).await? else {
            warn!("mark_indexed on missing entry {}/{}", kind, id);
            return Ok(());
        };
        if !doc.indexed {
            doc.indexed = true;
            doc.indexed_at = Some(Utc::now());
            Self::write_envelope(&path, &doc).await?;
        }
        info!("Marked as indexed: {}/{}", kind, id);
        Ok(())
    }
}

// --- Per-key write coalescing ---

/// Serializes concurrent fetches of the same missing document: callers take
/// the key's guard, re-check the cache, and only then go upstream, so each
/// missing key triggers exactly one upstream fetch.
#[derive(Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
