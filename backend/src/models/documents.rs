// backend/src/models/documents.rs
//
// Cached regulatory/personal documents and the chunk records uploaded to the
// vector index through the search proxy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Where a document came from. Personal documents always carry an owner
/// fingerprint; regulatory sources never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocSource {
    Cfr,
    Drs,
    Aps,
    Personal,
}

impl DocSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cfr => "cfr",
            Self::Drs => "drs",
            Self::Aps => "aps",
            Self::Personal => "personal",
        }
    }
}

impl std::fmt::Display for DocSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON envelope stored as one blob per canonical document id.
///
/// Invariant: `owner_fingerprint` is `None` iff the document is regulatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub content: String,
    pub doc_type: DocSource,
    pub doc_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub citation: String,
    pub cached_at: DateTime<Utc>,
    #[serde(default)]
    pub hit_count: u32,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner_fingerprint: Option<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
}

impl CachedDocument {
    pub fn regulatory(
        doc_type: DocSource,
        doc_id: impl Into<String>,
        title: impl Into<String>,
        citation: impl Into<String>,
        content: impl Into<String>,
        cached_at: DateTime<Utc>,
        metadata: JsonValue,
    ) -> Self {
        Self {
            content: content.into(),
            doc_type,
            doc_id: doc_id.into(),
            title: title.into(),
            citation: citation.into(),
            cached_at,
            hit_count: 0,
            indexed: false,
            indexed_at: None,
            owner_fingerprint: None,
            page_count: None,
            content_hash: None,
            metadata,
        }
    }
}

/// One chunk as uploaded to the search proxy's `/index` endpoint.
///
/// Invariant: `owner_fingerprint` equals the parent document's; for
/// regulatory documents it is `None` and the upload must carry the
/// regulatory service credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkUpload {
    pub id: String,
    pub parent_id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub doc_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    pub owner_fingerprint: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}
