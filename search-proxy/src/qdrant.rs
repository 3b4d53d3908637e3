// search-proxy/src/qdrant.rs
//
// The vector index behind the proxy: one Qdrant collection per tenant
// namespace. This module is the only place index credentials are used, and
// `owner_read_filter` is the compiled-in isolation filter every read goes
// through.

use crate::config::Config;
use crate::errors::ProxyError;
use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::vectors_config::Config as QdrantVectorsConfig;
use qdrant_client::qdrant::{
    Condition, CreateCollection, FieldCondition, Filter, IsEmptyCondition, Match, PointStruct,
    Value, VectorParams, VectorsConfig, condition::ConditionOneOf, r#match::MatchValue,
    value::Kind,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// One chunk to store: the chunk id is hashed to a stable point id, so
/// re-uploading the same chunk overwrites rather than duplicates.
pub struct ChunkPoint {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A chunk as read back from the index.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub payload: HashMap<String, Value>,
    pub score: Option<f32>,
}

impl StoredChunk {
    pub fn str_field(&self, key: &str) -> Option<String> {
        match self.payload.get(key)?.kind.as_ref()? {
            Kind::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        match self.payload.get(key)?.kind.as_ref()? {
            Kind::IntegerValue(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn ensure_collection(&self, index: &str) -> Result<(), ProxyError>;
    async fn upsert(&self, index: &str, points: Vec<ChunkPoint>) -> Result<(), ProxyError>;
    async fn search(
        &self,
        index: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Filter,
    ) -> Result<Vec<StoredChunk>, ProxyError>;
    async fn scroll(
        &self,
        index: &str,
        filter: Filter,
        limit: u32,
    ) -> Result<Vec<StoredChunk>, ProxyError>;
    async fn delete_by_filter(&self, index: &str, filter: Filter) -> Result<(), ProxyError>;
}

// --- Filters ---

fn match_condition(key: &str, value: &str) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keyword(value.to_string())),
            }),
            ..Default::default()
        })),
    }
}

fn is_empty_condition(key: &str) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::IsEmpty(IsEmptyCondition {
            key: key.to_string(),
        })),
    }
}

/// The non-negotiable read filter: a hit is visible iff it has no owner
/// (regulatory) or its owner is the requesting fingerprint. This is a
/// compiled constant of the proxy, not caller input.
pub fn owner_read_filter(fingerprint: &str) -> Filter {
    Filter {
        should: vec![
            is_empty_condition("owner_fingerprint"),
            match_condition("owner_fingerprint", fingerprint),
        ],
        ..Default::default()
    }
}

/// Read filter with an optional doc_type refinement layered on top of the
/// ownership filter.
pub fn read_filter(fingerprint: &str, doc_type: Option<&str>) -> Filter {
    let owner = owner_read_filter(fingerprint);
    match doc_type {
        None => owner,
        Some(doc_type) => Filter {
            must: vec![
                Condition {
                    condition_one_of: Some(ConditionOneOf::Filter(owner)),
                },
                match_condition("doc_type", doc_type),
            ],
            ..Default::default()
        },
    }
}

/// Only chunks owned by this fingerprint; regulatory chunks are excluded.
pub fn owned_only_filter(fingerprint: &str) -> Filter {
    Filter {
        must: vec![match_condition("owner_fingerprint", fingerprint)],
        ..Default::default()
    }
}

/// One owned document's chunks.
pub fn owned_document_filter(fingerprint: &str, parent_id: &str) -> Filter {
    Filter {
        must: vec![
            match_condition("owner_fingerprint", fingerprint),
            match_condition("parent_id", parent_id),
        ],
        ..Default::default()
    }
}

// --- Qdrant-backed implementation ---

pub struct QdrantIndexService {
    client: Arc<Qdrant>,
    embedding_dimension: u64,
}

impl QdrantIndexService {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let url = config
            .qdrant_url
            .as_ref()
            .ok_or(ProxyError::NotConfigured("QDRANT_URL"))?;
        info!("Connecting to Qdrant");
        let mut builder = Qdrant::from_url(url);
        if let Some(api_key) = &config.qdrant_api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder.build().map_err(|e| {
            error!(error = %e, "Failed to build Qdrant client");
            ProxyError::Internal(format!("Failed to build Qdrant client: {e}"))
        })?;
        Ok(Self {
            client: Arc::new(client),
            embedding_dimension: config.embedding_dimension,
        })
    }

    fn point_id_for(chunk_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
    }
}

#[async_trait]
impl VectorIndex for QdrantIndexService {
    #[instrument(skip(self), err)]
    async fn ensure_collection(&self, index: &str) -> Result<(), ProxyError> {
        let exists = self
            .client
            .collection_exists(index)
            .await
            .map_err(|e| ProxyError::Upstream(format!("collection_exists: {e}")))?;
        if exists {
            return Ok(());
        }

        info!("Collection '{index}' does not exist. Creating...");
        let result = self
            .client
            .create_collection(CreateCollection {
                collection_name: index.to_string(),
                vectors_config: Some(VectorsConfig {
                    config: Some(QdrantVectorsConfig::Params(VectorParams {
                        size: self.embedding_dimension,
                        distance: qdrant_client::qdrant::Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
                ..Default::default()
            })
            .await;

        match result {
            Ok(_) => {
                info!("Successfully created collection '{index}'");
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => {
                warn!("Collection '{index}' already exists (ignoring)");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to create Qdrant collection");
                Err(ProxyError::Upstream(format!(
                    "Failed to create collection '{index}': {e}"
                )))
            }
        }
    }

    #[instrument(skip(self, points), fields(count = points.len()), err)]
    async fn upsert(&self, index: &str, points: Vec<ChunkPoint>) -> Result<(), ProxyError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            let payload: HashMap<String, Value> = serde_json::from_value(point.payload)
                .map_err(|e| ProxyError::Internal(format!("payload conversion: {e}")))?;
            structs.push(PointStruct {
                id: Some(Self::point_id_for(&point.chunk_id).into()),
                vectors: Some(point.vector.into()),
                payload,
            });
        }

        self.client
            .upsert_points(qdrant_client::qdrant::UpsertPoints {
                collection_name: index.to_string(),
                wait: Some(true),
                points: structs,
                ordering: None,
                shard_key_selector: None,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to upsert points");
                ProxyError::Upstream(format!("upsert: {e}"))
            })?;
        Ok(())
    }

    #[instrument(skip(self, vector, filter), fields(limit), err)]
    async fn search(
        &self,
        index: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Filter,
    ) -> Result<Vec<StoredChunk>, ProxyError> {
        let response = self
            .client
            .search_points(qdrant_client::qdrant::SearchPoints {
                collection_name: index.to_string(),
                vector,
                limit,
                with_payload: Some(true.into()),
                filter: Some(filter),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Qdrant search failed");
                ProxyError::Upstream(format!("search: {e}"))
            })?;

        Ok(response
            .result
            .into_iter()
            .map(|point| StoredChunk {
                payload: point.payload,
                score: Some(point.score),
            })
            .collect())
    }

    #[instrument(skip(self, filter), fields(limit), err)]
    async fn scroll(
        &self,
        index: &str,
        filter: Filter,
        limit: u32,
    ) -> Result<Vec<StoredChunk>, ProxyError> {
        let response = self
            .client
            .scroll(qdrant_client::qdrant::ScrollPoints {
                collection_name: index.to_string(),
                filter: Some(filter),
                limit: Some(limit),
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Qdrant scroll failed");
                ProxyError::Upstream(format!("scroll: {e}"))
            })?;

        Ok(response
            .result
            .into_iter()
            .map(|point| StoredChunk {
                payload: point.payload,
                score: None,
            })
            .collect())
    }

    #[instrument(skip(self, filter), err)]
    async fn delete_by_filter(&self, index: &str, filter: Filter) -> Result<(), ProxyError> {
        self.client
            .delete_points(qdrant_client::qdrant::DeletePoints {
                collection_name: index.to_string(),
                wait: Some(true),
                points: Some(qdrant_client::qdrant::PointsSelector {
                    points_selector_one_of: Some(
                        qdrant_client::qdrant::points_selector::PointsSelectorOneOf::Filter(filter),
                    ),
                }),
                ordering: None,
                shard_key_selector: None,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Qdrant delete failed");
                ProxyError::Upstream(format!("delete: {e}"))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition_key(condition: &Condition) -> Option<&str> {
        match condition.condition_one_of.as_ref()? {
            ConditionOneOf::Field(field) => Some(&field.key),
            ConditionOneOf::IsEmpty(is_empty) => Some(&is_empty.key),
            _ => None,
        }
    }

    #[test]
    fn owner_read_filter_is_null_or_own() {
        let filter = owner_read_filter("fp-0123456789");
        assert!(filter.must.is_empty());
        assert_eq!(filter.should.len(), 2);
        assert!(matches!(
            filter.should[0].condition_one_of,
            Some(ConditionOneOf::IsEmpty(_))
        ));
        assert_eq!(condition_key(&filter.should[0]), Some("owner_fingerprint"));
        match &filter.should[1].condition_one_of {
            Some(ConditionOneOf::Field(field)) => {
                assert_eq!(field.key, "owner_fingerprint");
                assert_eq!(
                    field.r#match.as_ref().unwrap().match_value,
                    Some(MatchValue::Keyword("fp-0123456789".to_string()))
                );
            }
            other => panic!("expected field condition, got {other:?}"),
        }
    }

    #[test]
    fn doc_type_refinement_keeps_ownership_clause() {
        let filter = read_filter("fp-0123456789", Some("user_upload"));
        assert_eq!(filter.must.len(), 2);
        // The ownership filter is nested, not replaced.
        assert!(matches!(
            filter.must[0].condition_one_of,
            Some(ConditionOneOf::Filter(_))
        ));
        assert_eq!(condition_key(&filter.must[1]), Some("doc_type"));
    }

    #[test]
    fn owned_filters_never_match_regulatory_chunks() {
        let filter = owned_only_filter("fp-0123456789");
        assert_eq!(filter.must.len(), 1);
        assert!(filter.should.is_empty());

        let filter = owned_document_filter("fp-0123456789", "fp-0123456789-doc1");
        assert_eq!(filter.must.len(), 2);
        assert_eq!(condition_key(&filter.must[1]), Some("parent_id"));
    }

    #[test]
    fn point_ids_are_stable_per_chunk() {
        let a = QdrantIndexService::point_id_for("abc-chunk0");
        let b = QdrantIndexService::point_id_for("abc-chunk0");
        let c = QdrantIndexService::point_id_for("abc-chunk1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
