// search-proxy/src/state.rs

use crate::config::Config;
use crate::embeddings::QueryEmbedder;
use crate::qdrant::VectorIndex;
use std::sync::Arc;

#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<Config>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn QueryEmbedder>,
}
