// search-proxy/src/config.rs

use serde::Deserialize;

#[derive(Deserialize, Clone)]
pub struct Config {
    // Qdrant credentials live here and nowhere else.
    pub qdrant_url: Option<String>,
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: u64,

    // Query embeddings (same deployment the backend uses for documents)
    pub embeddings_endpoint: Option<String>,
    pub embeddings_api_key: Option<String>,
    #[serde(default = "default_embeddings_model")]
    pub embeddings_model: String,

    /// Per-tenant index namespaces this proxy will touch. Requests naming
    /// anything else are rejected outright.
    #[serde(default = "default_valid_indexes")]
    pub valid_indexes: String,

    /// Credential required for regulatory (null-owner) chunk writes.
    pub regulatory_write_token: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self, anyhow::Error> {
        envy::from_env::<Self>().map_err(anyhow::Error::from)
    }

    pub fn valid_index_list(&self) -> Vec<&str> {
        self.valid_indexes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("qdrant_url", &self.qdrant_url.as_ref().map(|_| "[REDACTED]"))
            .field(
                "qdrant_api_key",
                &self.qdrant_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embedding_dimension", &self.embedding_dimension)
            .field(
                "embeddings_endpoint",
                &self.embeddings_endpoint.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "embeddings_api_key",
                &self.embeddings_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("embeddings_model", &self.embeddings_model)
            .field("valid_indexes", &self.valid_indexes)
            .field(
                "regulatory_write_token",
                &self.regulatory_write_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("port", &self.port)
            .finish()
    }
}

const fn default_embedding_dimension() -> u64 {
    1024
}
fn default_embeddings_model() -> String {
    "cohere-embed".to_string()
}
fn default_valid_indexes() -> String {
    "faa-agent,nrc-agent,dod-agent".to_string()
}
const fn default_port() -> u16 {
    8001
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: None,
            qdrant_api_key: None,
            embedding_dimension: default_embedding_dimension(),
            embeddings_endpoint: None,
            embeddings_api_key: None,
            embeddings_model: default_embeddings_model(),
            valid_indexes: default_valid_indexes(),
            regulatory_write_token: None,
            port: default_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_index_list_splits_and_trims() {
        let config = Config {
            valid_indexes: "faa-agent, nrc-agent ,dod-agent".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.valid_index_list(),
            vec!["faa-agent", "nrc-agent", "dod-agent"]
        );
    }

    #[test]
    fn debug_redacts_credentials() {
        let config = Config {
            qdrant_api_key: Some("qdrant-secret".into()),
            regulatory_write_token: Some("svc-secret".into()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("qdrant-secret"));
        assert!(!rendered.contains("svc-secret"));
    }
}
