// backend/src/clients/aps.rs
//
// NRC ADAMS Public Search (APS) API adapter. Search is full-text with field
// filters; fetching by accession number is a search on the AccessionNumber
// field plus a text download.

use crate::clients::{FetchedDocument, RateBudget, send_idempotent};
use crate::config::Config;
use crate::errors::AppError;
use reqwest::Client as ReqwestClient;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct ApsDocumentSummary {
    pub accession_number: String,
    pub title: String,
    pub document_date: String,
    pub doc_types: Vec<String>,
    pub text_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApsSearchResults {
    pub documents: Vec<ApsDocumentSummary>,
    pub total: u64,
}

pub struct ApsClient {
    client: ReqwestClient,
    base_url: String,
    api_key: Option<String>,
    budget: RateBudget,
}

impl ApsClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.aps_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.aps_api_key.clone(),
            budget: RateBudget::new(1),
        })
    }

    fn api_key(&self) -> Result<&str, AppError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::ConfigError("APS_API_KEY not configured".to_string()))
    }

    async fn post_search(&self, body: JsonValue) -> Result<JsonValue, AppError> {
        let api_key = self.api_key()?;
        self.budget.acquire().await;
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Ocp-Apim-Subscription-Key", api_key)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    fn parse_results(data: &JsonValue) -> ApsSearchResults {
        let documents: Vec<ApsDocumentSummary> = data["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .map(|result| {
                        // Results nest the record under `document`.
                        let doc = if result["document"].is_object() {
                            &result["document"]
                        } else {
                            result
                        };
                        let doc_types = match &doc["DocumentType"] {
                            JsonValue::Array(types) => types
                                .iter()
                                .filter_map(|t| t.as_str())
                                .map(String::from)
                                .collect(),
                            JsonValue::String(t) => vec![t.clone()],
                            _ => vec![],
                        };
                        ApsDocumentSummary {
                            accession_number: doc["AccessionNumber"]
                                .as_str()
                                .unwrap_or("Unknown")
                                .to_string(),
                            title: doc["DocumentTitle"]
                                .as_str()
                                .or_else(|| doc["Name"].as_str())
                                .unwrap_or("Untitled")
                                .to_string(),
                            document_date: doc["DocumentDate"]
                                .as_str()
                                .or_else(|| doc["DateAdded"].as_str())
                                .unwrap_or_default()
                                .to_string(),
                            doc_types,
                            text_url: doc["TextURL"].as_str().map(String::from),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        let total = data["count"].as_u64().unwrap_or(documents.len() as u64);
        ApsSearchResults { documents, total }
    }

    #[instrument(skip(self), err)]
    pub async fn search(
        &self,
        query: &str,
        doc_type: Option<&str>,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<ApsSearchResults, AppError> {
        let mut filters: Vec<JsonValue> = Vec::new();
        if let Some(doc_type) = doc_type {
            filters.push(json!({
                "field": "DocumentType",
                "value": doc_type,
                "operator": "contains",
            }));
        }
        if let Some(from) = date_from {
            filters.push(json!({
                "field": "DocumentDate",
                "value": format!("(DocumentDate ge '{from}')"),
            }));
        }
        if let Some(to) = date_to {
            filters.push(json!({
                "field": "DocumentDate",
                "value": format!("(DocumentDate le '{to}')"),
            }));
        }

        let data = self
            .post_search(json!({
                "q": query,
                "filters": filters,
                "anyFilters": [],
                "legacyLibFilter": false,
                "mainLibFilter": true,
                "sort": "DocumentDate",
                "sortDirection": 1,
                "skip": 0,
            }))
            .await?;
        Ok(Self::parse_results(&data))
    }

    /// Fetches one document by accession number.
    #[instrument(skip(self), err)]
    pub async fn fetch_document(&self, accession_number: &str) -> Result<FetchedDocument, AppError> {
        let accession = accession_number.trim().to_uppercase();
        let data = self
            .post_search(json!({
                "q": "",
                "filters": [{
                    "field": "AccessionNumber",
                    "value": accession,
                }],
                "anyFilters": [],
                "legacyLibFilter": true,
                "mainLibFilter": true,
                "skip": 0,
            }))
            .await?;
        let results = Self::parse_results(&data);
        let Some(doc) = results
            .documents
            .iter()
            .find(|d| d.accession_number == accession)
            .or_else(|| results.documents.first())
        else {
            return Err(AppError::UpstreamNotFound(format!("ADAMS {accession}")));
        };

        let mut body = format!(
            "## NRC Document: {accession}\n**Title:** {}\n",
            doc.title
        );
        if !doc.document_date.is_empty() {
            body.push_str(&format!("**Document Date:** {}\n", doc.document_date));
        }
        if !doc.doc_types.is_empty() {
            body.push_str(&format!("**Document Type:** {}\n", doc.doc_types.join(", ")));
        }

        match &doc.text_url {
            Some(url) => {
                let text = self.download_text(url).await?;
                body.push_str(&format!("\n### Document Content\n\n{text}"));
            }
            None => {
                body.push_str(
                    "\n*Full text is not available through the API for this document; see ADAMS directly.*",
                );
            }
        }

        Ok(FetchedDocument {
            title: doc.title.clone(),
            body,
            citation: accession.clone(),
            metadata: json!({
                "accession_number": accession,
                "document_date": doc.document_date,
                "document_types": doc.doc_types,
            }),
        })
    }

    async fn download_text(&self, url: &str) -> Result<String, AppError> {
        let api_key = self.api_key()?;
        self.budget.acquire().await;
        info!("Downloading ADAMS document text");
        let response = send_idempotent(
            self.client
                .get(url)
                .header("Ocp-Apim-Subscription-Key", api_key),
        )
        .await?;
        Ok(response.error_for_status()?.text().await?)
    }
}
