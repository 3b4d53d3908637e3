// backend/src/clients/drs.rs
//
// FAA Dynamic Regulatory System adapter. Search is a filtered data-pull;
// fetching a document means searching by its number, picking the best match,
// and extracting text from the attached PDF.

use crate::clients::{FetchedDocument, RateBudget, send_idempotent};
use crate::config::Config;
use crate::errors::AppError;
use crate::pdf::PdfExtractor;
use reqwest::Client as ReqwestClient;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DrsDocumentSummary {
    pub document_number: String,
    pub title: String,
    pub status: String,
    pub guid: String,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DrsSearchResults {
    pub documents: Vec<DrsDocumentSummary>,
    pub total: u64,
}

pub struct DrsClient {
    client: ReqwestClient,
    base_url: String,
    api_key: Option<String>,
    pdf: Arc<dyn PdfExtractor>,
    budget: RateBudget,
}

impl DrsClient {
    pub fn new(config: &Config, pdf: Arc<dyn PdfExtractor>) -> Result<Self, AppError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.drs_api_base_url.trim_end_matches('/').to_string(),
            api_key: config.drs_api_key.clone(),
            pdf,
            budget: RateBudget::new(2),
        })
    }

    fn api_key(&self) -> Result<&str, AppError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AppError::ConfigError("DRS_API_KEY not configured".to_string()))
    }

    async fn data_pull(
        &self,
        doc_type: &str,
        keywords: &[String],
        status_filter: &[String],
    ) -> Result<JsonValue, AppError> {
        let api_key = self.api_key()?;
        self.budget.acquire().await;

        let keywords: Vec<&String> = keywords.iter().take(10).collect();
        let response = self
            .client
            .post(format!("{}/data-pull/{doc_type}/filtered", self.base_url))
            .header("x-api-key", api_key)
            .json(&json!({
                "offset": 0,
                "documentFilters": {
                    "drs:status": status_filter,
                    "Keyword": keywords,
                },
            }))
            .send()
            .await?;
        Ok(response.error_for_status()?.json().await?)
    }

    fn parse_summaries(data: &JsonValue) -> DrsSearchResults {
        let documents = data["documents"]
            .as_array()
            .map(|docs| {
                docs.iter()
                    .map(|doc| DrsDocumentSummary {
                        document_number: doc["drs:documentNumber"]
                            .as_str()
                            .unwrap_or("Unknown")
                            .to_string(),
                        title: doc["drs:title"].as_str().unwrap_or_default().to_string(),
                        status: doc["drs:status"].as_str().unwrap_or_default().to_string(),
                        guid: doc["documentGuid"].as_str().unwrap_or_default().to_string(),
                        download_url: doc["mainDocumentDownloadURL"]
                            .as_str()
                            .map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let total = data["summary"]["totalItems"].as_u64().unwrap_or(0);
        DrsSearchResults { documents, total }
    }

    #[instrument(skip(self), fields(keyword_count = keywords.len()), err)]
    pub async fn search(
        &self,
        keywords: &[String],
        doc_type: &str,
        status_filter: &[String],
    ) -> Result<DrsSearchResults, AppError> {
        let data = self.data_pull(doc_type, keywords, status_filter).await?;
        Ok(Self::parse_summaries(&data))
    }

    /// Fetches one document by number: search by keyword, pick the best
    /// match, download the attachment, extract text.
    #[instrument(skip(self), err)]
    pub async fn fetch_document(
        &self,
        doc_number: &str,
        doc_type: &str,
    ) -> Result<FetchedDocument, AppError> {
        let data = self
            .data_pull(
                doc_type,
                &[doc_number.to_string()],
                &["Current".to_string()],
            )
            .await?;
        let results = Self::parse_summaries(&data);

        if results.documents.is_empty() {
            return Err(AppError::UpstreamNotFound(format!(
                "{doc_type}/{doc_number}"
            )));
        }

        let wanted = normalize_doc_number(doc_number);
        let wanted_base = base_doc_number(&wanted);
        let best = results
            .documents
            .iter()
            .find(|doc| normalize_doc_number(&doc.document_number) == wanted)
            .or_else(|| {
                results.documents.iter().find(|doc| {
                    base_doc_number(&normalize_doc_number(&doc.document_number)) == wanted_base
                })
            })
            .or_else(|| {
                results
                    .documents
                    .iter()
                    .find(|doc| normalize_doc_number(&doc.document_number).starts_with(&wanted))
            })
            .unwrap_or_else(|| {
                warn!(
                    "No exact DRS match for {doc_number}, using {}",
                    results.documents[0].document_number
                );
                &results.documents[0]
            });

        let mut body = format!("## {doc_type} {}\n**Title:** {}\n", best.document_number, best.title);
        if !best.status.is_empty() {
            body.push_str(&format!("**Status:** {}\n", best.status));
        }

        match &best.download_url {
            Some(url) => match self.download_and_extract(url).await {
                Ok(text) => {
                    body.push_str(&format!("\n### Document Content\n\n{text}"));
                }
                Err(e) => {
                    warn!(error = %e, "Could not extract DRS attachment text");
                    body.push_str(&format!(
                        "\n**Download URL available:** Yes (GUID: {})\n\n*Could not extract text from PDF automatically.*",
                        best.guid
                    ));
                }
            },
            None => body.push_str("\n*No download URL available for this document.*"),
        }

        Ok(FetchedDocument {
            title: best.title.clone(),
            body,
            citation: format!("{doc_type} {}", best.document_number),
            metadata: json!({
                "doc_type": doc_type,
                "doc_number": best.document_number,
                "status": best.status,
                "guid": best.guid,
            }),
        })
    }

    async fn download_and_extract(&self, download_url: &str) -> Result<String, AppError> {
        let api_key = self.api_key()?;
        self.budget.acquire().await;
        info!("Downloading PDF from DRS");
        let response = send_idempotent(
            self.client.get(download_url).header("x-api-key", api_key),
        )
        .await?;
        let bytes = response.error_for_status()?.bytes().await?;
        let (text, pages) = self.pdf.extract_text(&bytes)?;
        info!("Extracted {} characters from {pages} pages", text.len());
        if text.trim().is_empty() {
            return Err(AppError::ToolFailure("empty PDF extraction".to_string()));
        }
        Ok(text.trim().to_string())
    }
}

/// Uppercases, collapses whitespace, and ensures a space after the type
/// prefix so `AC25.1309-1A` and `AC 25.1309-1A` compare equal.
pub fn normalize_doc_number(doc_num: &str) -> String {
    let mut normalized = doc_num
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    for prefix in ["AC", "AD", "TSO", "ORDER"] {
        if let Some(rest) = normalized.strip_prefix(prefix) {
            if !rest.is_empty() && !rest.starts_with(' ') {
                normalized = format!("{prefix} {}", rest.trim_start());
            }
            break;
        }
    }
    normalized.trim().to_string()
}

/// Base number without CHG / Ed Update suffixes.
pub fn base_doc_number(doc_num: &str) -> String {
    let normalized = normalize_doc_number(doc_num);
    let upper = normalized.to_uppercase();
    for marker in [" CHG", " CHANGE", " ED UPDATE"] {
        if let Some(pos) = upper.find(marker) {
            return normalized[..pos].trim().to_string();
        }
    }
    normalized
}
