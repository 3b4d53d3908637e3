// backend/src/clients/ecfr.rs
//
// eCFR versioner API adapter. Sections are fetched as XML for a concrete
// issue date and reduced to markdown-ish text.

use crate::clients::{FetchedDocument, RateBudget, send_idempotent};
use crate::config::Config;
use crate::errors::AppError;
use reqwest::Client as ReqwestClient;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, instrument};

pub struct EcfrClient {
    client: ReqwestClient,
    base_url: String,
    budget: RateBudget,
}

impl EcfrClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.ecfr_api_base_url.trim_end_matches('/').to_string(),
            budget: RateBudget::new(5),
        })
    }

    /// Latest available issue date for a CFR title, `YYYY-MM-DD`.
    #[instrument(skip(self), err)]
    pub async fn latest_date(&self, title: u32) -> Result<String, AppError> {
        self.budget.acquire().await;
        let response = send_idempotent(
            self.client
                .get(format!("{}/titles.json", self.base_url)),
        )
        .await?;
        let body: serde_json::Value = response.error_for_status()?.json().await?;

        body["titles"]
            .as_array()
            .and_then(|titles| {
                titles
                    .iter()
                    .find(|t| t["number"].as_u64() == Some(u64::from(title)))
            })
            .and_then(|t| t["latest_issue_date"].as_str())
            .map(String::from)
            .ok_or_else(|| {
                error!("No latest issue date for title {title}");
                AppError::UpstreamNotFound(format!("eCFR title {title}"))
            })
    }

    /// Fetches one section's full text. `section` must already be the base
    /// number (subsection references stripped).
    #[instrument(skip(self), err)]
    pub async fn fetch_section(
        &self,
        title: u32,
        part: u32,
        section: &str,
        date: Option<&str>,
    ) -> Result<FetchedDocument, AppError> {
        let date = match date {
            Some(d) => d.to_string(),
            None => self.latest_date(title).await?,
        };

        let url = format!("{}/full/{date}/title-{title}.xml", self.base_url);
        info!("Fetching CFR: Title {title}, Part {part}, Section {section}");

        self.budget.acquire().await;
        let response = send_idempotent(
            self.client
                .get(&url)
                .query(&[("part", part.to_string()), ("section", format!("{part}.{section}"))]),
        )
        .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::UpstreamNotFound(format!(
                "{title} CFR {part}.{section}"
            )));
        }
        let xml = response.error_for_status()?.text().await?;

        let doc_title = format!("{title} CFR §{part}.{section}");
        let body = format!("## {doc_title}\n\n{}", extract_text_from_xml(&xml));

        Ok(FetchedDocument {
            title: doc_title.clone(),
            body,
            citation: doc_title,
            metadata: json!({
                "title": title,
                "part": part,
                "section": section,
                "date": date,
            }),
        })
    }
}

/// Reduces eCFR XML to readable text: paragraph tags become line breaks,
/// headings and section labels keep light markdown emphasis, everything else
/// is stripped and entities decoded.
pub fn extract_text_from_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 2);
    let mut rest = xml;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        let name = tag
            .trim_start_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        let closing = tag.starts_with('/');
        match (name.as_str(), closing) {
            ("P", false) => out.push('\n'),
            ("HD", false) => out.push_str("\n**"),
            ("HD", true) => out.push_str("**\n"),
            ("SECTNO", false) | ("SECTNO", true) => out.push_str("**"),
            ("SUBJECT", false) => out.push('*'),
            ("SUBJECT", true) => out.push_str("*\n"),
            _ => {}
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);

    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#8212;", "—")
        .replace("&sect;", "§");

    // Collapse runs of blank lines.
    let mut cleaned = String::with_capacity(decoded.len());
    let mut blank_run = 0;
    for line in decoded.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            cleaned.push('\n');
        } else {
            blank_run = 0;
            cleaned.push_str(line.trim_end());
            cleaned.push('\n');
        }
    }
    cleaned.trim().to_string()
}
