//! Europe PMC REST API client.
//!
//! Endpoint: https://www.ebi.ac.uk/europepmc/webservices/rest/search
//!
//! Paged with `cursorMark`; `resultType=core` is required for abstracts.
//!
//! Attributes: journal, publication_date, authors, doi.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use trialscope_common::sandbox::SandboxClient as Client;
use trialscope_common::{text, FieldLookup};

use super::{fetch_json, SourceAdapter, SourceError};
use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceId};

const EPMC_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";
const EPMC_MAX_PAGE: usize = 1000;

pub struct EuropePmcClient {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: String,
}

impl EuropePmcClient {
    pub fn new(client: Client, governor: Arc<RateGovernor>) -> Self {
        Self { client, governor, base_url: EPMC_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search_page(&self, query: &str, page_size: usize, cursor: &str) -> Result<Value, SourceError> {
        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let params = [
            ("query",      query.to_string()),
            ("resultType", "core".to_string()),
            ("pageSize",   page_size.to_string()),
            ("cursorMark", cursor.to_string()),
            ("format",     "json".to_string()),
        ];
        let request = self.client.get(&url)?.query(&params);
        fetch_json(&self.governor, SourceId::EuropePmc, request).await
    }
}

#[async_trait]
impl SourceAdapter for EuropePmcClient {
    fn id(&self) -> SourceId {
        SourceId::EuropePmc
    }

    #[instrument(skip(self))]
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut records = Vec::new();
        let mut cursor = "*".to_string();

        while records.len() < max_results {
            let page_size = (max_results - records.len()).min(EPMC_MAX_PAGE);
            let page = self.search_page(query, page_size, &cursor).await?;

            let results = page["resultList"]["result"].as_array().cloned().unwrap_or_default();
            debug!(count = results.len(), "Europe PMC search returned results");
            if results.is_empty() {
                break;
            }
            records.extend(results.iter().filter_map(parse_result));

            match page.lookup("nextCursorMark") {
                Some(next) if next != cursor => cursor = next,
                _ => break,
            }
        }

        records.truncate(max_results);
        Ok(records)
    }
}

fn parse_result(r: &Value) -> Option<NormalizedRecord> {
    if !r.is_object() {
        return None;
    }
    let id = r.first_of(&["pmid", "id"]);
    let url = match (r.lookup("source"), r.lookup("id")) {
        (Some(src), Some(native)) => format!("https://europepmc.org/article/{}/{}", src, native),
        _ => String::new(),
    };

    Some(
        NormalizedRecord::new(
            r.lookup("title").map(|t| text::sanitize(&t)).unwrap_or_default(),
            url,
            SourceId::EuropePmc.display_name(),
        )
        .with_abstract(r.lookup("abstractText").map(|a| text::sanitize(&a)).unwrap_or_default())
        .with_identifier(id.unwrap_or_default())
        .with_attribute("journal", r.first_of(&["journalTitle", "journalInfo/journal/title"]))
        .with_attribute("publication_date", r.first_of(&["firstPublicationDate", "pubYear"]))
        .with_attribute("authors", r.lookup("authorString"))
        .with_attribute("doi", r.lookup("doi")),
    )
}
