//! ClinicalTrials.gov v2 API client.
//!
//! API docs: https://clinicaltrials.gov/data-api/api
//! Endpoint: https://clinicaltrials.gov/api/v2/studies
//!
//! The primary registry. Results are requested sorted by enrollment and
//! paged with `pageSize` / `pageToken` until `max_results` is reached.
//!
//! Attributes: conditions, phase, study_type, status, start_date, sponsor,
//! interventions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use trialscope_common::lookup::join_array;
use trialscope_common::sandbox::SandboxClient as Client;
use trialscope_common::{text, FieldLookup};

use super::{fetch_json, SourceAdapter, SourceError};
use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceId, NO_TITLE};

const CT_BASE_URL: &str = "https://clinicaltrials.gov";
const CT_MAX_PAGE: usize = 1000;
const CT_FIELDS: &str = "NCTId,BriefTitle,OfficialTitle,Condition,BriefSummary,\
                         DetailedDescription,StudyType,Phase,OverallStatus,StartDate,\
                         LeadSponsorName,InterventionName";

pub struct ClinicalTrialsClient {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: String,
}

impl ClinicalTrialsClient {
    pub fn new(client: Client, governor: Arc<RateGovernor>) -> Self {
        Self { client, governor, base_url: CT_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn search_page(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<Value, SourceError> {
        let url = format!("{}/api/v2/studies", self.base_url.trim_end_matches('/'));
        let mut params = vec![
            ("query.cond", query.to_string()),
            ("query.term", query.to_string()),
            ("format",     "json".to_string()),
            ("fields",     CT_FIELDS.to_string()),
            ("pageSize",   page_size.to_string()),
            ("sort",       "EnrollmentCount:desc".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        let request = self.client.get(&url)?.query(&params);
        fetch_json(&self.governor, SourceId::ClinicalTrialsGov, request).await
    }
}

#[async_trait]
impl SourceAdapter for ClinicalTrialsClient {
    fn id(&self) -> SourceId {
        SourceId::ClinicalTrialsGov
    }

    #[instrument(skip(self))]
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        while records.len() < max_results {
            let page_size = (max_results - records.len()).min(CT_MAX_PAGE);
            let page = self.search_page(query, page_size, page_token.as_deref()).await?;

            let studies = page["studies"].as_array().cloned().unwrap_or_default();
            debug!(n = studies.len(), "ClinicalTrials.gov studies retrieved");
            if studies.is_empty() {
                break;
            }
            records.extend(studies.iter().filter_map(parse_study));

            let next = page.lookup("nextPageToken");
            if next.is_none() || next == page_token {
                break;
            }
            page_token = next;
        }

        records.truncate(max_results);
        Ok(records)
    }
}

/// Map one v2 study object; `None` when the item is not a study at all.
fn parse_study(study: &Value) -> Option<NormalizedRecord> {
    let proto = match study.get("protocolSection") {
        Some(p) if p.is_object() => p,
        _ => {
            warn!("Skipping ClinicalTrials.gov item without protocolSection");
            return None;
        }
    };

    let nct_id = proto.lookup("identificationModule/nctId");
    let title = proto
        .first_of(&["identificationModule/briefTitle", "identificationModule/officialTitle"])
        .map(|t| text::sanitize_or(&t, NO_TITLE))
        .unwrap_or_default();

    // briefSummary is a plain string in v2; older payloads nest a textBlock
    let summary = proto.first_of(&[
        "descriptionModule/briefSummary",
        "descriptionModule/briefSummary/textBlock",
        "descriptionModule/detailedDescription",
        "descriptionModule/detailedDescription/textBlock",
    ]);

    let url = nct_id
        .as_ref()
        .map(|id| format!("https://clinicaltrials.gov/study/{}", id))
        .unwrap_or_default();

    Some(
        NormalizedRecord::new(title, url, SourceId::ClinicalTrialsGov.display_name())
            .with_abstract(summary.map(|s| text::sanitize(&s)).unwrap_or_default())
            .with_identifier(nct_id.unwrap_or_default())
            .with_attribute("conditions", join_array(proto, "conditionsModule/conditions", None, ", "))
            .with_attribute("phase", proto.lookup("designModule/phases/0"))
            .with_attribute("study_type", proto.lookup("designModule/studyType"))
            .with_attribute("status", proto.lookup("statusModule/overallStatus"))
            .with_attribute("start_date", proto.lookup("statusModule/startDateStruct/date"))
            .with_attribute("sponsor", proto.lookup("sponsorCollaboratorsModule/leadSponsor/name"))
            .with_attribute(
                "interventions",
                join_array(proto, "armsInterventionsModule/interventions", Some("name"), ", "),
            ),
    )
}
