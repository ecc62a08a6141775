//! ISRCTN registry client.
//!
//! Endpoint: https://www.isrctn.com/api/query/format/default?q=…&limit=…
//!
//! The response is namespaced XML (`<allTrials><fullTrial>…`). Each
//! `fullTrial` is flattened into an element-path → text map (repeated
//! elements joined with `; `) and read through `FieldLookup`.
//!
//! Attributes: conditions, phase, study_type, status, start_date, sponsor,
//! interventions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, instrument, warn};
use trialscope_common::sandbox::SandboxClient as Client;
use trialscope_common::{text, FieldLookup};

use super::{fetch_text, SourceAdapter, SourceError};
use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceId};

const ISRCTN_BASE_URL: &str = "https://www.isrctn.com";

type TrialFields = HashMap<String, String>;

pub struct IsrctnClient {
    client: Client,
    governor: Arc<RateGovernor>,
    base_url: String,
}

impl IsrctnClient {
    pub fn new(client: Client, governor: Arc<RateGovernor>) -> Self {
        Self { client, governor, base_url: ISRCTN_BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for IsrctnClient {
    fn id(&self) -> SourceId {
        SourceId::Isrctn
    }

    #[instrument(skip(self))]
    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        let url = format!("{}/api/query/format/default", self.base_url.trim_end_matches('/'));
        let params = [("q", query.to_string()), ("limit", max_results.to_string())];
        let request = self.client.get(&url)?.query(&params);
        let xml = fetch_text(&self.governor, SourceId::Isrctn, request).await?;

        let mut records: Vec<NormalizedRecord> = flatten_trials(&xml)?
            .iter()
            .filter_map(trial_to_record)
            .collect();
        debug!(n = records.len(), "ISRCTN trials parsed");

        records.truncate(max_results);
        Ok(records)
    }
}

/// Split the response into one flattened map per `fullTrial`. Paths are
/// relative to the `fullTrial` element and use local names only.
fn flatten_trials(xml: &str) -> Result<Vec<TrialFields>, SourceError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut trials = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<(usize, TrialFields)> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                stack.push(name);
                if current.is_none() && stack.last().map(String::as_str) == Some("fullTrial") {
                    current = Some((stack.len(), HashMap::new()));
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some((base, ref mut fields)) = current {
                    if stack.len() > base {
                        let value = e.unescape().map(|t| t.into_owned()).unwrap_or_default();
                        let path = stack[base..].join("/");
                        fields
                            .entry(path)
                            .and_modify(|v| {
                                v.push_str("; ");
                                v.push_str(&value);
                            })
                            .or_insert(value);
                    }
                }
            }
            Ok(Event::End(_)) => {
                if let Some((base, _)) = current {
                    if stack.len() == base {
                        if let Some((_, fields)) = current.take() {
                            trials.push(fields);
                        }
                    }
                }
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) if trials.is_empty() => {
                return Err(SourceError::Malformed(format!("ISRCTN XML: {e}")));
            }
            Err(e) => {
                warn!("ISRCTN XML parse error after {} trials: {}", trials.len(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(trials)
}

fn trial_to_record(t: &TrialFields) -> Option<NormalizedRecord> {
    let Some(number) = t.lookup("trial/isrctn") else {
        warn!("Skipping ISRCTN trial without registration number");
        return None;
    };
    let id = if number.starts_with("ISRCTN") { number } else { format!("ISRCTN{}", number) };

    let title = t
        .first_of(&["trial/trialDescription/title", "trial/trialDescription/scientificTitle"])
        .map(|s| text::sanitize(&s))
        .unwrap_or_default();
    let summary = t
        .first_of(&[
            "trial/trialDescription/plainEnglishSummary",
            "trial/trialDescription/studyHypothesis",
        ])
        .map(|s| text::sanitize(&s))
        .unwrap_or_default();

    Some(
        NormalizedRecord::new(title, format!("https://www.isrctn.com/{}", id), SourceId::Isrctn.display_name())
            .with_abstract(summary)
            .with_identifier(id)
            .with_attribute("conditions", t.lookup("trial/conditions/condition/description"))
            .with_attribute("phase", t.lookup("trial/interventions/intervention/phase"))
            .with_attribute("study_type", t.lookup("trial/trialDesign/primaryStudyDesign"))
            .with_attribute(
                "status",
                t.first_of(&["trial/trialDesign/overallStatusOverride", "trial/participants/recruitmentStatusOverride"]),
            )
            .with_attribute(
                "start_date",
                t.first_of(&["trial/trialDesign/overallStartDate", "trial/participants/recruitmentStart"]),
            )
            .with_attribute("sponsor", t.lookup("sponsor/organisation"))
            .with_attribute("interventions", t.lookup("trial/interventions/intervention/description")),
    )
}
