//! Data models shared by every pipeline stage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trialscope_common::NOT_AVAILABLE;

pub const NO_TITLE: &str = "No title";
pub const NO_ABSTRACT: &str = "No abstract available";
pub const UNKNOWN_SOURCE: &str = "Unknown source";

/// Identifies one external source. Declaration order is invocation order,
/// and therefore the duplicate tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    ClinicalTrialsGov,
    Isrctn,
    PubMed,
    EuropePmc,
}

/// Gate under which a source is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCategory {
    /// Primary study registry; always allowed.
    Registry,
    /// Non-US registries, behind `include_international`.
    International,
    /// Literature databases, behind `include_academic`.
    Academic,
}

impl SourceId {
    pub const ALL: [SourceId; 4] = [
        SourceId::ClinicalTrialsGov,
        SourceId::Isrctn,
        SourceId::PubMed,
        SourceId::EuropePmc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::ClinicalTrialsGov => "clinicaltrials_gov",
            SourceId::Isrctn            => "isrctn",
            SourceId::PubMed            => "pubmed",
            SourceId::EuropePmc         => "europepmc",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::ClinicalTrialsGov => "ClinicalTrials.gov",
            SourceId::Isrctn            => "ISRCTN Registry",
            SourceId::PubMed            => "PubMed",
            SourceId::EuropePmc         => "Europe PMC",
        }
    }

    pub fn category(&self) -> SourceCategory {
        match self {
            SourceId::ClinicalTrialsGov => SourceCategory::Registry,
            SourceId::Isrctn            => SourceCategory::International,
            SourceId::PubMed | SourceId::EuropePmc => SourceCategory::Academic,
        }
    }

    /// Position in the fixed invocation order.
    pub fn rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '.'], "_").as_str() {
            "clinicaltrials_gov" | "clinicaltrials" | "ctgov" => Ok(SourceId::ClinicalTrialsGov),
            "isrctn"                                         => Ok(SourceId::Isrctn),
            "pubmed"                                         => Ok(SourceId::PubMed),
            "europepmc" | "europe_pmc" | "epmc"              => Ok(SourceId::EuropePmc),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// Three-way relevance label assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelevanceClass {
    HighlyRelevant,
    Relevant,
    LessRelevant,
}

impl RelevanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelevanceClass::HighlyRelevant => "Highly Relevant",
            RelevanceClass::Relevant       => "Relevant",
            RelevanceClass::LessRelevant   => "Less Relevant",
        }
    }

    /// Lenient label parsing: case, spacing, `_` and `-` are ignored.
    pub fn parse_label(label: &str) -> Option<Self> {
        let key: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match key.as_str() {
            "highlyrelevant" => Some(RelevanceClass::HighlyRelevant),
            "relevant"       => Some(RelevanceClass::Relevant),
            "lessrelevant"   => Some(RelevanceClass::LessRelevant),
            _ => None,
        }
    }
}

/// Complete classification outcome for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relevance {
    pub score: u8,
    pub classification: RelevanceClass,
    pub confidence: u8,
    pub reasoning: Option<String>,
}

impl Relevance {
    /// Scores and confidences are clamped into 0..=100.
    pub fn new(score: i64, classification: RelevanceClass, confidence: i64, reasoning: Option<String>) -> Self {
        Self {
            score: score.clamp(0, 100) as u8,
            classification,
            confidence: confidence.clamp(0, 100) as u8,
            reasoning,
        }
    }
}

/// One study or paper in the common schema every adapter produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub title: String,
    pub url: String,
    pub source: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub identifier: String,
    pub attributes: BTreeMap<String, String>,
    pub relevance: Option<Relevance>,
}

impl NormalizedRecord {
    /// Empty inputs are replaced by their sentinels so the required fields
    /// are never blank.
    pub fn new(title: impl Into<String>, url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: or_sentinel(title.into(), NO_TITLE),
            url: or_sentinel(url.into(), NOT_AVAILABLE),
            source: or_sentinel(source.into(), UNKNOWN_SOURCE),
            abstract_text: NO_ABSTRACT.to_string(),
            identifier: NOT_AVAILABLE.to_string(),
            attributes: BTreeMap::new(),
            relevance: None,
        }
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = or_sentinel(text.into(), NO_ABSTRACT);
        self
    }

    pub fn with_identifier(mut self, id: impl Into<String>) -> Self {
        self.identifier = or_sentinel(id.into(), NOT_AVAILABLE);
        self
    }

    /// Absent or blank values are not stored.
    pub fn with_attribute(mut self, key: &str, value: Option<String>) -> Self {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            self.attributes.insert(key.to_string(), v);
        }
        self
    }

    /// Copy of this record carrying `relevance`.
    pub fn with_relevance(&self, relevance: Relevance) -> Self {
        Self { relevance: Some(relevance), ..self.clone() }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn score(&self) -> u8 {
        self.relevance.as_ref().map(|r| r.score).unwrap_or(0)
    }
}

fn or_sentinel(value: String, sentinel: &str) -> String {
    if value.trim().is_empty() { sentinel.to_string() } else { value }
}

/// Per-run configuration of one adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub source: SourceId,
    pub enabled: bool,
    /// Upper bound on records requested from the source.
    pub max_results: usize,
    /// Minimum spacing between successive calls issued by this adapter.
    pub min_delay: Duration,
}

impl SourceConfig {
    pub fn new(source: SourceId, max_results: usize, min_delay: Duration) -> Self {
        Self { source, enabled: true, max_results, min_delay }
    }
}
