//! Configuration loading for TrialScope.
//! Reads trialscope.toml from the current directory or the path in the
//! TRIALSCOPE_CONFIG env var. Every section and field is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trialscope_ingestion::{GovernorConfig, LlmSettings};
use trialscope_llm::BackendKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub governor: GovernorSettings,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default)]
    pub include_academic: bool,
    #[serde(default)]
    pub include_international: bool,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default = "default_output")]
    pub output: String,
}

fn default_max_results() -> usize { 20 }
fn default_output()      -> String { "trialscope_results.csv".to_string() }

fn default_sources() -> Vec<String> {
    vec![
        "clinicaltrials_gov".to_string(),
        "isrctn".to_string(),
        "pubmed".to_string(),
        "europepmc".to_string(),
    ]
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            sources: default_sources(),
            include_academic: false,
            include_international: false,
            concurrent: false,
            output: default_output(),
        }
    }
}

/// Pacing and timeouts, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorSettings {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_inter_source_delay_ms")]
    pub inter_source_delay_ms: u64,
    #[serde(default = "default_intra_source_delay_ms")]
    pub intra_source_delay_ms: u64,
    #[serde(default = "default_classifier_batch_size")]
    pub classifier_batch_size: usize,
    #[serde(default = "default_classifier_batch_pause_ms")]
    pub classifier_batch_pause_ms: u64,
}

fn default_request_timeout_ms()        -> u64   { 30_000 }
fn default_inter_source_delay_ms()     -> u64   { 500 }
fn default_intra_source_delay_ms()     -> u64   { 1_000 }
fn default_classifier_batch_size()     -> usize { 5 }
fn default_classifier_batch_pause_ms() -> u64   { 1_000 }

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            inter_source_delay_ms: default_inter_source_delay_ms(),
            intra_source_delay_ms: default_intra_source_delay_ms(),
            classifier_batch_size: default_classifier_batch_size(),
            classifier_batch_pause_ms: default_classifier_batch_pause_ms(),
        }
    }
}

impl GovernorSettings {
    pub fn to_governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            request_timeout:        Duration::from_millis(self.request_timeout_ms),
            inter_source_delay:     Duration::from_millis(self.inter_source_delay_ms),
            intra_source_delay:     Duration::from_millis(self.intra_source_delay_ms),
            classifier_batch_size:  self.classifier_batch_size.max(1),
            classifier_batch_pause: Duration::from_millis(self.classifier_batch_pause_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_model() -> String { LlmSettings::default().model }

impl Default for LlmConfig {
    fn default() -> Self {
        Self { backend: BackendKind::default(), model: default_model(), base_url: None }
    }
}

impl LlmConfig {
    pub fn settings(&self) -> LlmSettings {
        LlmSettings {
            backend: self.backend,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// Environment variable holding the credential for the configured
    /// backend; local backends need none.
    pub fn credential_env(&self) -> Option<&'static str> {
        match self.backend {
            BackendKind::Anthropic => Some("TRIALSCOPE_ANTHROPIC_API_KEY"),
            BackendKind::OpenAi    => Some("TRIALSCOPE_OPENAI_API_KEY"),
            BackendKind::Ollama    => None,
        }
    }
}


impl Config {
    /// Load configuration from trialscope.toml.
    /// Checks TRIALSCOPE_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("TRIALSCOPE_CONFIG")
            .unwrap_or_else(|_| "trialscope.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// A missing file yields the defaults; an unreadable or invalid one is
    /// an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
