//! End-to-end search pipeline.
//!
//! Orchestrates one run:
//!   1. Validate the request
//!   2. Build the per-run `SourceConfig` list from the caller's options
//!   3. Search each enabled source (ClinicalTrials.gov, ISRCTN, PubMed, Europe PMC)
//!   4. Drop near-duplicate titles
//!   5. Classify relevance through the reasoning service (or defaults)
//!   6. Rank by score
//!   7. Emit progress events via broadcast channel
//!
//! A run never fails after validation: source and classifier problems end
//! up in the `RunReport`, and cancellation returns whatever was gathered.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use trialscope_common::sandbox::SandboxClient;
use trialscope_common::TrialScopeError;
use trialscope_llm::{build_backend, BackendKind, LlmBackend};
use uuid::Uuid;

use crate::aggregator::{AggregationMode, Aggregator};
use crate::classifier::Classifier;
use crate::dedup::dedupe;
use crate::governor::{GovernorConfig, RateGovernor};
use crate::models::{NormalizedRecord, SourceCategory, SourceConfig, SourceId};
use crate::progress::{Progress, ProgressEvent, Stage};
use crate::ranker::rank;
use crate::report::RunReport;
use crate::sources::{default_adapters, SourceAdapter};

// ── Request ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Parameters for a single search run.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
    pub enabled_sources: BTreeSet<SourceId>,
    pub include_academic: bool,
    pub include_international: bool,
    pub ai_enabled: bool,
    pub ai_credential: Option<SecretString>,
}

impl SearchRequest {
    /// Every source enabled, both optional categories off, AI off.
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
            enabled_sources: SourceId::ALL.into_iter().collect(),
            include_academic: false,
            include_international: false,
            ai_enabled: false,
            ai_credential: None,
        }
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.query.trim().is_empty() {
            return Err(PipelineError::InvalidInput("query must not be empty".into()));
        }
        if self.max_results == 0 {
            return Err(PipelineError::InvalidInput("max_results must be at least 1".into()));
        }
        Ok(())
    }

    fn category_allowed(&self, category: SourceCategory) -> bool {
        match category {
            SourceCategory::Registry      => true,
            SourceCategory::International => self.include_international,
            SourceCategory::Academic      => self.include_academic,
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutput {
    /// Deduplicated, classified records, highest score first.
    pub records: Vec<NormalizedRecord>,
    pub report: RunReport,
}

/// Which reasoning backend to build when a run asks for AI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    pub backend: BackendKind,
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Anthropic,
            model: "claude-3-5-haiku-latest".to_string(),
            base_url: None,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    aggregator: Aggregator,
    governor: Arc<RateGovernor>,
    llm: LlmSettings,
    backend: Option<Arc<dyn LlmBackend>>,
    progress_tx: Option<broadcast::Sender<ProgressEvent>>,
}

impl Pipeline {
    /// Production pipeline with the built-in adapters.
    pub fn new(config: GovernorConfig) -> Result<Self, TrialScopeError> {
        let client = SandboxClient::with_timeout(config.request_timeout)?;
        let governor = Arc::new(RateGovernor::new(config));
        let adapters = default_adapters(&client, &governor);
        Ok(Self::with_adapters(adapters, governor))
    }

    pub fn with_adapters(adapters: Vec<Arc<dyn SourceAdapter>>, governor: Arc<RateGovernor>) -> Self {
        Self {
            aggregator: Aggregator::new(adapters, governor.clone()),
            governor,
            llm: LlmSettings::default(),
            backend: None,
            progress_tx: None,
        }
    }

    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.aggregator = self.aggregator.with_mode(mode);
        self
    }

    pub fn with_llm(mut self, llm: LlmSettings) -> Self {
        self.llm = llm;
        self
    }

    /// Use `backend` for every AI-enabled run instead of building one from
    /// `LlmSettings` and the request credential.
    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_progress(mut self, tx: broadcast::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// One config per source in invocation order. Academic sources are
    /// capped at a third of `max_results` (at least one).
    pub fn source_configs(&self, request: &SearchRequest) -> Vec<SourceConfig> {
        let min_delay = self.governor.config().intra_source_delay;
        SourceId::ALL
            .iter()
            .map(|&id| {
                let cap = match id.category() {
                    SourceCategory::Academic => (request.max_results / 3).max(1),
                    _ => request.max_results,
                };
                let mut cfg = SourceConfig::new(id, cap, min_delay);
                cfg.enabled = request.enabled_sources.contains(&id) && request.category_allowed(id.category());
                cfg
            })
            .collect()
    }

    fn resolve_backend(&self, request: &SearchRequest) -> Option<Arc<dyn LlmBackend>> {
        if !request.ai_enabled {
            return None;
        }
        if let Some(ref b) = self.backend {
            return Some(b.clone());
        }
        build_backend(
            self.llm.backend,
            &self.llm.model,
            request.ai_credential.clone(),
            self.llm.base_url.as_deref(),
        )
    }

    #[instrument(skip(self, request, cancel), fields(query = %request.query))]
    pub async fn run(
        &self,
        request: SearchRequest,
        cancel: CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        request.validate()?;

        let t0 = Instant::now();
        let run_id = Uuid::new_v4();
        let query = request.query.trim().to_string();
        let progress = Progress::new(run_id, self.progress_tx.clone());
        let mut report = RunReport::new(run_id, &query);

        info!(run_id = %run_id, max_results = request.max_results, ai = request.ai_enabled, "Starting search run");
        progress.emit(Stage::Search, format!("Searching with query: {query}"), 0);

        // ── 1. Collect records from all enabled sources ──────────────────────
        let configs = self.source_configs(&request);
        let aggregation = self.aggregator.collect(&query, &configs, &progress, &cancel).await;
        report.sources = aggregation.reports;
        report.total_before_dedup = aggregation.records.len();

        // ── 2. Deduplicate ───────────────────────────────────────────────────
        let unique = dedupe(aggregation.records);
        report.total_after_dedup = unique.len();
        progress.emit(
            Stage::Dedup,
            format!("{} unique of {} records", unique.len(), report.total_before_dedup),
            unique.len(),
        );

        // ── 3. Classify ──────────────────────────────────────────────────────
        let classifier = Classifier::new(self.resolve_backend(&request), self.governor.clone());
        let (classified, mode) = classifier
            .classify(unique, &query, request.ai_enabled, &progress, &cancel)
            .await;
        report.classification_mode = mode;

        // ── 4. Rank ──────────────────────────────────────────────────────────
        let records = rank(classified);
        progress.emit(Stage::Rank, "Ranked by relevance score", records.len());

        report.cancelled = cancel.is_cancelled();
        report.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            n = records.len(),
            mode = ?report.classification_mode,
            cancelled = report.cancelled,
            elapsed_ms = report.duration_ms,
            "Search run complete"
        );
        progress.emit(Stage::Done, "Search run complete", records.len());

        Ok(PipelineOutput { records, report })
    }
}
