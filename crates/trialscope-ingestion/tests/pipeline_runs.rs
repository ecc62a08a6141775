//! End-to-end pipeline runs over in-process adapters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use trialscope_ingestion::{
    ClassificationMode, GovernorConfig, NormalizedRecord, Pipeline, PipelineError, RateGovernor,
    RelevanceClass, SearchRequest, SourceAdapter, SourceError, SourceId, SourceStatus, Stage,
};
use trialscope_llm::{LlmBackend, LlmError, LlmRequest, LlmResponse};

// ── Fakes ─────────────────────────────────────────────────────────────────────

struct Canned {
    id: SourceId,
    titles: Vec<&'static str>,
    delay: Duration,
    calls: AtomicUsize,
}

impl Canned {
    fn new(id: SourceId, titles: &[&'static str]) -> Arc<Self> {
        Self::slow(id, titles, Duration::ZERO)
    }

    fn slow(id: SourceId, titles: &[&'static str], delay: Duration) -> Arc<Self> {
        Arc::new(Self { id, titles: titles.to_vec(), delay, calls: AtomicUsize::new(0) })
    }
}

#[async_trait]
impl SourceAdapter for Canned {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn fetch(&self, _query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(self
            .titles
            .iter()
            .take(max_results)
            .enumerate()
            .map(|(i, t)| {
                NormalizedRecord::new(*t, format!("https://example.org/{}/{}", self.id, i), self.id.display_name())
            })
            .collect())
    }
}

struct AlwaysFails(SourceId);

#[async_trait]
impl SourceAdapter for AlwaysFails {
    fn id(&self) -> SourceId {
        self.0
    }

    async fn fetch(&self, _query: &str, _max: usize) -> Result<Vec<NormalizedRecord>, SourceError> {
        Err(SourceError::Status(500))
    }
}

struct FixedVerdict(&'static str);

#[async_trait]
impl LlmBackend for FixedVerdict {
    async fn complete(&self, _req: LlmRequest) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse { content: self.0.to_string(), model: "fixed".into(), prompt_tokens: 10, completion_tokens: 10 })
    }
    fn model_id(&self) -> &str { "fixed" }
    fn backend_name(&self) -> &'static str { "fixed" }
    fn is_local(&self) -> bool { true }
}

fn governor() -> Arc<RateGovernor> {
    Arc::new(RateGovernor::new(GovernorConfig::immediate()))
}

fn everything(query: &str, max: usize) -> SearchRequest {
    let mut req = SearchRequest::new(query, max);
    req.include_academic = true;
    req.include_international = true;
    req
}

fn assert_complete(records: &[NormalizedRecord]) {
    for r in records {
        assert!(!r.title.is_empty() && !r.url.is_empty() && !r.source.is_empty());
        let rel = r.relevance.as_ref().expect("every record is classified");
        assert!(rel.score <= 100 && rel.confidence <= 100);
    }
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_diabetes_two_sources_with_cross_source_duplicate() {
    let pipeline = Pipeline::with_adapters(
        vec![
            Canned::new(SourceId::ClinicalTrialsGov, &[
                "Metformin Monotherapy in Type 2 Diabetes",
                "Insulin Glargine Titration Study",
                "Exercise Intervention for Prediabetes",
            ]),
            Canned::new(SourceId::PubMed, &[
                "Continuous Glucose Monitoring in Adolescents",
                "metformin monotherapy in type 2 diabetes",
                "Dietary Fibre and Glycaemic Control",
            ]),
        ],
        governor(),
    );

    let mut req = SearchRequest::new("diabetes", 9);
    req.include_academic = true;
    req.enabled_sources = [SourceId::ClinicalTrialsGov, SourceId::PubMed].into_iter().collect();

    let out = pipeline.run(req, CancellationToken::new()).await.unwrap();

    assert_eq!(out.records.len(), 5);
    assert!(out.records.iter().all(|r| r.score() == 75));
    assert_eq!(out.records[0].title, "Metformin Monotherapy in Type 2 Diabetes");
    assert_eq!(out.records[0].source, "ClinicalTrials.gov");
    assert_eq!(out.records[3].title, "Continuous Glucose Monitoring in Adolescents");
    assert_eq!(out.report.total_before_dedup, 6);
    assert_eq!(out.report.total_after_dedup, 5);
    assert_eq!(out.report.classification_mode, ClassificationMode::Fallback);
    assert!(!out.report.cancelled);
    assert_complete(&out.records);
}

#[tokio::test]
async fn test_failing_source_is_isolated() {
    let pipeline = Pipeline::with_adapters(
        vec![
            Canned::new(SourceId::ClinicalTrialsGov, &["Trial A", "Trial B"]),
            Arc::new(AlwaysFails(SourceId::Isrctn)),
            Canned::new(SourceId::PubMed, &["Paper C"]),
            Canned::new(SourceId::EuropePmc, &["Paper D", "Paper E"]),
        ],
        governor(),
    );

    let out = pipeline.run(everything("asthma", 6), CancellationToken::new()).await.unwrap();

    assert_eq!(out.report.total_before_dedup, 5);
    let failed: Vec<_> = out.report.failed_sources().map(|s| s.source).collect();
    assert_eq!(failed, vec![SourceId::Isrctn]);
    assert_eq!(out.report.source(SourceId::Isrctn).unwrap().returned, 0);
    assert!(out.report.source(SourceId::PubMed).unwrap().succeeded());
    assert_complete(&out.records);
}

#[tokio::test]
async fn test_fallback_is_deterministic() {
    let pipeline = Pipeline::with_adapters(
        vec![Canned::new(SourceId::ClinicalTrialsGov, &["One", "Two", "Three"])],
        governor(),
    );

    let first = pipeline.run(SearchRequest::new("copd", 3), CancellationToken::new()).await.unwrap();
    let second = pipeline.run(SearchRequest::new("copd", 3), CancellationToken::new()).await.unwrap();

    let verdicts = |out: &trialscope_ingestion::PipelineOutput| {
        out.records
            .iter()
            .map(|r| r.relevance.clone().unwrap())
            .map(|rel| (rel.score, rel.classification, rel.confidence))
            .collect::<Vec<_>>()
    };
    assert_eq!(verdicts(&first), verdicts(&second));
    assert!(verdicts(&first).iter().all(|v| *v == (75, RelevanceClass::Relevant, 75)));
}

#[tokio::test]
async fn test_live_classification_reorders_by_score() {
    let pipeline = Pipeline::with_adapters(
        vec![Canned::new(SourceId::ClinicalTrialsGov, &["Low", "High"])],
        governor(),
    )
    .with_backend(Arc::new(FixedVerdict(
        r#"{"relevance_score": 88, "classification": "Highly Relevant", "confidence": 90, "reasoning": "ok"}"#,
    )));

    let mut req = SearchRequest::new("stroke", 2);
    req.ai_enabled = true;
    let out = pipeline.run(req, CancellationToken::new()).await.unwrap();

    assert_eq!(out.report.classification_mode, ClassificationMode::Live);
    assert!(out.records.iter().all(|r| r.score() == 88));
    // equal scores keep source order
    assert_eq!(out.records[0].title, "Low");
}

#[tokio::test]
async fn test_cancellation_returns_partial_output() {
    let slow = Canned::slow(SourceId::ClinicalTrialsGov, &["Never seen"], Duration::from_secs(30));
    let later = Canned::new(SourceId::PubMed, &["Also never"]);
    let pipeline = Pipeline::with_adapters(vec![slow.clone(), later.clone()], governor());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let out = tokio::time::timeout(Duration::from_secs(5), pipeline.run(everything("sepsis", 5), cancel))
        .await
        .expect("cancelled run returns promptly")
        .unwrap();

    assert!(out.report.cancelled);
    assert!(out.records.is_empty());
    assert!(out
        .report
        .sources
        .iter()
        .all(|s| s.status == SourceStatus::Cancelled || s.source == SourceId::Isrctn));
    assert_eq!(later.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_input_rejected_before_any_source_runs() {
    let adapter = Canned::new(SourceId::ClinicalTrialsGov, &["x"]);
    let pipeline = Pipeline::with_adapters(vec![adapter.clone()], governor());

    let blank = pipeline.run(SearchRequest::new("   ", 5), CancellationToken::new()).await;
    assert!(matches!(blank, Err(PipelineError::InvalidInput(_))));

    let zero = pipeline.run(SearchRequest::new("asthma", 0), CancellationToken::new()).await;
    assert!(matches!(zero, Err(PipelineError::InvalidInput(_))));

    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_progress_stages_in_order() {
    let (tx, mut rx) = tokio::sync::broadcast::channel(64);
    let pipeline = Pipeline::with_adapters(vec![Canned::new(SourceId::ClinicalTrialsGov, &["A"])], governor())
        .with_progress(tx);

    pipeline.run(SearchRequest::new("gout", 1), CancellationToken::new()).await.unwrap();

    let mut stages = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        stages.push(ev.stage);
    }
    assert_eq!(stages.first(), Some(&Stage::Search));
    assert_eq!(stages.last(), Some(&Stage::Done));
    assert!(stages.contains(&Stage::Dedup));
}
