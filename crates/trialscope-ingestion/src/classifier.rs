//! Relevance classification through a reasoning service.
//!
//! Every record leaves the classifier with `relevance` populated. The
//! service is asked for a JSON verdict per record; anything short of a
//! usable verdict degrades to a fixed default instead of failing the run:
//!
//! | situation                                   | score / class / confidence |
//! |---------------------------------------------|----------------------------|
//! | AI disabled, no backend, service down       | 75 / Relevant / 75         |
//! | reply without a usable JSON verdict         | 75 / Relevant / 70         |
//! | request-level API error (e.g. 4xx, 429)     | 70 / Relevant / 65         |
//!
//! Only records scored from a service reply count as live: the mode is
//! `Live` when all were, `Fallback` when none were, `Partial` otherwise.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trialscope_common::text::truncate_chars;
use trialscope_common::NOT_AVAILABLE;
use trialscope_llm::audit::LlmAuditEntry;
use trialscope_llm::{LlmBackend, LlmError, LlmRequest, Message};
use uuid::Uuid;

use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, Relevance, RelevanceClass};
use crate::progress::{Progress, Stage};
use crate::report::ClassificationMode;

const DEFAULT_SCORE: i64 = 75;
const ABSTRACT_PROMPT_CHARS: usize = 500;
const MAX_REPLY_TOKENS: u32 = 300;

const SYSTEM_PROMPT: &str = "You are a clinical research analyst. You judge how relevant a \
    study or paper is to a research query and answer with a single JSON object only.";

/// Score assigned when no live classification is possible.
pub fn uniform_default() -> Relevance {
    Relevance::new(DEFAULT_SCORE, RelevanceClass::Relevant, 75, None)
}

fn parse_fallback() -> Relevance {
    Relevance::new(DEFAULT_SCORE, RelevanceClass::Relevant, 70, Some("Default classification applied".into()))
}

fn call_error_fallback() -> Relevance {
    Relevance::new(70, RelevanceClass::Relevant, 65, Some("Classification error, default applied".into()))
}

// ── Reply parsing ─────────────────────────────────────────────────────────────

/// Outcome of reading a service reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Verdict(Relevance),
    Unparseable,
}

/// Find the first JSON object embedded in `reply` and read a verdict from
/// it. A missing or unknown `classification` makes the reply unparseable;
/// missing numbers default to 75.
pub fn extract_verdict(reply: &str) -> Extraction {
    let Some(obj) = first_json_object(reply) else {
        return Extraction::Unparseable;
    };
    let Some(class) = obj
        .get("classification")
        .and_then(Value::as_str)
        .and_then(RelevanceClass::parse_label)
    else {
        return Extraction::Unparseable;
    };

    let reasoning = obj
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    Extraction::Verdict(Relevance::new(
        number(&obj, "relevance_score"),
        class,
        number(&obj, "confidence"),
        reasoning,
    ))
}

fn first_json_object(reply: &str) -> Option<serde_json::Map<String, Value>> {
    reply.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&reply[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

/// Integer, float or numeric string; anything else is the default score.
fn number(obj: &serde_json::Map<String, Value>, key: &str) -> i64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(DEFAULT_SCORE),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f.round() as i64).unwrap_or(DEFAULT_SCORE),
        _ => DEFAULT_SCORE,
    }
}

// ── Prompt ────────────────────────────────────────────────────────────────────

pub fn build_prompt(record: &NormalizedRecord, query: &str) -> String {
    format!(
        "Research query: {query}\n\n\
         Title: {title}\n\
         Conditions: {conditions}\n\
         Phase: {phase}\n\
         Abstract: {abstract_text}\n\n\
         Rate the relevance of this record to the query. Respond with JSON only:\n\
         {{\"relevance_score\": <0-100>, \
         \"classification\": \"Highly Relevant\" | \"Relevant\" | \"Less Relevant\", \
         \"confidence\": <0-100>, \
         \"reasoning\": \"<one sentence>\"}}",
        title = record.title,
        conditions = record.attribute("conditions").unwrap_or(NOT_AVAILABLE),
        phase = record.attribute("phase").unwrap_or(NOT_AVAILABLE),
        abstract_text = truncate_chars(&record.abstract_text, ABSTRACT_PROMPT_CHARS),
    )
}

// ── Classifier ────────────────────────────────────────────────────────────────

pub struct Classifier {
    backend: Option<Arc<dyn LlmBackend>>,
    governor: Arc<RateGovernor>,
}

enum CallOutcome {
    Reply(Relevance),
    RequestError(LlmError),
    ServiceDown(LlmError),
    Cancelled,
}

impl Classifier {
    pub fn new(backend: Option<Arc<dyn LlmBackend>>, governor: Arc<RateGovernor>) -> Self {
        Self { backend, governor }
    }

    /// Classify `records` in order. With AI disabled or no backend every
    /// record gets the uniform default and the mode is `Fallback`.
    pub async fn classify(
        &self,
        records: Vec<NormalizedRecord>,
        query: &str,
        ai_enabled: bool,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> (Vec<NormalizedRecord>, ClassificationMode) {
        let backend = match (&self.backend, ai_enabled) {
            (Some(b), true) => b.clone(),
            _ => {
                debug!(n = records.len(), "Reasoning service not in use, applying default scores");
                return (apply_uniform(&records), ClassificationMode::Fallback);
            }
        };

        let run_id = Some(progress.run_id()).filter(|id| !id.is_nil());
        let mut out = Vec::with_capacity(records.len());
        let mut live = 0usize;
        let mut interrupted = false;

        for (i, record) in records.iter().enumerate() {
            if interrupted || cancel.is_cancelled() {
                interrupted = true;
                out.push(record.with_relevance(uniform_default()));
                continue;
            }

            let relevance = match self.call(backend.as_ref(), record, query, run_id, cancel).await {
                CallOutcome::Reply(r) => {
                    live += 1;
                    r
                }
                CallOutcome::RequestError(e) => {
                    warn!(error = %e, title = %record.title, "Classification call failed");
                    call_error_fallback()
                }
                CallOutcome::ServiceDown(e) => {
                    warn!(error = %e, remaining = records.len() - i, "Reasoning service unreachable, applying defaults");
                    interrupted = true;
                    uniform_default()
                }
                CallOutcome::Cancelled => {
                    interrupted = true;
                    uniform_default()
                }
            };
            debug!(score = relevance.score, class = relevance.classification.as_str(), "Record classified");
            out.push(record.with_relevance(relevance));

            if !interrupted {
                progress.emit(Stage::Classify, format!("Classified {}/{}", i + 1, records.len()), i + 1);
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.governor.classifier_pause(i + 1) => {}
                }
            }
        }

        let mode = mode_for(live, out.len());
        info!(n = out.len(), live, mode = ?mode, "Classification complete");
        (out, mode)
    }

    async fn call(
        &self,
        backend: &dyn LlmBackend,
        record: &NormalizedRecord,
        query: &str,
        run_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> CallOutcome {
        let req = LlmRequest {
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(build_prompt(record, query))],
            model: None,
            max_tokens: Some(MAX_REPLY_TOKENS),
            temperature: Some(0.0),
        };

        let t0 = Instant::now();
        let budget = self.governor.config().request_timeout.as_millis() as u64;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CallOutcome::Cancelled,
            r = self.governor.timed(backend.complete(req)) => r.unwrap_or(Err(LlmError::Timeout(budget))),
        };

        match result {
            Ok(resp) => {
                LlmAuditEntry::new(run_id, backend.backend_name(), &resp, t0.elapsed().as_millis() as u64).emit();
                match extract_verdict(&resp.content) {
                    Extraction::Verdict(r) => CallOutcome::Reply(r),
                    Extraction::Unparseable => {
                        debug!(title = %record.title, "Unparseable classification reply");
                        CallOutcome::Reply(parse_fallback())
                    }
                }
            }
            Err(e) if e.is_service_failure() => CallOutcome::ServiceDown(e),
            Err(e) => CallOutcome::RequestError(e),
        }
    }
}

/// `live` counts records scored from an actual service reply; defaults of
/// any kind do not.
fn mode_for(live: usize, total: usize) -> ClassificationMode {
    if live == total {
        ClassificationMode::Live
    } else if live == 0 {
        ClassificationMode::Fallback
    } else {
        ClassificationMode::Partial
    }
}

pub fn apply_uniform(records: &[NormalizedRecord]) -> Vec<NormalizedRecord> {
    records.iter().map(|r| r.with_relevance(uniform_default())).collect()
}
