//! Run diagnostics returned alongside the ranked records.

use serde::Serialize;
use uuid::Uuid;

use crate::models::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMode {
    /// Every record was classified by the reasoning service.
    Live,
    /// No record was classified by the reasoning service.
    Fallback,
    /// The service became unreachable part-way through the run.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub source: SourceId,
    pub display_name: String,
    pub status: SourceStatus,
    /// Per-call cap the source was invoked with.
    pub requested: usize,
    pub returned: usize,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn cancelled(source: SourceId, requested: usize) -> Self {
        Self {
            source,
            display_name: source.display_name().to_string(),
            status: SourceStatus::Cancelled,
            requested,
            returned: 0,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SourceStatus::Succeeded
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub query: String,
    pub sources: Vec<SourceReport>,
    pub total_before_dedup: usize,
    pub total_after_dedup: usize,
    pub classification_mode: ClassificationMode,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(run_id: Uuid, query: &str) -> Self {
        Self {
            run_id,
            query: query.to_string(),
            sources: Vec::new(),
            total_before_dedup: 0,
            total_after_dedup: 0,
            classification_mode: ClassificationMode::Fallback,
            cancelled: false,
            duration_ms: 0,
        }
    }

    pub fn source(&self, id: SourceId) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source == id)
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources
            .iter()
            .filter(|s| matches!(s.status, SourceStatus::Failed | SourceStatus::TimedOut))
    }
}
