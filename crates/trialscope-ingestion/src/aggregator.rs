//! Fan-out over the enabled sources.
//!
//! Adapters run in fixed source order and their records are concatenated in
//! that order whatever happens to any one of them. A failing adapter
//! contributes zero records and a failed `SourceReport`; it never stops the
//! run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceConfig, SourceId};
use crate::progress::Progress;
use crate::report::{SourceReport, SourceStatus};
use crate::sources::SourceAdapter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationMode {
    /// One adapter at a time, separated by the inter-source delay.
    #[default]
    Sequential,
    /// Adapters overlap; adapter *i* starts `i × inter_source_delay` after
    /// the first one.
    Concurrent,
}

/// Records in invocation order plus one report per enabled source.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub records: Vec<NormalizedRecord>,
    pub reports: Vec<SourceReport>,
    pub cancelled: bool,
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    governor: Arc<RateGovernor>,
    mode: AggregationMode,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, governor: Arc<RateGovernor>) -> Self {
        Self { adapters, governor, mode: AggregationMode::default() }
    }

    pub fn with_mode(mut self, mode: AggregationMode) -> Self {
        self.mode = mode;
        self
    }

    fn adapter_for(&self, id: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.iter().find(|a| a.id() == id).cloned()
    }

    /// Enabled configs in invocation order.
    fn plan<'a>(&self, configs: &'a [SourceConfig]) -> Vec<&'a SourceConfig> {
        let mut planned: Vec<&SourceConfig> = configs.iter().filter(|c| c.enabled).collect();
        planned.sort_by_key(|c| c.source.rank());
        planned
    }

    pub async fn collect(
        &self,
        query: &str,
        configs: &[SourceConfig],
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Aggregation {
        let planned = self.plan(configs);
        for cfg in &planned {
            self.governor.set_min_delay(cfg.source.as_str(), cfg.min_delay).await;
        }

        let outcomes = match self.mode {
            AggregationMode::Sequential => self.run_sequential(query, &planned, progress, cancel).await,
            AggregationMode::Concurrent => self.run_concurrent(query, &planned, progress, cancel).await,
        };

        let mut aggregation = Aggregation::default();
        for (report, records) in outcomes {
            aggregation.records.extend(records);
            aggregation.reports.push(report);
        }
        aggregation.cancelled = cancel.is_cancelled();

        info!(
            sources = aggregation.reports.len(),
            n = aggregation.records.len(),
            cancelled = aggregation.cancelled,
            "Aggregation complete"
        );
        aggregation
    }

    async fn run_sequential(
        &self,
        query: &str,
        planned: &[&SourceConfig],
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Vec<(SourceReport, Vec<NormalizedRecord>)> {
        let mut outcomes = Vec::with_capacity(planned.len());
        for (i, cfg) in planned.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.governor.between_sources() => {}
                }
            }
            outcomes.push(self.run_one(query, cfg, progress, cancel).await);
        }
        outcomes
    }

    async fn run_concurrent(
        &self,
        query: &str,
        planned: &[&SourceConfig],
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> Vec<(SourceReport, Vec<NormalizedRecord>)> {
        // join_all yields in input order, which is invocation order
        let tasks = planned.iter().enumerate().map(|(i, cfg)| async move {
            let offset = self.governor.stagger(i);
            if !offset.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(offset) => {}
                }
            }
            self.run_one(query, cfg, progress, cancel).await
        });
        join_all(tasks).await
    }

    async fn run_one(
        &self,
        query: &str,
        cfg: &SourceConfig,
        progress: &Progress,
        cancel: &CancellationToken,
    ) -> (SourceReport, Vec<NormalizedRecord>) {
        let source = cfg.source;
        if cancel.is_cancelled() {
            return (SourceReport::cancelled(source, cfg.max_results), vec![]);
        }
        let Some(adapter) = self.adapter_for(source) else {
            warn!(source = %source, "No adapter registered for enabled source");
            let report = report(cfg, SourceStatus::Failed, 0, Some("no adapter registered".into()), Duration::ZERO);
            return (report, vec![]);
        };

        let t0 = Instant::now();
        progress.emit_source(source, format!("Searching {}", adapter.display_name()), 0, None);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = adapter.fetch(query, cfg.max_results) => Some(r),
        };
        let elapsed = t0.elapsed();

        match outcome {
            None => {
                warn!(source = %source, "Source call abandoned on cancellation");
                let mut r = SourceReport::cancelled(source, cfg.max_results);
                r.elapsed_ms = elapsed.as_millis() as u64;
                (r, vec![])
            }
            Some(Ok(mut records)) => {
                records.truncate(cfg.max_results);
                info!(source = %source, n = records.len(), elapsed_ms = elapsed.as_millis() as u64, "Source returned records");
                progress.emit_source(source, format!("{} returned {} records", adapter.display_name(), records.len()), records.len(), None);
                (report(cfg, SourceStatus::Succeeded, records.len(), None, elapsed), records)
            }
            Some(Err(e)) => {
                let status = if e.is_timeout() { SourceStatus::TimedOut } else { SourceStatus::Failed };
                warn!(source = %source, error = %e, "Source failed");
                progress.emit_source(source, format!("{} failed", adapter.display_name()), 0, Some(e.to_string()));
                (report(cfg, status, 0, Some(e.to_string()), elapsed), vec![])
            }
        }
    }
}

fn report(cfg: &SourceConfig, status: SourceStatus, returned: usize, error: Option<String>, elapsed: Duration) -> SourceReport {
    SourceReport {
        source: cfg.source,
        display_name: cfg.source.display_name().to_string(),
        status,
        requested: cfg.max_results,
        returned,
        error,
        elapsed_ms: elapsed.as_millis() as u64,
    }
}
