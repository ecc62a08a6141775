//! trialscope-ingestion — Clinical-study search pipeline.
//! - Source adapters (ClinicalTrials.gov, ISRCTN, PubMed, Europe PMC)
//! - Call pacing and timeouts shared by adapters and the classifier
//! - Aggregation, title deduplication, relevance classification, ranking
//! - Run reports, progress events and tabular export

pub mod aggregator;
pub mod classifier;
pub mod dedup;
pub mod export;
pub mod governor;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod ranker;
pub mod report;
pub mod sources;

pub use aggregator::AggregationMode;
pub use governor::{GovernorConfig, RateGovernor};
pub use models::{NormalizedRecord, Relevance, RelevanceClass, SourceConfig, SourceId};
pub use pipeline::{LlmSettings, Pipeline, PipelineError, PipelineOutput, SearchRequest};
pub use progress::{ProgressEvent, Stage};
pub use report::{ClassificationMode, RunReport, SourceReport, SourceStatus};
pub use sources::{SourceAdapter, SourceError};
