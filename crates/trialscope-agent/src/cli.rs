use std::path::PathBuf;

use clap::Parser;
use secrecy::SecretString;
use tracing::warn;
use trialscope_ingestion::{AggregationMode, SearchRequest, SourceId};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "trialscope")]
#[command(about = "Search clinical-trial registries and literature, score relevance, export a ranked table")]
#[command(version)]
#[command(after_help = "\x1b[1;36mExamples:\x1b[0m
  trialscope \"type 2 diabetes\"                       ClinicalTrials.gov only, default scores
  trialscope \"asthma\" --academic --international     Add PubMed, Europe PMC and ISRCTN
  trialscope \"copd\" --ai -o copd.csv                 Score with the reasoning service")]
pub struct Args {
    /// Condition, intervention or free-text query
    pub query: String,

    /// Upper bound on records per registry (academic sources get a third)
    #[arg(short = 'n', long)]
    pub max_results: Option<usize>,

    /// Comma-separated sources to consider (clinicaltrials_gov, isrctn, pubmed, europepmc)
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<SourceId>,

    /// Include literature databases (PubMed, Europe PMC)
    #[arg(long)]
    pub academic: bool,

    /// Include international registries (ISRCTN)
    #[arg(long)]
    pub international: bool,

    /// Classify relevance through the reasoning service
    #[arg(long)]
    pub ai: bool,

    /// Reasoning-service credential; overrides the environment
    #[arg(long)]
    pub api_key: Option<String>,

    /// CSV output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Query sources in parallel with staggered starts
    #[arg(long)]
    pub concurrent: bool,
}

impl Args {
    /// Merge flags over the configuration file. `env_credential` is the
    /// value of the backend's credential variable, if set.
    pub fn to_request(&self, config: &Config, env_credential: Option<String>) -> SearchRequest {
        let mut req = SearchRequest::new(self.query.clone(), self.max_results.unwrap_or(config.search.max_results));
        req.include_academic = self.academic || config.search.include_academic;
        req.include_international = self.international || config.search.include_international;
        req.ai_enabled = self.ai;
        req.enabled_sources = if self.sources.is_empty() {
            config
                .search
                .sources
                .iter()
                .filter_map(|s| match s.parse::<SourceId>() {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!("Ignoring configured source: {e}");
                        None
                    }
                })
                .collect()
        } else {
            self.sources.iter().copied().collect()
        };
        req.ai_credential = self
            .api_key
            .clone()
            .or(env_credential)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        req
    }

    pub fn mode(&self, config: &Config) -> AggregationMode {
        if self.concurrent || config.search.concurrent {
            AggregationMode::Concurrent
        } else {
            AggregationMode::Sequential
        }
    }

    pub fn output_path(&self, config: &Config) -> PathBuf {
        self.output.clone().unwrap_or_else(|| PathBuf::from(&config.search.output))
    }
}
