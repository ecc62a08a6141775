//! Study-registry and literature source adapters.

pub mod clinicaltrials;
pub mod europepmc;
pub mod isrctn;
pub mod pubmed;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use thiserror::Error;
use trialscope_common::sandbox::SandboxClient;
use trialscope_common::TrialScopeError;

use crate::governor::RateGovernor;
use crate::models::{NormalizedRecord, SourceId};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Client(#[from] TrialScopeError),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_timeout(&self) -> bool {
        match self {
            SourceError::Timeout(_) => true,
            SourceError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Common interface for every source adapter.
///
/// `max_results` is an upper bound; sources may return fewer records. A
/// malformed item is skipped by the adapter, never reported as an error.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    fn display_name(&self) -> &str {
        self.id().display_name()
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<NormalizedRecord>, SourceError>;
}

/// The production adapters, one per `SourceId`.
pub fn default_adapters(
    client: &SandboxClient,
    governor: &Arc<RateGovernor>,
) -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(clinicaltrials::ClinicalTrialsClient::new(client.clone(), governor.clone())),
        Arc::new(isrctn::IsrctnClient::new(client.clone(), governor.clone())),
        Arc::new(pubmed::PubMedClient::new(client.clone(), governor.clone(), None)),
        Arc::new(europepmc::EuropePmcClient::new(client.clone(), governor.clone())),
    ]
}

/// Send one paced, time-boxed request and return the body text.
pub(crate) async fn fetch_text(
    governor: &RateGovernor,
    key: SourceId,
    request: RequestBuilder,
) -> Result<String, SourceError> {
    governor.pace_source(key.as_str()).await;
    let call = async {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    };
    let budget = governor.config().request_timeout.as_millis() as u64;
    governor.timed(call).await.map_err(|_| SourceError::Timeout(budget))?
}

pub(crate) async fn fetch_json(
    governor: &RateGovernor,
    key: SourceId,
    request: RequestBuilder,
) -> Result<serde_json::Value, SourceError> {
    let text = fetch_text(governor, key, request).await?;
    serde_json::from_str(&text).map_err(|e| SourceError::Malformed(e.to_string()))
}
