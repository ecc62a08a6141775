use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::TrialScopeError;

const USER_AGENT: &str = "TrialScope/0.1 (clinical research tool)";

/// Default per-request timeout, matching the governor's default call budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client that only talks to approved registry and literature
/// hosts. Source adapters issue every request through it.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a client with the default allowlist and the default timeout.
    pub fn new() -> Result<Self, TrialScopeError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client with the default allowlist and an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TrialScopeError> {
        let domains = [
            "clinicaltrials.gov",      // ClinicalTrials.gov v2
            "www.isrctn.com",          // ISRCTN registry
            "eutils.ncbi.nlm.nih.gov", // PubMed E-utilities
            "www.ebi.ac.uk",           // Europe PMC
            "localhost",               // local mirrors and test servers
            "127.0.0.1",
        ];
        let allowlist = domains.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, allowlist })
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, TrialScopeError> {
        self.check(url)?;
        Ok(self.client.get(url))
    }

    fn check(&self, url: &str) -> Result<(), TrialScopeError> {
        if self.is_allowed(url) {
            Ok(())
        } else {
            Err(TrialScopeError::Security(format!("domain not in allowlist for URL {}", url)))
        }
    }
}
