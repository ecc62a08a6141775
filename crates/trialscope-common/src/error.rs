use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrialScopeError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Blocked by sandbox policy: {0}")]
    Security(String),
}
