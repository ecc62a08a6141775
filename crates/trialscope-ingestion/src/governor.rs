//! Shared call pacing and timeouts for adapters and the classifier.
//!
//! One `RateGovernor` is built per pipeline run and handed to every
//! adapter and to the classifier as `Arc<RateGovernor>`. Pacing slots are
//! reserved under the lock, so concurrent callers on the same key queue up
//! behind each other instead of bursting.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{error::Elapsed, Instant};
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    /// Budget for a single outbound call; an elapsed call counts as failed.
    pub request_timeout: Duration,
    /// Gap between successive adapter invocations within one run.
    pub inter_source_delay: Duration,
    /// Gap between successive calls issued by the same adapter.
    pub intra_source_delay: Duration,
    /// Records classified between classifier pauses.
    pub classifier_batch_size: usize,
    pub classifier_batch_pause: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            request_timeout:        Duration::from_secs(30),
            inter_source_delay:     Duration::from_millis(500),
            intra_source_delay:     Duration::from_secs(1),
            classifier_batch_size:  5,
            classifier_batch_pause: Duration::from_secs(1),
        }
    }
}

impl GovernorConfig {
    /// No pacing at all; the timeout is kept.
    pub fn immediate() -> Self {
        Self {
            inter_source_delay: Duration::ZERO,
            intra_source_delay: Duration::ZERO,
            classifier_batch_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

pub struct RateGovernor {
    config: GovernorConfig,
    last_call: Mutex<HashMap<String, Instant>>,
    /// Per-key overrides of `intra_source_delay`.
    min_delays: Mutex<HashMap<String, Duration>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            last_call: Mutex::new(HashMap::new()),
            min_delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Wait until at least `min_interval` has passed since the previous
    /// call slot reserved under `key`, then reserve the next one.
    pub async fn pace(&self, key: &str, min_interval: Duration) {
        let wait = {
            let mut last = self.last_call.lock().await;
            let now = Instant::now();
            let slot = match last.get(key) {
                Some(prev) => (*prev + min_interval).max(now),
                None => now,
            };
            last.insert(key.to_string(), slot);
            slot - now
        };
        if !wait.is_zero() {
            trace!(key, wait_ms = wait.as_millis() as u64, "Pacing call");
            tokio::time::sleep(wait).await;
        }
    }

    /// Set the minimum call spacing used by `pace_source` for `key`.
    pub async fn set_min_delay(&self, key: &str, min_delay: Duration) {
        self.min_delays.lock().await.insert(key.to_string(), min_delay);
    }

    /// Per-adapter pacing: the key's own minimum delay if one was set,
    /// otherwise the configured intra-source gap.
    pub async fn pace_source(&self, key: &str) {
        let interval = self
            .min_delays
            .lock()
            .await
            .get(key)
            .copied()
            .unwrap_or(self.config.intra_source_delay);
        self.pace(key, interval).await
    }

    /// Run `fut` under the request timeout.
    pub async fn timed<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout(self.config.request_timeout, fut).await
    }

    pub async fn between_sources(&self) {
        if !self.config.inter_source_delay.is_zero() {
            tokio::time::sleep(self.config.inter_source_delay).await;
        }
    }

    /// Start offset for the adapter at `position` in concurrent runs.
    pub fn stagger(&self, position: usize) -> Duration {
        self.config.inter_source_delay * position as u32
    }

    /// Pause after every `classifier_batch_size` records; `done` counts the
    /// records classified so far.
    pub async fn classifier_pause(&self, done: usize) {
        let batch = self.config.classifier_batch_size.max(1);
        if done > 0 && done % batch == 0 && !self.config.classifier_batch_pause.is_zero() {
            trace!(done, "Classifier batch pause");
            tokio::time::sleep(self.config.classifier_batch_pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_pace_enforces_floor_on_same_key() {
        let g = RateGovernor::new(GovernorConfig::immediate());
        let t0 = StdInstant::now();
        g.pace("pubmed", Duration::from_millis(60)).await;
        g.pace("pubmed", Duration::from_millis(60)).await;
        g.pace("pubmed", Duration::from_millis(60)).await;
        assert!(t0.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_pace_keys_are_independent() {
        let g = RateGovernor::new(GovernorConfig::immediate());
        let t0 = StdInstant::now();
        g.pace("a", Duration::from_millis(500)).await;
        g.pace("b", Duration::from_millis(500)).await;
        assert!(t0.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_timed_reports_elapsed() {
        let g = RateGovernor::new(GovernorConfig {
            request_timeout: Duration::from_millis(20),
            ..GovernorConfig::immediate()
        });
        let slow = g.timed(tokio::time::sleep(Duration::from_millis(500))).await;
        assert!(slow.is_err());
        let fast = g.timed(async { 7 }).await;
        assert_eq!(fast.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_min_delay_override_applies_to_key() {
        let g = RateGovernor::new(GovernorConfig::immediate());
        g.set_min_delay("isrctn", Duration::from_millis(80)).await;
        let t0 = StdInstant::now();
        g.pace_source("isrctn").await;
        g.pace_source("isrctn").await;
        assert!(t0.elapsed() >= Duration::from_millis(80));

        let t1 = StdInstant::now();
        g.pace_source("pubmed").await;
        g.pace_source("pubmed").await;
        assert!(t1.elapsed() < Duration::from_millis(60));
    }

    #[test]
    fn test_stagger_scales_with_position() {
        let g = RateGovernor::new(GovernorConfig::default());
        assert_eq!(g.stagger(0), Duration::ZERO);
        assert_eq!(g.stagger(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_default_matches_documented_pacing() {
        let c = GovernorConfig::default();
        assert_eq!(c.request_timeout, Duration::from_secs(30));
        assert_eq!(c.inter_source_delay, Duration::from_millis(500));
        assert_eq!(c.classifier_batch_size, 5);
    }
}
