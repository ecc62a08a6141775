//! Audit entries for reasoning-service calls.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::LlmResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAuditEntry {
    pub id: Uuid,
    pub run_id: Option<Uuid>,
    pub model: String,
    pub backend: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub output_hash: String,
    pub latency_ms: u64,
    pub called_at: chrono::DateTime<Utc>,
}

impl LlmAuditEntry {
    pub fn new(run_id: Option<Uuid>, backend: &str, response: &LlmResponse, latency_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(response.content.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            run_id,
            model: response.model.clone(),
            backend: backend.to_string(),
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            output_hash,
            latency_ms,
            called_at: Utc::now(),
        }
    }

    /// Emit the entry on the tracing stream.
    pub fn emit(&self) {
        tracing::debug!(
            audit_id = %self.id,
            run_id = ?self.run_id,
            model = %self.model,
            backend = %self.backend,
            prompt_tokens = self.prompt_tokens,
            completion_tokens = self.completion_tokens,
            latency_ms = self.latency_ms,
            output_hash = %self.output_hash,
            "LLM call audited"
        );
    }
}
