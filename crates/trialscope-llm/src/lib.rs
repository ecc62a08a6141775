//! trialscope-llm — Reasoning-service abstraction used by the relevance
//! classifier: the LlmBackend trait, concrete HTTP backends and per-call
//! audit entries.

pub mod audit;
pub mod backend;

pub use backend::{build_backend, BackendKind, LlmBackend, LlmError, LlmRequest, LlmResponse, Message};
