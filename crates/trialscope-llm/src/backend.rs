//! Reasoning-service backend trait and concrete implementations.
//!
//! Backends:
//!   AnthropicBackend — Anthropic Messages API (claude-*), the default
//!   OpenAiBackend    — OpenAI Chat Completions or any compatible endpoint
//!   OllamaBackend    — local Ollama (OpenAI-compatible route)

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
}

impl LlmError {
    /// True when the service as a whole is unusable (unreachable, timing
    /// out, rejecting the credential or failing server-side), as opposed
    /// to a problem with one particular request.
    pub fn is_service_failure(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            LlmError::Unavailable(_) | LlmError::Timeout(_) => true,
            LlmError::ApiError { status, .. } => matches!(status, 401 | 403) || *status >= 500,
            LlmError::Serde(_) | LlmError::RateLimitExceeded => false,
        }
    }
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,   // "system" | "user" | "assistant"
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    fn model_id(&self) -> &str;
    fn backend_name(&self) -> &'static str;
    fn is_local(&self) -> bool;
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_openai_response(json: &serde_json::Value, fallback_model: &str) -> LlmResponse {
    LlmResponse {
        content: json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string(),
        model: json["model"]
            .as_str()
            .unwrap_or(fallback_model)
            .to_string(),
        prompt_tokens:     json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if status == 429 {
        return Err(LlmError::RateLimitExceeded);
    }
    if status >= 400 {
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| {
                body["error"]["message"]
                    .as_str()
                    .or_else(|| body["message"].as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| "unknown API error".to_string());
        return Err(LlmError::ApiError { status, message });
    }
    Ok(serde_json::from_str(&text)?)
}

fn openai_body(req: &LlmRequest, default_model: &str) -> serde_json::Value {
    serde_json::json!({
        "model":       req.model.as_deref().unwrap_or(default_model),
        "messages":    req.messages,
        "max_tokens":  req.max_tokens.unwrap_or(500),
        "temperature": req.temperature.unwrap_or(0.1),
    })
}

// ── 1. Anthropic (claude-*) ───────────────────────────────────────────────────

pub struct AnthropicBackend {
    pub model: String,
    base_url: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        // Messages API takes the system prompt out of band
        let system = req.messages.iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let messages: Vec<serde_json::Value> = req.messages.iter()
            .filter(|m| m.role != "system")
            .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
            .collect();

        let model = req.model.as_deref().unwrap_or(&self.model);

        let mut body = serde_json::json!({
            "model":      model,
            "messages":   messages,
            "max_tokens": req.max_tokens.unwrap_or(500),
        });
        if !system.is_empty() {
            body["system"] = serde_json::Value::String(system.to_string());
        }
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let resp = self.client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let json = check_response_status(resp).await?;

        let content = json["content"]
            .as_array()
            .and_then(|blocks| blocks.first())
            .and_then(|b| b["text"].as_str())
            .unwrap_or("")
            .to_string();

        Ok(LlmResponse {
            content,
            model: json["model"].as_str().unwrap_or(model).to_string(),
            prompt_tokens:     json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        })
    }

    fn model_id(&self) -> &str { &self.model }
    fn backend_name(&self) -> &'static str { "anthropic" }
    fn is_local(&self) -> bool { false }
}

// ── 2. OpenAI and compatible endpoints ───────────────────────────────────────

pub struct OpenAiBackend {
    pub model: String,
    base_url: String,
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: Option<SecretString>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&openai_body(&req, &self.model));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let json = check_response_status(builder.send().await?).await?;
        Ok(parse_openai_response(&json, &self.model))
    }

    fn model_id(&self) -> &str { &self.model }
    fn backend_name(&self) -> &'static str { "openai" }
    fn is_local(&self) -> bool { false }
}

// ── 3. Ollama (local) ─────────────────────────────────────────────────────────

pub struct OllamaBackend {
    pub base_url: String,
    pub model: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), model: model.into(), client: reqwest::Client::new() }
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self.client.post(&url).json(&openai_body(&req, &self.model)).send().await?;
        let json = check_response_status(resp).await?;
        Ok(parse_openai_response(&json, &self.model))
    }

    fn model_id(&self) -> &str { &self.model }
    fn backend_name(&self) -> &'static str { "ollama" }
    fn is_local(&self) -> bool { true }
}

// ── Construction from configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

/// Build a backend of `kind`. Remote backends need a credential; without
/// one `None` is returned and the caller falls back to unscored defaults.
pub fn build_backend(
    kind: BackendKind,
    model: &str,
    credential: Option<SecretString>,
    base_url: Option<&str>,
) -> Option<Arc<dyn LlmBackend>> {
    match kind {
        BackendKind::Anthropic => {
            let mut b = AnthropicBackend::new(credential?, model);
            if let Some(url) = base_url {
                b = b.with_base_url(url);
            }
            Some(Arc::new(b))
        }
        BackendKind::OpenAi => {
            let key = credential?;
            let mut b = OpenAiBackend::new(Some(key), model);
            if let Some(url) = base_url {
                b = b.with_base_url(url);
            }
            Some(Arc::new(b))
        }
        BackendKind::Ollama => Some(Arc::new(OllamaBackend::new(
            base_url.unwrap_or("http://localhost:11434"),
            model,
        ))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
