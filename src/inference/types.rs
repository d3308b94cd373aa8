//! Shared types for the model backend.
//!
//! Requests and responses mirror Ollama's `/api/generate` and `/api/tags`
//! endpoints. The agent core only ever sees [`GenerateRequest`],
//! [`Completion`] and [`ModelInfo`]; the wire structs stay private to the
//! client.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single completion request.
///
/// `context` is the opaque continuation state returned by the previous
/// completion. Passing it back lets the model continue a conversation without
/// re-sending the transcript; `None` starts fresh from `prompt` alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    pub options: GenerateOptions,
}

impl GenerateRequest {
    /// Build a request with default sampling for `model`.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Attach a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Attach continuation state from a previous completion.
    pub fn with_context(mut self, context: Option<Vec<i64>>) -> Self {
        self.context = context;
        self
    }

    /// Override sampling options.
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Sampling options forwarded to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate (`num_predict` on the wire).
    #[serde(rename = "num_predict", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Context window the server should allocate (`num_ctx` on the wire).
    #[serde(rename = "num_ctx", skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

/// Wire body for `POST /api/generate`.
#[derive(Debug, Serialize)]
pub(crate) struct OllamaGenerateBody<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<&'a [i64]>,
    pub options: &'a GenerateOptions,
    pub stream: bool,
}

/// Wire body for a llama.cpp-style `POST /tokenize`.
#[derive(Debug, Serialize)]
pub(crate) struct TokenizeBody<'a> {
    pub content: &'a str,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// The result of one completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Continuation state to pass into the next request, if the backend
    /// returned one.
    pub context: Option<Vec<i64>>,
}

impl Completion {
    /// A completion with text only and no continuation state.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }
}

/// One entry in the backend's model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Non-streaming `/api/generate` response.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaGenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub context: Option<Vec<i64>>,
}

/// `/api/tags` response.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// `/tokenize` response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenizeResponse {
    #[serde(default)]
    pub tokens: Vec<i64>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
