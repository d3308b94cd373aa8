//! The model backend seam.
//!
//! Everything above the inference layer talks to a `dyn ModelBackend`, so the
//! session can run against a live Ollama server or a scripted fake in tests.

use async_trait::async_trait;

use super::errors::InferenceError;
use super::types::{Completion, GenerateRequest, ModelInfo};

/// A local model server.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Produce one completion.
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, InferenceError>;

    /// Run a short, low-temperature completion on the lightweight
    /// classification model and return the raw text.
    async fn classify(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Count the tokens `text` occupies for `model`.
    ///
    /// Backends without a tokenizer endpoint return
    /// [`InferenceError::Unsupported`]; callers fall back to estimation.
    async fn count_tokens(&self, _model: &str, _text: &str) -> Result<u32, InferenceError> {
        Err(InferenceError::Unsupported {
            capability: "count_tokens".into(),
        })
    }

    /// Models the backend can serve.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError>;
}
