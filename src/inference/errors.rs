//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The endpoint answered, but the body was not what we expected.
    #[error("malformed response: {reason}")]
    MalformedResponse {
        reason: String,
    },

    /// The backend does not implement an optional capability.
    #[error("backend does not support {capability}")]
    Unsupported {
        capability: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether a failed request is worth repeating against the same endpoint.
    ///
    /// HTTP 503 covers Ollama's "model is loading" window right after a switch.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            InferenceError::ConnectionFailed { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::HttpError { status: 502..=504, .. }
        )
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            InferenceError::Timeout { duration_secs: 0 }
        } else if e.is_decode() {
            InferenceError::MalformedResponse {
                reason: e.to_string(),
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint,
                reason: e.to_string(),
            }
        }
    }
}
