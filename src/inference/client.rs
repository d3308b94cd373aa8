//! Ollama HTTP client.
//!
//! Sends non-streaming completion requests to a local Ollama-compatible
//! server and lists the models it has pulled. Transient failures (connection
//! refused while the server starts, 503 while a model loads) are retried
//! once before surfacing.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::backend::ModelBackend;
use super::config::ModelsConfig;
use super::errors::InferenceError;
use super::types::{
    Completion, GenerateOptions, GenerateRequest, ModelInfo, OllamaGenerateBody,
    OllamaGenerateResponse, OllamaTagsResponse, TokenizeBody, TokenizeResponse,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for catalog and tokenizer calls, which never run inference.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts per request for retriable errors.
const MAX_ATTEMPTS: u32 = 2;

/// Delay between attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Output cap for classification calls; the answer is three short lines.
const CLASSIFY_MAX_TOKENS: u32 = 160;

// ─── OllamaClient ────────────────────────────────────────────────────────────

/// Client for a local Ollama server.
pub struct OllamaClient {
    http: HttpClient,
    config: ModelsConfig,
}

impl OllamaClient {
    /// Create a client from the backend configuration.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: ModelsConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// The configuration this client was built from.
    pub fn config(&self) -> &ModelsConfig {
        &self.config
    }

    /// Check if the server is reachable. Does not consume inference tokens.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url());
        match self.http.get(&url).timeout(CONNECT_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    // ─── Requests ───────────────────────────────────────────────────────

    async fn generate_once(&self, request: &GenerateRequest) -> Result<Completion, InferenceError> {
        let url = format!("{}/api/generate", self.base_url());
        let body = OllamaGenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            system: request.system.as_deref(),
            context: request.context.as_deref(),
            options: &request.options,
            stream: false,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: OllamaGenerateResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::MalformedResponse {
                    reason: format!("failed to decode generate response: {e}"),
                })?;

        Ok(Completion {
            text: parsed.response,
            context: parsed.context,
        })
    }

    fn map_send_error(&self, e: reqwest::Error, url: &str) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// Fill in per-model sampling defaults the caller left unset.
    fn apply_model_defaults(&self, request: &mut GenerateRequest) {
        let model = self.config.model_settings(&request.model);
        let opts = &mut request.options;
        opts.temperature.get_or_insert(model.temperature);
        opts.max_tokens.get_or_insert(model.max_tokens);
        opts.context_window.get_or_insert(model.context_window);
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn generate(&self, mut request: GenerateRequest) -> Result<Completion, InferenceError> {
        self.apply_model_defaults(&mut request);

        tracing::info!(
            model = %request.model,
            prompt_chars = request.prompt.len(),
            has_system = request.system.is_some(),
            has_context = request.context.is_some(),
            "=== LLM REQUEST ==="
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.generate_once(&request).await {
                Ok(completion) => {
                    tracing::debug!(
                        model = %request.model,
                        response_chars = completion.text.len(),
                        "completion received"
                    );
                    return Ok(completion);
                }
                Err(e) if e.is_retriable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        model = %request.model,
                        attempt,
                        error = %e,
                        "transient backend error, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn classify(&self, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest::new(self.config.classifier(), prompt).with_options(
            GenerateOptions {
                temperature: Some(0.0),
                top_p: None,
                max_tokens: Some(CLASSIFY_MAX_TOKENS),
                context_window: None,
            },
        );
        Ok(self.generate(request).await?.text)
    }

    async fn count_tokens(&self, _model: &str, text: &str) -> Result<u32, InferenceError> {
        let Some(url) = self.config.tokenize_url.as_deref() else {
            return Err(InferenceError::Unsupported {
                capability: "count_tokens".into(),
            });
        };

        let response = self
            .http
            .post(url)
            .timeout(METADATA_TIMEOUT)
            .json(&TokenizeBody { content: text })
            .send()
            .await
            .map_err(|e| self.map_send_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: TokenizeResponse = response.json().await?;
        Ok(u32::try_from(parsed.tokens.len()).unwrap_or(u32::MAX))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError> {
        let url = format!("{}/api/tags", self.base_url());
        let response = self
            .http
            .get(&url)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.map_send_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let tags: OllamaTagsResponse = response.json().await?;
        tracing::debug!(count = tags.models.len(), "listed backend models");
        Ok(tags.models)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
