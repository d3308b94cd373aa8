//! Test doubles shared by the agent core's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::ToolError;
use super::tool_registry::Tool;
use super::types::{RiskLevel, ToolParams, ToolResult};
use crate::inference::{Completion, GenerateRequest, InferenceError, ModelBackend, ModelInfo};

// ─── ScriptedBackend ────────────────────────────────────────────────────────

/// A backend that replays queued answers and records every request.
///
/// Once a queue runs dry, `generate` answers `"default reply"` and
/// `classify` fails, which the router treats as "no detection".
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    generate: Mutex<VecDeque<Result<String, InferenceError>>>,
    classify: Mutex<VecDeque<Result<String, InferenceError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    classify_prompts: Mutex<Vec<String>>,
    models: Vec<String>,
    tokens_per_call: Option<u32>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Make `count_tokens` answer a fixed number instead of being unsupported.
    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.tokens_per_call = Some(tokens);
        self
    }

    pub fn push_generate(&self, text: &str) -> &Self {
        lock(&self.generate).push_back(Ok(text.to_string()));
        self
    }

    pub fn push_generate_error(&self) -> &Self {
        lock(&self.generate).push_back(Err(InferenceError::ConnectionFailed {
            endpoint: "http://localhost:11434".into(),
            reason: "connection refused".into(),
        }));
        self
    }

    pub fn push_classify(&self, text: &str) -> &Self {
        lock(&self.classify).push_back(Ok(text.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        lock(&self.requests).clone()
    }

    pub fn generate_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn classify_calls(&self) -> usize {
        lock(&self.classify_prompts).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<Completion, InferenceError> {
        lock(&self.requests).push(request);
        match lock(&self.generate).pop_front() {
            Some(Ok(text)) => Ok(Completion::text(text)),
            Some(Err(e)) => Err(e),
            None => Ok(Completion::text("default reply")),
        }
    }

    async fn classify(&self, prompt: &str) -> Result<String, InferenceError> {
        lock(&self.classify_prompts).push(prompt.to_string());
        lock(&self.classify)
            .pop_front()
            .unwrap_or(Err(InferenceError::ConnectionFailed {
                endpoint: "classifier".into(),
                reason: "not scripted".into(),
            }))
    }

    async fn count_tokens(&self, _model: &str, _text: &str) -> Result<u32, InferenceError> {
        self.tokens_per_call.ok_or(InferenceError::Unsupported {
            capability: "count_tokens".into(),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, InferenceError> {
        Ok(self
            .models
            .iter()
            .map(|name| ModelInfo {
                name: name.clone(),
                size: 0,
                modified_at: None,
            })
            .collect())
    }
}

// ─── RecordingTool ──────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

/// A tool with one string parameter `text` that records its executions.
pub(crate) struct RecordingTool {
    name: String,
    risk: RiskLevel,
    read_only: bool,
    behaviour: Behaviour,
    executions: AtomicUsize,
    seen: Mutex<Vec<ToolParams>>,
}

impl RecordingTool {
    fn build(name: &str, risk: RiskLevel, read_only: bool, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            risk,
            read_only,
            behaviour,
            executions: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Read-only and safe: never needs confirmation.
    pub fn safe(name: &str) -> Arc<Self> {
        Self::build(name, RiskLevel::Safe, true, Behaviour::Succeed)
    }

    /// Side-effecting at a fixed risk.
    pub fn with_risk(name: &str, risk: RiskLevel) -> Arc<Self> {
        Self::build(name, risk, false, Behaviour::Succeed)
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, RiskLevel::Safe, true, Behaviour::Fail)
    }

    pub fn panicking(name: &str) -> Arc<Self> {
        Self::build(name, RiskLevel::Safe, true, Behaviour::Panic)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ToolParams> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records its input"
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn risk(&self, _params: &ToolParams) -> RiskLevel {
        self.risk
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen).push(params.clone());
        match self.behaviour {
            Behaviour::Succeed => {
                let text = params.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(ToolResult::ok(
                    format!("{} saw: {text}", self.name),
                    format!("✓ {}", self.name),
                ))
            }
            Behaviour::Fail => Err(ToolError::Execution {
                reason: "disk full".into(),
            }),
            Behaviour::Panic => panic!("tool blew up"),
        }
    }
}
