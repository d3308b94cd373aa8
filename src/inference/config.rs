//! Model backend configuration loading and validation.
//!
//! Reads `.devpilot/config.yaml` and resolves environment variables.
//! Config is the single source of truth for the backend endpoint, the
//! active model and per-model context windows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Config file location, relative to a project root.
pub const CONFIG_RELATIVE_PATH: &str = ".devpilot/config.yaml";

/// Context window assumed for models the config does not describe.
pub const DEFAULT_CONTEXT_WINDOW: u32 = 8192;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model's runtime configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            context_window: default_context_window(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_context_window() -> u32 {
    DEFAULT_CONTEXT_WINDOW
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    120
}

/// Top-level backend configuration (mirrors `.devpilot/config.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Base URL of the Ollama-compatible server.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used for conversation and function calling.
    pub active_model: String,
    /// Smaller model for the classification stage. Falls back to
    /// `active_model` when unset.
    #[serde(default)]
    pub classifier_model: Option<String>,
    /// Optional llama.cpp-style `/tokenize` endpoint for exact token counts.
    /// Without it, token counts are estimated from character length.
    #[serde(default)]
    pub tokenize_url: Option<String>,
    /// Total request timeout for a single completion.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Known models keyed by the name the backend uses.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            active_model: DEFAULT_MODEL.to_string(),
            classifier_model: None,
            tokenize_url: None,
            request_timeout_secs: default_request_timeout_secs(),
            models: HashMap::new(),
        }
    }
}

impl ModelsConfig {
    /// Settings for `name`, or defaults when the config does not list it.
    ///
    /// Models pulled into the backend after startup are still usable; they
    /// simply run with the default context window.
    pub fn model_settings(&self, name: &str) -> ModelConfig {
        self.models.get(name).cloned().unwrap_or_default()
    }

    /// The model the classification stage should call.
    pub fn classifier(&self) -> &str {
        self.classifier_model
            .as_deref()
            .unwrap_or(self.active_model.as_str())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Resolve the config path for a project.
///
/// Checks `DEVPILOT_PROJECT_ROOT` first, then searches upward from `start`
/// for `.devpilot/config.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    if let Ok(root) = std::env::var("DEVPILOT_PROJECT_ROOT") {
        let candidate = PathBuf::from(&root).join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_RELATIVE_PATH}"),
    })
}

/// Load and parse the backend configuration file.
///
/// Performs environment-variable interpolation on string values matching
/// `${VAR_NAME}` or `${VAR_NAME:-default}`.
pub fn load_models_config(path: &Path) -> Result<ModelsConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_models_config(&raw)
}

/// Parse config text after env interpolation.
pub fn parse_models_config(raw: &str) -> Result<ModelsConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    let config: ModelsConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    if config.active_model.trim().is_empty() {
        return Err(InferenceError::ConfigError {
            reason: "active_model must not be empty".into(),
        });
    }

    Ok(config)
}

/// Locate and load the config, falling back to defaults when none exists.
///
/// A config that exists but fails to parse is an error: silently running
/// against the wrong endpoint is worse than refusing to start.
pub fn load_or_default(start: &Path) -> Result<ModelsConfig, InferenceError> {
    match find_config_path(start) {
        Ok(path) => {
            let config = load_models_config(&path)?;
            tracing::info!(
                path = %path.display(),
                active_model = %config.active_model,
                base_url = %config.base_url,
                "loaded backend config"
            );
            Ok(config)
        }
        Err(_) => {
            tracing::info!("no backend config found, using defaults");
            Ok(ModelsConfig::default())
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
