//! Per-session behaviour settings.
//!
//! Persisted as `settings.json` in the app data directory. Missing fields
//! take their defaults, so older files keep loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::AgentError;
use super::orchestrator::TurnFlow;
use super::router::{RoutingStrategy, DEFAULT_EXECUTION_THRESHOLD};

/// Fraction of the context window at which history is compacted.
pub const DEFAULT_COMPACTION_THRESHOLD: f32 = 0.8;

/// Default shell command timeout.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;

const DEFAULT_SYSTEM_PROMPT: &str = "You are devpilot, a local development assistant running on the \
user's machine. Be concise and precise. When a tool has been run, base your answer on its output.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    pub routing_strategy: RoutingStrategy,
    pub turn_flow: TurnFlow,
    /// Minimum confidence for a detected call to execute.
    pub execution_threshold: f32,
    /// Fraction of the context window that triggers compaction.
    pub compaction_threshold: f32,
    /// Grant `Safe` confirmations without asking.
    pub auto_approve_safe: bool,
    /// How many recent messages the router sees.
    pub recent_context_messages: usize,
    pub system_prompt: String,
    pub shell_timeout_secs: u64,
    pub tool_temperature: f32,
    pub tool_top_p: f32,
    pub conversational_temperature: f32,
    pub conversational_top_p: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            routing_strategy: RoutingStrategy::default(),
            turn_flow: TurnFlow::default(),
            execution_threshold: DEFAULT_EXECUTION_THRESHOLD,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            auto_approve_safe: false,
            recent_context_messages: 6,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            shell_timeout_secs: DEFAULT_SHELL_TIMEOUT_SECS,
            tool_temperature: 0.1,
            tool_top_p: 0.2,
            conversational_temperature: 0.7,
            conversational_top_p: 0.9,
        }
    }
}

impl SessionSettings {
    /// Load from the app data directory or return defaults.
    pub fn load_or_default() -> Self {
        Self::load_from_or_default(&Self::persist_path())
    }

    /// Load from `path` or return defaults. Unreadable or unparseable files
    /// are logged and ignored.
    pub fn load_from_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "loaded session settings");
                    settings.normalized()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse session settings, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read session settings, using defaults");
                Self::default()
            }
        }
    }

    /// Save to the app data directory.
    pub fn save(&self) -> Result<(), AgentError> {
        self.save_to(&Self::persist_path())
    }

    /// Save to `path` (atomic write).
    pub fn save_to(&self, path: &Path) -> Result<(), AgentError> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "saved session settings");
        Ok(())
    }

    /// Clamp out-of-range values back into range.
    pub fn normalized(mut self) -> Self {
        self.execution_threshold = clamp_unit(self.execution_threshold, DEFAULT_EXECUTION_THRESHOLD);
        self.compaction_threshold = clamp_unit(self.compaction_threshold, DEFAULT_COMPACTION_THRESHOLD);
        if self.compaction_threshold == 0.0 {
            self.compaction_threshold = DEFAULT_COMPACTION_THRESHOLD;
        }
        self.shell_timeout_secs = self.shell_timeout_secs.clamp(1, crate::tools::MAX_SHELL_TIMEOUT_SECS);
        self
    }

    fn persist_path() -> PathBuf {
        crate::data_dir().join("settings.json")
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AgentError> {
    let fail = |e: std::io::Error| AgentError::PersistenceError {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, bytes).map_err(fail)?;
    std::fs::rename(&tmp_path, path).map_err(fail)
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.routing_strategy, RoutingStrategy::Staged);
        assert_eq!(settings.turn_flow, TurnFlow::Routed);
        assert!((settings.execution_threshold - 0.7).abs() < f32::EPSILON);
        assert!((settings.compaction_threshold - 0.8).abs() < f32::EPSILON);
        assert!(!settings.auto_approve_safe);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = SessionSettings {
            routing_strategy: RoutingStrategy::PatternOnly,
            auto_approve_safe: true,
            ..SessionSettings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(SessionSettings::load_from_or_default(&path), settings);
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"routingStrategy": "llm_guided", "turnFlow": "two_phase"}"#).unwrap();
        let settings = SessionSettings::load_from_or_default(&path);
        assert_eq!(settings.routing_strategy, RoutingStrategy::LlmGuided);
        assert_eq!(settings.turn_flow, TurnFlow::TwoPhase);
        assert_eq!(settings.shell_timeout_secs, DEFAULT_SHELL_TIMEOUT_SECS);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SessionSettings::load_from_or_default(&path), SessionSettings::default());
    }

    #[test]
    fn test_normalized_clamps() {
        let settings = SessionSettings {
            execution_threshold: 3.0,
            compaction_threshold: f32::NAN,
            shell_timeout_secs: 10_000,
            ..SessionSettings::default()
        }
        .normalized();
        assert_eq!(settings.execution_threshold, 1.0);
        assert_eq!(settings.compaction_threshold, DEFAULT_COMPACTION_THRESHOLD);
        assert_eq!(settings.shell_timeout_secs, crate::tools::MAX_SHELL_TIMEOUT_SECS);
    }
}
