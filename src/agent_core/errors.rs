//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
///
/// Tool-level failures never appear here: they are folded into a failed
/// `ToolResult` so the model can see them. These are the errors a caller of
/// the session has to handle.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model backend failed while producing a completion.
    #[error("model backend error: {reason}")]
    Backend { reason: String },

    /// A turn is already running on this session.
    #[error("a turn is already in progress for session '{session_id}'")]
    TurnInProgress { session_id: String },

    /// `switch_model` was asked for a model the backend does not serve.
    #[error("unknown model '{name}' (available: {})", available.join(", "))]
    UnknownModel { name: String, available: Vec<String> },

    /// A tool call needs confirmation but no confirmation handler is wired.
    #[error("tool '{tool_name}' requires confirmation but no confirmation handler is configured")]
    MissingConfirmationHandler { tool_name: String },

    /// Invalid settings or registry setup.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Reading or writing a session snapshot failed.
    #[error("persistence error at {path}: {reason}")]
    PersistenceError { path: String, reason: String },
}

impl AgentError {
    /// Configuration faults are the only errors that must stop execution
    /// rather than be reported and carried past.
    pub fn is_configuration_fault(&self) -> bool {
        matches!(
            self,
            AgentError::MissingConfirmationHandler { .. } | AgentError::Configuration { .. }
        )
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        AgentError::Backend {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

/// Failures inside a single tool call.
///
/// Each variant renders to a distinct message so the model and the user can
/// tell a bad argument from a refusal from a crash.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// Parameters failed validation; the tool was not run.
    #[error("invalid parameters: {reason}")]
    Validation { reason: String },

    /// The user (or policy) declined the action.
    #[error("permission denied: {tool_name} was not approved")]
    PermissionDenied { tool_name: String },

    /// The tool ran and failed.
    #[error("execution failed: {reason}")]
    Execution { reason: String },

    /// The tool did not finish in time.
    #[error("timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Execution {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_faults() {
        assert!(AgentError::MissingConfirmationHandler {
            tool_name: "write_file".into()
        }
        .is_configuration_fault());
        assert!(!AgentError::Backend {
            reason: "down".into()
        }
        .is_configuration_fault());
        assert!(!AgentError::TurnInProgress {
            session_id: "s".into()
        }
        .is_configuration_fault());
    }

    #[test]
    fn test_unknown_model_lists_available() {
        let err = AgentError::UnknownModel {
            name: "gpt-9".into(),
            available: vec!["llama3:8b".into(), "qwen2.5-coder:7b".into()],
        };
        assert_eq!(
            err.to_string(),
            "unknown model 'gpt-9' (available: llama3:8b, qwen2.5-coder:7b)"
        );
    }

    #[test]
    fn test_tool_error_messages_are_distinct() {
        let denied = ToolError::PermissionDenied {
            tool_name: "run_shell_command".into(),
        }
        .to_string();
        let invalid = ToolError::Validation {
            reason: "missing field 'command'".into(),
        }
        .to_string();
        assert!(denied.contains("permission denied"));
        assert!(invalid.contains("invalid parameters"));
        assert_ne!(denied, invalid);
    }

    #[test]
    fn test_inference_error_converts_to_backend() {
        let err: AgentError = InferenceError::Timeout { duration_secs: 30 }.into();
        assert!(matches!(err, AgentError::Backend { .. }));
    }
}
