//! Built-in tools: file I/O, shell execution and project analysis.
//!
//! Every tool resolves relative paths against a workspace root fixed at
//! construction, so a session can run from any process working directory.

pub mod file;
pub mod project;
pub mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::agent_core::errors::{AgentError, ToolError};
use crate::agent_core::risk::normalize_lexically;
use crate::agent_core::settings::SessionSettings;
use crate::agent_core::tool_registry::ToolRegistry;
use crate::agent_core::types::ToolParams;

pub use file::{ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use project::AnalyzeProjectTool;
pub use shell::RunShellCommandTool;

/// Upper bound for any shell command timeout.
pub const MAX_SHELL_TIMEOUT_SECS: u64 = 300;

/// The standard tool set, registered in routing-priority order.
pub fn default_registry(
    workspace: &Path,
    settings: &SessionSettings,
) -> Result<ToolRegistry, AgentError> {
    let root = workspace.to_path_buf();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WriteFileTool::new(root.clone())))?;
    registry.register(Arc::new(ReadFileTool::new(root.clone())))?;
    registry.register(Arc::new(ListDirectoryTool::new(root.clone())))?;
    registry.register(Arc::new(RunShellCommandTool::new(
        root.clone(),
        settings.shell_timeout_secs,
    )))?;
    registry.register(Arc::new(AnalyzeProjectTool::new(root)))?;
    tracing::info!(tools = registry.len(), workspace = %workspace.display(), "tool registry ready");
    Ok(registry)
}

/// Resolve a user- or model-supplied path against `root`, expanding `~` and
/// folding `.`/`..` so risk checks see the real target.
pub(crate) fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    normalize_lexically(&join_raw(root, raw.trim()))
}

fn join_raw(root: &Path, raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// A required string parameter. Validation has already run, so a missing
/// value here is a tool bug, reported as an execution error.
pub(crate) fn required_str<'a>(params: &'a ToolParams, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Execution {
            reason: format!("missing parameter '{key}'"),
        })
}

pub(crate) fn optional_str<'a>(params: &'a ToolParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

pub(crate) fn optional_u64(params: &ToolParams, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_order() {
        let registry = default_registry(Path::new("/work"), &SessionSettings::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "write_file",
                "read_file",
                "list_directory",
                "run_shell_command",
                "analyze_project"
            ]
        );
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/work");
        assert_eq!(resolve_path(root, "./hello.py"), PathBuf::from("/work/hello.py"));
        assert_eq!(resolve_path(root, "src/lib.rs"), PathBuf::from("/work/src/lib.rs"));
        assert_eq!(resolve_path(root, "/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(resolve_path(root, "../../etc/shadow"), PathBuf::from("/etc/shadow"));
        assert_eq!(resolve_path(root, "/work/./a/../b"), PathBuf::from("/work/b"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_path(root, "~/notes.md"), home.join("notes.md"));
        }
    }
}
