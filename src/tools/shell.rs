//! `run_shell_command`: run a command line in the workspace with a timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::time::timeout;

use super::{optional_str, optional_u64, required_str, resolve_path, MAX_SHELL_TIMEOUT_SECS};
use crate::agent_core::errors::ToolError;
use crate::agent_core::risk::classify_command_in;
use crate::agent_core::tokens::truncate_utf8;
use crate::agent_core::tool_registry::Tool;
use crate::agent_core::types::{RiskLevel, ToolParams, ToolResult};

/// Combined output kept for the model.
const MAX_OUTPUT_BYTES: usize = 50_000;

pub struct RunShellCommandTool {
    root: PathBuf,
    default_timeout_secs: u64,
}

impl RunShellCommandTool {
    pub fn new(root: PathBuf, default_timeout_secs: u64) -> Self {
        Self {
            root,
            default_timeout_secs: default_timeout_secs.clamp(1, MAX_SHELL_TIMEOUT_SECS),
        }
    }

    fn timeout_for(&self, params: &ToolParams) -> u64 {
        optional_u64(params, "timeout")
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, MAX_SHELL_TIMEOUT_SECS)
    }

    fn working_dir(&self, params: &ToolParams) -> PathBuf {
        optional_str(params, "cwd")
            .map(|p| resolve_path(&self.root, p))
            .unwrap_or_else(|| self.root.clone())
    }

    fn shell(command: &str) -> Command {
        let (program, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        let mut cmd = Command::new(program);
        cmd.arg(flag).arg(command);
        cmd
    }
}

#[async_trait]
impl Tool for RunShellCommandTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn display_name(&self) -> &str {
        "Run Shell Command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the project directory and return its output."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command line to run"},
                "cwd": {"type": "string", "description": "Working directory (default: project root)"},
                "timeout": {"type": "integer", "description": "Timeout in seconds"}
            },
            "required": ["command"]
        })
    }

    fn risk(&self, params: &ToolParams) -> RiskLevel {
        match optional_str(params, "command") {
            Some(command) => classify_command_in(command, &self.working_dir(params)),
            None => RiskLevel::Moderate,
        }
    }

    fn describe(&self, params: &ToolParams) -> String {
        format!("Run `{}`", optional_str(params, "command").unwrap_or("?"))
    }

    fn preview(&self, params: &ToolParams) -> String {
        let cwd = optional_str(params, "cwd").unwrap_or(".");
        format!(
            "$ {}\n(cwd: {cwd}, timeout: {}s)",
            optional_str(params, "command").unwrap_or_default(),
            self.timeout_for(params)
        )
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        let command = required_str(params, "command")?;
        let cwd = self.working_dir(params);
        let timeout_secs = self.timeout_for(params);

        let mut cmd = Self::shell(command);
        cmd.current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(command = %command, cwd = %cwd.display(), timeout_secs, "running shell command");
        let output = match timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
            Ok(result) => result.map_err(|e| ToolError::Execution {
                reason: format!("failed to start command: {e}"),
            })?,
            Err(_) => {
                tracing::warn!(command = %command, timeout_secs, "shell command timed out");
                return Err(ToolError::Timeout { timeout_secs });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else if stdout.trim().is_empty() {
            stderr.into_owned()
        } else {
            format!("{stdout}\n--- stderr ---\n{stderr}")
        };

        let mut content = truncate_utf8(&combined, MAX_OUTPUT_BYTES).to_string();
        if content.len() < combined.len() {
            content.push_str(&format!("\n[Output truncated, {} bytes total]", combined.len()));
        }
        if content.trim().is_empty() {
            content = "(no output)".to_string();
        }

        if output.status.success() {
            Ok(ToolResult::ok(content, format!("✓ `{command}` completed")))
        } else {
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            tracing::info!(command = %command, status = %status, "shell command failed");
            Ok(ToolResult {
                success: false,
                content,
                display_result: format!("✗ `{command}` exited with status {status}"),
                error: Some(format!("command exited with status {status}")),
            })
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
