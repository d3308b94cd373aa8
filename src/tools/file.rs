//! File tools: write, read and list.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, optional_u64, required_str, resolve_path};
use crate::agent_core::errors::ToolError;
use crate::agent_core::risk::{classify_read, classify_write};
use crate::agent_core::tokens::truncate_utf8;
use crate::agent_core::tool_registry::Tool;
use crate::agent_core::types::{RiskLevel, ToolParams, ToolResult};

/// Largest file `read_file` will load.
const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Default number of lines returned by `read_file`.
const DEFAULT_READ_LIMIT: u64 = 2000;

/// Bytes of new content shown in a write confirmation.
const PREVIEW_BYTES: usize = 1200;

/// Entries `list_directory` returns before stopping.
const MAX_LIST_ENTRIES: usize = 500;

// ─── write_file ─────────────────────────────────────────────────────────────

pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn target(&self, params: &ToolParams) -> Option<PathBuf> {
        optional_str(params, "file_path").map(|p| resolve_path(&self.root, p))
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn display_name(&self) -> &str {
        "Write File"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Parent directories are created as needed."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file to write"},
                "content": {"type": "string", "description": "Full content of the file"}
            },
            "required": ["file_path", "content"]
        })
    }

    fn risk(&self, params: &ToolParams) -> RiskLevel {
        match self.target(params) {
            Some(path) => classify_write(&path, path.exists()),
            None => RiskLevel::Moderate,
        }
    }

    fn describe(&self, params: &ToolParams) -> String {
        let path = optional_str(params, "file_path").unwrap_or("?");
        let bytes = optional_str(params, "content").map_or(0, str::len);
        match self.target(params) {
            Some(target) if target.exists() => format!("Overwrite {path} ({bytes} bytes)"),
            _ => format!("Create {path} ({bytes} bytes)"),
        }
    }

    fn preview(&self, params: &ToolParams) -> String {
        let content = optional_str(params, "content").unwrap_or_default();
        let shown = truncate_utf8(content, PREVIEW_BYTES);
        if shown.len() < content.len() {
            format!("{shown}\n... ({} more bytes)", content.len() - shown.len())
        } else {
            shown.to_string()
        }
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(params, "file_path")?;
        let content = params.get("content").and_then(Value::as_str).unwrap_or_default();
        let path = resolve_path(&self.root, raw_path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
        tokio::fs::write(&path, content).await?;

        tracing::info!(path = %path.display(), bytes = content.len(), existed, "file written");
        let verb = if existed { "Updated" } else { "Created" };
        Ok(ToolResult::ok(
            format!("Wrote {} bytes to {}", content.len(), path.display()),
            format!("✓ {verb} {raw_path}"),
        ))
    }
}

// ─── read_file ──────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn display_name(&self) -> &str {
        "Read File"
    }

    fn description(&self) -> &str {
        "Read a text file. Lines are numbered; use offset and limit for large files."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path of the file to read"},
                "offset": {"type": "integer", "description": "First line to return (1-based)"},
                "limit": {"type": "integer", "description": "Maximum number of lines"}
            },
            "required": ["file_path"]
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn risk(&self, params: &ToolParams) -> RiskLevel {
        optional_str(params, "file_path")
            .map(|p| classify_read(&resolve_path(&self.root, p)))
            .unwrap_or(RiskLevel::Safe)
    }

    fn describe(&self, params: &ToolParams) -> String {
        format!("Read {}", optional_str(params, "file_path").unwrap_or("?"))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        let raw_path = required_str(params, "file_path")?;
        let path = resolve_path(&self.root, raw_path);

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::Execution {
                reason: format!("cannot read {raw_path}: {e}"),
            })?;
        if metadata.is_dir() {
            return Err(ToolError::Execution {
                reason: format!("{raw_path} is a directory"),
            });
        }
        if metadata.len() > MAX_READ_BYTES {
            return Err(ToolError::Execution {
                reason: format!(
                    "{raw_path} is {} bytes, larger than the {MAX_READ_BYTES} byte limit",
                    metadata.len()
                ),
            });
        }

        let bytes = tokio::fs::read(&path).await?;
        let text = String::from_utf8_lossy(&bytes);
        let offset = optional_u64(params, "offset").unwrap_or(1).max(1) as usize;
        let limit = optional_u64(params, "limit").unwrap_or(DEFAULT_READ_LIMIT) as usize;

        let total = text.lines().count();
        let numbered: Vec<String> = text
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
            .map(|(i, line)| format!("{:4} | {line}", i + 1))
            .collect();
        let shown = numbered.len();

        let mut content = numbered.join("\n");
        if offset - 1 + shown < total {
            content.push_str(&format!(
                "\n[{} more lines, continue with offset {}]",
                total - (offset - 1 + shown),
                offset + shown
            ));
        }

        tracing::debug!(path = %path.display(), lines = shown, total, "file read");
        Ok(ToolResult::ok(
            content,
            format!("✓ Read {raw_path} ({shown} of {total} lines)"),
        ))
    }
}

// ─── list_directory ─────────────────────────────────────────────────────────

pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn display_name(&self) -> &str {
        "List Directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory, directories first."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: current)"},
                "show_hidden": {"type": "boolean", "description": "Include dot-files"}
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn risk(&self, params: &ToolParams) -> RiskLevel {
        classify_read(&resolve_path(&self.root, optional_str(params, "path").unwrap_or(".")))
    }

    fn describe(&self, params: &ToolParams) -> String {
        format!("List {}", optional_str(params, "path").unwrap_or("."))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        let raw_path = optional_str(params, "path").unwrap_or(".");
        let show_hidden = params
            .get("show_hidden")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let path = resolve_path(&self.root, raw_path);

        if !path.exists() {
            return Err(ToolError::Execution {
                reason: format!("directory not found: {raw_path}"),
            });
        }
        if !path.is_dir() {
            return Err(ToolError::Execution {
                reason: format!("not a directory: {raw_path}"),
            });
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !show_hidden && name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs.push(format!("{name}/"));
            } else if file_type.is_symlink() {
                files.push(format!("{name}@"));
            } else {
                files.push(name);
            }
        }
        dirs.sort();
        files.sort();

        let total = dirs.len() + files.len();
        let mut entries: Vec<String> = dirs.into_iter().chain(files).take(MAX_LIST_ENTRIES).collect();
        if total > MAX_LIST_ENTRIES {
            entries.push(format!("[{} more entries]", total - MAX_LIST_ENTRIES));
        }

        let content = if entries.is_empty() {
            format!("{raw_path} is empty")
        } else {
            entries.join("\n")
        };
        Ok(ToolResult::ok(
            content,
            format!("✓ Listed {raw_path} ({total} entries)"),
        ))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
