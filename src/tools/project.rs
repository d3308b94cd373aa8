//! `analyze_project`: a quick structural overview of a source tree.
//!
//! Walks the tree (bounded by depth and file count), tallies files by
//! language, and reports recognised build manifests and the README title.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, optional_u64, resolve_path};
use crate::agent_core::errors::ToolError;
use crate::agent_core::risk::classify_read;
use crate::agent_core::tool_registry::Tool;
use crate::agent_core::types::{RiskLevel, ToolParams, ToolResult};

const DEFAULT_MAX_DEPTH: u64 = 4;
const MAX_DEPTH_LIMIT: u64 = 12;
const MAX_FILES: usize = 5000;

const SKIPPED_DIRS: &[&str] = &[
    "target", "node_modules", "__pycache__", "venv", "dist", "build",
];

/// Manifest file → what it indicates.
const MANIFESTS: &[(&str, &str)] = &[
    ("Cargo.toml", "Rust (cargo)"),
    ("package.json", "JavaScript/TypeScript (npm)"),
    ("pyproject.toml", "Python (pyproject)"),
    ("requirements.txt", "Python (pip)"),
    ("go.mod", "Go modules"),
    ("pom.xml", "Java (maven)"),
    ("build.gradle", "Java/Kotlin (gradle)"),
    ("Gemfile", "Ruby (bundler)"),
    ("Makefile", "make"),
    ("Dockerfile", "Docker"),
];

fn language_for(extension: &str) -> Option<&'static str> {
    let lang = match extension.to_ascii_lowercase().as_str() {
        "rs" => "Rust",
        "py" => "Python",
        "js" | "mjs" | "cjs" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "go" => "Go",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "c" | "h" => "C",
        "cc" | "cpp" | "cxx" | "hpp" => "C++",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "sh" | "bash" | "zsh" => "Shell",
        "html" | "htm" => "HTML",
        "css" | "scss" => "CSS",
        "md" => "Markdown",
        "toml" | "yaml" | "yml" | "json" => "Config",
        _ => return None,
    };
    Some(lang)
}

#[derive(Debug, Default)]
struct ProjectSummary {
    files: usize,
    dirs: usize,
    truncated: bool,
    languages: BTreeMap<&'static str, usize>,
    manifests: Vec<(String, &'static str)>,
    readme_title: Option<String>,
}

impl ProjectSummary {
    fn render(&self, root: &str) -> String {
        let mut out = format!("Project at {root}\n");
        out.push_str(&format!("Files: {}, directories: {}", self.files, self.dirs));
        if self.truncated {
            out.push_str(&format!(" (stopped after {MAX_FILES} files)"));
        }
        out.push('\n');

        if let Some(title) = &self.readme_title {
            out.push_str(&format!("README: {title}\n"));
        }

        if !self.manifests.is_empty() {
            out.push_str("Build files:\n");
            for (path, kind) in &self.manifests {
                out.push_str(&format!("  - {path}: {kind}\n"));
            }
        }

        if !self.languages.is_empty() {
            let mut langs: Vec<_> = self.languages.iter().collect();
            langs.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            out.push_str("Languages:\n");
            for (lang, count) in langs {
                out.push_str(&format!("  - {lang}: {count} files\n"));
            }
        }
        out.trim_end().to_string()
    }

    fn primary_language(&self) -> Option<&'static str> {
        self.languages
            .iter()
            .filter(|(lang, _)| **lang != "Config" && **lang != "Markdown")
            .max_by_key(|(_, count)| **count)
            .map(|(lang, _)| *lang)
    }
}

fn scan(root: &Path, max_depth: u64) -> std::io::Result<ProjectSummary> {
    let mut summary = ProjectSummary::default();
    let mut stack: Vec<(PathBuf, u64)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if depth == 0 => return Err(e),
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                if SKIPPED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                summary.dirs += 1;
                if depth + 1 < max_depth {
                    stack.push((path, depth + 1));
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            summary.files += 1;
            if let Some(lang) = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(language_for)
            {
                *summary.languages.entry(lang).or_insert(0) += 1;
            }
            if let Some((_, kind)) = MANIFESTS.iter().find(|(m, _)| *m == name) {
                let rel = path.strip_prefix(root).unwrap_or(path.as_path());
                summary.manifests.push((rel.display().to_string(), *kind));
            }
            if depth == 0
                && summary.readme_title.is_none()
                && name.to_ascii_lowercase().starts_with("readme")
            {
                summary.readme_title = readme_title(&path);
            }

            if summary.files >= MAX_FILES {
                summary.truncated = true;
                return Ok(summary);
            }
        }
    }

    summary.manifests.sort();
    Ok(summary)
}

fn readme_title(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

pub struct AnalyzeProjectTool {
    root: PathBuf,
}

impl AnalyzeProjectTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for AnalyzeProjectTool {
    fn name(&self) -> &str {
        "analyze_project"
    }

    fn display_name(&self) -> &str {
        "Analyze Project"
    }

    fn description(&self) -> &str {
        "Summarise a project directory: languages, build files and README."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Project root (default: current)"},
                "max_depth": {"type": "integer", "description": "How many directory levels to scan"}
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
        format!("Analyze project at {}", optional_str(params, "path").unwrap_or("."))
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError> {
        let raw_path = optional_str(params, "path").unwrap_or(".").to_string();
        let max_depth = optional_u64(params, "max_depth")
            .unwrap_or(DEFAULT_MAX_DEPTH)
            .clamp(1, MAX_DEPTH_LIMIT);
        let root = resolve_path(&self.root, &raw_path);
        if !root.is_dir() {
            return Err(ToolError::Execution {
                reason: format!("not a directory: {raw_path}"),
            });
        }

        let summary = tokio::task::spawn_blocking(move || scan(&root, max_depth))
            .await
            .map_err(|e| ToolError::Execution {
                reason: format!("project scan aborted: {e}"),
            })??;

        let display = match summary.primary_language() {
            Some(lang) => format!("✓ Analyzed {raw_path}: {} files, mostly {lang}", summary.files),
            None => format!("✓ Analyzed {raw_path}: {} files", summary.files),
        };
        Ok(ToolResult::ok(summary.render(&raw_path), display))
    }
}
