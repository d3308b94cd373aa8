//! Pattern stage of the intent router.
//!
//! A fixed, ordered table of regex rules. Each rule names a tool, a
//! confidence, and an extractor that turns captures into parameters. The
//! table is data: adding a phrasing means adding a row, not a branch.
//!
//! Rules run against the user text with fenced code blocks removed; the
//! first fenced block is handed to extractors separately so a file-creation
//! request can pick up the content the user pasted.
//!
//! Detection is deterministic: the same text always yields the same calls.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use super::types::{DetectedToolCall, ToolParams};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Confidence assigned when a rule matched but could not extract every
/// required parameter. Below any sane execution threshold, so later stages
/// get a chance to fill the gap.
const PARTIAL_MATCH_CONFIDENCE: f32 = 0.5;

/// Binaries recognised when a message is nothing but a command line.
/// English-looking verbs (`make`, `find`, `touch`) are left out on purpose.
const COMMAND_BINARIES: &str = r"ls|rm|mkdir|rmdir|git|cargo|rustc|rustup|npm|npx|pnpm|yarn|node|python|python3|pip|pip3|pytest|docker|kubectl|grep|rg|chmod|chown|cp|mv|pwd|whoami|tar|unzip|curl|wget|sudo|go|javac|mvn|gradle";

// ─── Rule Table ─────────────────────────────────────────────────────────────

type Extractor = fn(&Captures<'_>, &PatternInput<'_>) -> Option<ToolParams>;

struct PatternRule {
    tool: &'static str,
    confidence: f32,
    regex: Regex,
    /// Parameters the call needs to be runnable as-is.
    required: &'static [&'static str],
    extract: Extractor,
}

/// What extractors can see.
struct PatternInput<'a> {
    /// User text with fenced blocks replaced by a blank line.
    prose: &'a str,
    /// The first fenced code block, if any.
    code: Option<&'a str>,
}

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| compile(r"(?s)```[\w+\-.#]*[^\n]*\n(?P<code>.*?)```"));

const PATH: &str = r#"[`'"]?(?P<path>[\w./\\~\-]+\.[\w]+)[`'"]?"#;
const DIR_PATH: &str = r#"[`'"]?(?P<path>[\w./\\~\-]+)[`'"]?"#;

static RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        // ── write_file ──
        PatternRule {
            tool: "write_file",
            confidence: 0.9,
            regex: compile(&format!(
                r"(?i)\b(?:create|make|write|save|generate|add)\s+(?:a\s+|an\s+|the\s+|new\s+)*(?:\w+\s+)?(?:file|script|module)\s+(?:called\s+|named\s+|at\s+)?{PATH}"
            )),
            required: &["file_path", "content"],
            extract: extract_write_file,
        },
        PatternRule {
            tool: "write_file",
            confidence: 0.85,
            regex: compile(&format!(
                r"(?i)\b(?:save|put|write)\s+(?:this|it|that|the\s+following|the\s+code)\s+(?:to|as|in|into)\s+{PATH}"
            )),
            required: &["file_path", "content"],
            extract: extract_write_file,
        },
        PatternRule {
            tool: "write_file",
            confidence: 0.85,
            regex: compile(&format!(r"(?i)^\s*(?:please\s+)?(?:create|write)\s+{PATH}")),
            required: &["file_path", "content"],
            extract: extract_write_file,
        },
        // ── run_shell_command ──
        PatternRule {
            tool: "run_shell_command",
            confidence: 0.95,
            regex: compile(r"(?i)\b(?:run|execute|exec)\s+(?:the\s+|this\s+)?(?:shell\s+)?(?:command\s+)?`(?P<cmd>[^`\n]+)`"),
            required: &["command"],
            extract: extract_command,
        },
        PatternRule {
            tool: "run_shell_command",
            confidence: 0.85,
            regex: compile(r#"(?im)\b(?:run|execute)\s+(?:the\s+)?(?:shell\s+)?command\s*:?\s+["']?(?P<cmd>[^"'\n]+?)["']?\s*$"#),
            required: &["command"],
            extract: extract_command,
        },
        PatternRule {
            tool: "run_shell_command",
            confidence: 0.85,
            regex: compile(&format!(
                r"(?i)^\s*(?:please\s+)?(?:run|execute)\s+(?P<cmd>(?:sudo\s+)?(?:{COMMAND_BINARIES})\b[^\n]*?)\s*$"
            )),
            required: &["command"],
            extract: extract_command,
        },
        PatternRule {
            tool: "run_shell_command",
            confidence: 0.8,
            regex: compile(r"(?m)^\s*\$\s+(?P<cmd>\S[^\n]*?)\s*$"),
            required: &["command"],
            extract: extract_command,
        },
        PatternRule {
            tool: "run_shell_command",
            confidence: 0.8,
            regex: compile(&format!(
                r"^\s*(?P<cmd>(?:sudo\s+)?(?:{COMMAND_BINARIES})(?:\s+[^\n]*)?)\s*$"
            )),
            required: &["command"],
            extract: extract_command,
        },
        // ── read_file ──
        PatternRule {
            tool: "read_file",
            confidence: 0.85,
            regex: compile(&format!(
                r"(?i)\b(?:read|show|open|cat|display|view|print)\s+(?:me\s+)?(?:what'?s\s+in\s+)?(?:the\s+)?(?:contents?\s+of\s+)?(?:the\s+)?(?:file\s+)?{PATH}"
            )),
            required: &["file_path"],
            extract: extract_file_path,
        },
        PatternRule {
            tool: "read_file",
            confidence: 0.8,
            regex: compile(&format!(r"(?i)\bwhat'?s\s+in\s+(?:the\s+file\s+)?{PATH}")),
            required: &["file_path"],
            extract: extract_file_path,
        },
        // ── list_directory ──
        PatternRule {
            tool: "list_directory",
            confidence: 0.85,
            regex: compile(&format!(
                r"(?i)\b(?:list|show)\s+(?:me\s+)?(?:all\s+)?(?:the\s+)?(?:files|directory|folder|dir)(?:\s+(?:in|of|under|inside)\s+(?:the\s+)?(?:directory\s+|folder\s+)?{DIR_PATH})?"
            )),
            required: &["path"],
            extract: extract_directory,
        },
        PatternRule {
            tool: "list_directory",
            confidence: 0.8,
            regex: compile(&format!(r"(?i)\bwhat\s+files\s+are\s+(?:in|under)\s+(?:the\s+)?{DIR_PATH}")),
            required: &["path"],
            extract: extract_directory,
        },
        // ── analyze_project ──
        PatternRule {
            tool: "analyze_project",
            confidence: 0.85,
            regex: compile(
                r"(?i)\b(?:analy[sz]e|summari[sz]e|inspect|explore|give\s+me\s+an?\s+overview\s+of)\s+(?:the\s+|this\s+|my\s+|our\s+)?(?:current\s+)?(?:project|codebase|repo(?:sitory)?|workspace)\b",
            ),
            required: &["path"],
            extract: extract_project,
        },
    ]
});

static ACTION_VERB: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(?:create|make|write|save|run|execute|delete|remove|read|open|list|install|build|generate|analy[sz]e|refactor|fix|add|update|rename|move|compile|test|deploy)\b")
});

static ACTION_OBJECT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(?:file|files|folder|directory|command|script|project|code|function|module|test|tests|package|dependency|repo|class|component)\b")
});

fn compile(pattern: &str) -> Regex {
    // Patterns are compile-time constants covered by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid router pattern {pattern}: {e}"))
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Run the rule table over `text`.
///
/// Returns at most one call per tool, in rule-table order. Only tools for
/// which `is_known` returns true are considered.
pub fn detect(text: &str, is_known: impl Fn(&str) -> bool) -> Vec<DetectedToolCall> {
    let prose = FENCED_BLOCK.replace_all(text, "\n");
    let input = PatternInput {
        prose: &prose,
        code: extract_fenced_code(text),
    };

    let mut seen: HashSet<&'static str> = HashSet::new();
    let mut calls = Vec::new();

    for rule in RULES.iter() {
        if seen.contains(rule.tool) || !is_known(rule.tool) {
            continue;
        }
        let Some(caps) = rule.regex.captures(input.prose) else {
            continue;
        };
        let Some(params) = (rule.extract)(&caps, &input) else {
            continue;
        };

        let complete = rule.required.iter().all(|k| params.contains_key(*k));
        let confidence = if complete {
            rule.confidence
        } else {
            rule.confidence.min(PARTIAL_MATCH_CONFIDENCE)
        };

        tracing::debug!(tool = rule.tool, confidence, complete, "pattern matched");
        seen.insert(rule.tool);
        calls.push(DetectedToolCall {
            tool_name: rule.tool.to_string(),
            params,
            confidence,
        });
    }

    calls
}

/// The body of the first fenced code block, without its final newline.
pub fn extract_fenced_code(text: &str) -> Option<&str> {
    let code = FENCED_BLOCK.captures(text)?.name("code")?.as_str();
    let code = code.strip_suffix('\n').unwrap_or(code);
    Some(code.strip_suffix('\r').unwrap_or(code))
}

/// Keyword heuristic: does this read like a request to *do* something?
pub fn looks_like_action_request(text: &str) -> bool {
    ACTION_VERB.is_match(text) && ACTION_OBJECT.is_match(text)
}

/// Make a bare relative path explicit: `hello.py` → `./hello.py`.
///
/// Absolute, home-relative and already-relative paths are kept. Trailing
/// sentence punctuation is dropped.
pub fn normalize_path(raw: &str) -> String {
    let is_punct = |c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?');
    let trimmed = raw
        .trim()
        .trim_end_matches(is_punct)
        .trim_matches(|c| c == '`' || c == '"' || c == '\'')
        .trim_end_matches(is_punct);
    if trimmed.is_empty() || trimmed == "." {
        return ".".to_string();
    }
    let explicit = trimmed.starts_with('/')
        || trimmed.starts_with("./")
        || trimmed.starts_with("../")
        || trimmed.starts_with('~')
        || trimmed.starts_with('\\')
        || trimmed.chars().nth(1) == Some(':');
    if explicit {
        trimmed.to_string()
    } else {
        format!("./{trimmed}")
    }
}

// ─── Extractors ─────────────────────────────────────────────────────────────

fn extract_write_file(caps: &Captures<'_>, input: &PatternInput<'_>) -> Option<ToolParams> {
    let mut params = ToolParams::new();
    params.insert(
        "file_path".into(),
        Value::String(normalize_path(caps.name("path")?.as_str())),
    );
    if let Some(code) = input.code {
        params.insert("content".into(), Value::String(code.to_string()));
    }
    Some(params)
}

fn extract_command(caps: &Captures<'_>, _input: &PatternInput<'_>) -> Option<ToolParams> {
    let command = caps.name("cmd")?.as_str().trim();
    if command.is_empty() {
        return None;
    }
    let mut params = ToolParams::new();
    params.insert("command".into(), Value::String(command.to_string()));
    Some(params)
}

fn extract_file_path(caps: &Captures<'_>, _input: &PatternInput<'_>) -> Option<ToolParams> {
    let mut params = ToolParams::new();
    params.insert(
        "file_path".into(),
        Value::String(normalize_path(caps.name("path")?.as_str())),
    );
    Some(params)
}

fn extract_directory(caps: &Captures<'_>, _input: &PatternInput<'_>) -> Option<ToolParams> {
    let path = caps
        .name("path")
        .map(|m| normalize_path(m.as_str()))
        .unwrap_or_else(|| ".".to_string());
    let mut params = ToolParams::new();
    params.insert("path".into(), Value::String(path));
    Some(params)
}

fn extract_project(_caps: &Captures<'_>, _input: &PatternInput<'_>) -> Option<ToolParams> {
    let mut params = ToolParams::new();
    params.insert("path".into(), Value::String(".".into()));
    Some(params)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
