//! Function-call extraction from free-form model text.
//!
//! When the model is asked to act, it is instructed to answer with nothing
//! but:
//!
//! ```text
//! {"function_call": {"name": "write_file", "arguments": {"file_path": "./a.py"}}}
//! ```
//!
//! Local models rarely comply exactly. They wrap the object in markdown
//! fences, prefix it with prose, leave trailing commas, or drop the final
//! brace. Extraction therefore:
//!
//! 1. strips markdown code fences,
//! 2. scans for the first balanced `{...}` object (braces inside strings
//!    are ignored),
//! 3. parses it, applying light repair when strict parsing fails,
//! 4. validates the `function_call` shape.
//!
//! Any failure yields `None`: the text is then treated as a conversational
//! reply.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Opening of a call object, tolerating whitespace after the brace.
static CALL_OPENING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\{\s*"function_call"\s*:"#).expect("valid call-opening regex"));

// ─── Public API ──────────────────────────────────────────────────────────────

/// A function call the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Extract a `{"function_call": ...}` object from model output.
///
/// Returns `None` when no well-formed call is present.
pub fn extract_function_call(text: &str) -> Option<FunctionCall> {
    let stripped = strip_code_fences(text);

    // A prose preamble may itself contain braces ("use {} for formatting"),
    // so keep scanning past objects that are not function calls.
    let mut offset = 0;
    while let Some((start, end)) = find_json_object(&stripped[offset..]) {
        let candidate = &stripped[offset + start..offset + end];
        if let Some(value) = parse_lenient(candidate) {
            if let Some(call) = function_call_from_value(&value) {
                return Some(call);
            }
        }
        offset += end;
    }

    // Unbalanced tail: the model stopped before closing its braces.
    let tail_start = CALL_OPENING.find(&stripped)?.start();
    let value = repair_malformed_json(&stripped[tail_start..])?;
    function_call_from_value(&value)
}

/// Remove markdown code fence lines (```` ``` ```` / ```` ```json ````) and
/// keep everything else.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Find the byte range of the first balanced `{...}` object in `text`.
///
/// Braces inside double-quoted strings are ignored, honouring backslash
/// escapes, so `{"content": "fn main() {"}` is one object.
pub fn find_json_object(text: &str) -> Option<(usize, usize)> {
    let start = text.find('{')?;
    let end = find_matching_brace(text, start)?;
    Some((start, end + 1))
}

/// Find the matching `}` for a `{` at position `start`.
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if b == b'\\' {
                escape_next = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate the `{"function_call": {"name", "arguments"}}` shape.
///
/// `arguments` may be an object or a JSON-encoded string holding an object
/// (OpenAI-style); it defaults to empty when absent.
fn function_call_from_value(value: &Value) -> Option<FunctionCall> {
    let call = value.get("function_call")?.as_object()?;
    let name = call.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = match call.get("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match parse_lenient(encoded)? {
            Value::Object(map) => map,
            _ => return None,
        },
        Some(_) => return None,
    };

    Some(FunctionCall {
        name: name.to_string(),
        arguments,
    })
}

// ─── Malformed JSON Repair ──────────────────────────────────────────────────

/// Parse strictly, then fall back to repair.
fn parse_lenient(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw)
        .ok()
        .or_else(|| repair_malformed_json(raw))
}

/// Attempt to repair malformed JSON emitted by a model.
///
/// Common malformations:
/// 1. Trailing commas: `{"a":1,}`
/// 2. Missing closing braces (generation stopped early)
/// 3. Raw control characters inside string values
///
/// Returns `Some(value)` if repair succeeds, `None` if irreparable.
pub fn repair_malformed_json(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let mut repaired = repair_trailing_commas(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_unbalanced_braces(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_control_characters(&repaired);
    serde_json::from_str::<Value>(&repaired).ok()
}

/// Remove trailing commas before `}` or `]` (outside strings).
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            result.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }

    result
}

/// Close an unterminated string and append missing `]` / `}` in the
/// reverse order they were opened.
fn repair_unbalanced_braces(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut result = input.trim_end().to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Remove non-printable control characters that break JSON parsing.
/// Preserves `\n`, `\r`, `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_call() {
        let text = r#"{"function_call": {"name": "read_file", "arguments": {"file_path": "src/main.rs"}}}"#;
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["file_path"], "src/main.rs");
    }

    #[test]
    fn test_extract_fenced_call_with_preamble() {
        let text = "Sure, I'll list it.\n```json\n{\"function_call\": {\"name\": \"list_directory\", \"arguments\": {\"path\": \".\"}}}\n```";
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "list_directory");
    }

    #[test]
    fn test_braces_inside_strings_do_not_confuse_scan() {
        let text = r#"{"function_call": {"name": "write_file", "arguments": {"file_path": "./m.rs", "content": "fn main() { println!(\"}\"); }"}}}"#;
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "write_file");
        assert_eq!(
            call.arguments["content"],
            "fn main() { println!(\"}\"); }"
        );
    }

    #[test]
    fn test_skips_unrelated_object_before_call() {
        let text = r#"Config is {"debug": true}. {"function_call": {"name": "analyze_project", "arguments": {}}}"#;
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "analyze_project");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_string_encoded_arguments() {
        let text = r#"{"function_call": {"name": "run_shell_command", "arguments": "{\"command\": \"ls\"}"}}"#;
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.arguments["command"], "ls");
    }

    #[test]
    fn test_repairs_trailing_comma_and_missing_braces() {
        let text = r#"{"function_call": {"name": "read_file", "arguments": {"file_path": "a.txt",}"#;
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["file_path"], "a.txt");
    }

    #[test]
    fn test_truncated_call_with_spaced_opening() {
        let text = "Sure.\n{ \"function_call\" : {\"name\": \"list_directory\", \"arguments\": {\"path\": \"src\"";
        let call = extract_function_call(text).unwrap();
        assert_eq!(call.name, "list_directory");
        assert_eq!(call.arguments["path"], "src");
    }

    #[test]
    fn test_plain_prose_yields_none() {
        assert!(extract_function_call("Rust ownership means each value has one owner.").is_none());
    }

    #[test]
    fn test_wrong_shape_yields_none() {
        assert!(extract_function_call(r#"{"name": "read_file"}"#).is_none());
        assert!(extract_function_call(r#"{"function_call": {"name": ""}}"#).is_none());
        assert!(extract_function_call(r#"{"function_call": {"name": "x", "arguments": 3}}"#).is_none());
    }

    #[test]
    fn test_find_json_object_range() {
        let text = r#"prefix {"a": "}"} suffix"#;
        let (start, end) = find_json_object(text).unwrap();
        assert_eq!(&text[start..end], r#"{"a": "}"}"#);
    }

    #[test]
    fn test_repair_trailing_commas_ignores_strings() {
        assert_eq!(repair_trailing_commas(r#"{"a": ",}",}"#), r#"{"a": ",}"}"#);
    }

    #[test]
    fn test_repair_unbalanced_closes_string_and_nesting() {
        assert_eq!(repair_unbalanced_braces(r#"{"a": ["x", "y"#), r#"{"a": ["x", "y"]}"#);
    }
}
