//! Classification stage: a compact prompt for the lightweight classifier
//! model and a lenient parser for its line-oriented answer.
//!
//! Expected answer shape:
//!
//! ```text
//! TOOLS: read_file:0.9,list_directory:0.4
//! PARAMS: file_path:./src/main.rs
//! REASON: the user wants to see a file
//! ```
//!
//! `TOOLS: NONE` means "conversational". Anything the parser does not
//! understand is skipped, never an error.

use serde_json::Value;

use super::tool_registry::ToolSummary;
use super::types::ToolParams;

/// A parsed classifier answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierAnswer {
    /// Known tools with clamped confidences, in answer order, deduplicated.
    pub tools: Vec<(String, f32)>,
    pub params: ToolParams,
    pub reason: String,
    /// The model said `TOOLS: NONE`.
    pub no_tools: bool,
}

/// Build the classifier prompt.
pub fn build_prompt(user_text: &str, tools: &[ToolSummary], recent_context: &[String]) -> String {
    let mut prompt = String::from(
        "You decide whether a request to a local development assistant needs a tool.\n\nAvailable tools:\n",
    );
    for tool in tools {
        prompt.push_str(&format!("- {}: {}", tool.name, tool.description));
        if !tool.parameters.is_empty() {
            prompt.push_str(&format!(" (params: {})", tool.parameters.join(", ")));
        }
        prompt.push('\n');
    }

    if !recent_context.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for line in recent_context {
            prompt.push_str(line);
            prompt.push('\n');
        }
    }

    prompt.push_str(&format!("\nRequest: {user_text}\n\n"));
    prompt.push_str(
        "Answer with exactly three lines and nothing else:\n\
         TOOLS: tool_name:confidence,... (confidence between 0 and 1, or TOOLS: NONE)\n\
         PARAMS: key:value,... (empty if none)\n\
         REASON: one short sentence\n",
    );
    prompt
}

/// Parse a classifier answer.
///
/// Returns `None` when the answer contains no usable `TOOLS` line: no line at
/// all, or only malformed / unknown entries.
pub fn parse_answer(text: &str, is_known: impl Fn(&str) -> bool) -> Option<ClassifierAnswer> {
    let mut tools: Vec<(String, f32)> = Vec::new();
    let mut params = ToolParams::new();
    let mut reason = String::new();
    let mut no_tools = false;
    let mut saw_tools_line = false;

    for raw in text.lines() {
        let line = raw
            .trim()
            .trim_start_matches(|c| c == '-' || c == '*' || c == '#')
            .trim()
            .replace("**", "");
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_uppercase().as_str() {
            "TOOLS" | "TOOL" if !saw_tools_line => {
                saw_tools_line = true;
                if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    no_tools = true;
                    continue;
                }
                for (name, confidence) in parse_tool_entries(value) {
                    if !is_known(&name) {
                        tracing::debug!(tool = %name, "classifier named an unknown tool");
                        continue;
                    }
                    if !tools.iter().any(|(existing, _)| *existing == name) {
                        tools.push((name, confidence));
                    }
                }
            }
            "PARAMS" | "PARAMETERS" => parse_params_into(value, &mut params),
            "REASON" if reason.is_empty() => reason = value.to_string(),
            _ => {}
        }
    }

    if no_tools {
        return Some(ClassifierAnswer {
            tools: Vec::new(),
            params,
            reason,
            no_tools: true,
        });
    }
    if tools.is_empty() {
        return None;
    }
    Some(ClassifierAnswer {
        tools,
        params,
        reason,
        no_tools: false,
    })
}

fn parse_tool_entries(value: &str) -> Vec<(String, f32)> {
    value
        .split(',')
        .filter_map(|entry| {
            let (name, confidence) = entry.trim().rsplit_once(':')?;
            let name = name.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
            let confidence: f32 = confidence.trim().parse().ok()?;
            if name.is_empty() || !confidence.is_finite() {
                return None;
            }
            Some((name.to_string(), confidence.clamp(0.0, 1.0)))
        })
        .collect()
}

/// `k:v,k:v`. A fragment without a colon is treated as the continuation of
/// the previous value, so `command:echo a, b` keeps its comma.
fn parse_params_into(value: &str, params: &mut ToolParams) {
    let mut last_key: Option<String> = None;
    for fragment in value.split(',') {
        match fragment.split_once(':') {
            Some((key, val)) if is_param_key(key) => {
                let key = key.trim().to_string();
                params.insert(key.clone(), coerce(val.trim()));
                last_key = Some(key);
            }
            _ => {
                let Some(key) = &last_key else { continue };
                if let Some(Value::String(existing)) = params.get_mut(key) {
                    existing.push(',');
                    existing.push_str(fragment);
                }
            }
        }
    }
}

fn is_param_key(key: &str) -> bool {
    let key = key.trim();
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn coerce(raw: &str) -> Value {
    let unquoted = raw.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    match unquoted {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = unquoted.parse::<i64>() {
                Value::from(n)
            } else if let Some(n) = unquoted
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .and_then(serde_json::Number::from_f64)
            {
                Value::Number(n)
            } else {
                Value::String(unquoted.to_string())
            }
        }
    }
}
