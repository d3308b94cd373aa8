//! Token estimation for context window management.
//!
//! Used whenever the backend cannot count tokens itself. The estimate is
//! character length divided by a fixed ratio, plus a small per-message
//! overhead for role labels and formatting.

use super::types::{Message, Part, Role};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for a function call or response wrapper.
const FUNCTION_PART_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Public API ─────────────────────────────────────────────────────────────

/// Estimate the token count of a piece of text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(CHARS_PER_TOKEN)).unwrap_or(u32::MAX)
}

/// Estimate the token count of one message.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;
    for part in &message.parts {
        total = total.saturating_add(match part {
            Part::Text { text } => estimate_tokens(text),
            Part::FunctionCall { name, args } => FUNCTION_PART_OVERHEAD_TOKENS
                .saturating_add(estimate_tokens(name))
                .saturating_add(estimate_tokens(
                    &serde_json::Value::Object(args.clone()).to_string(),
                )),
            Part::FunctionResponse { name, response } => FUNCTION_PART_OVERHEAD_TOKENS
                .saturating_add(estimate_tokens(name))
                .saturating_add(estimate_tokens(&response.to_string())),
        });
    }
    total
}

/// Estimate the token count of a whole history.
pub fn estimate_history_tokens(history: &[Message]) -> u32 {
    history
        .iter()
        .map(estimate_message_tokens)
        .fold(0u32, u32::saturating_add)
}

/// Render history as a plain transcript, one `Role: text` block per message.
///
/// This is what gets sent to the backend tokenizer and to the summarizer.
pub fn render_transcript(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", role_label(m.role), m.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build a one-line summary of a message, used when the summarizer is
/// unavailable and for log lines.
pub fn summarize_turn(message: &Message) -> String {
    let text = message.text();
    let limit = match message.role {
        Role::Function => 60,
        _ => 80,
    };
    let preview = truncate_utf8(&text, limit);
    let ellipsis = if preview.len() < text.len() { "..." } else { "" };
    format!("{}: {preview}{ellipsis}", role_label(message.role))
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Model => "Assistant",
        Role::Function => "Tool result",
        Role::System => "System",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        // "hello" = 5 chars → ceil(5/4) = 2
        assert_eq!(estimate_tokens("hello"), 2);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn test_estimate_counts_chars_not_bytes() {
        // 3 chars, 9 bytes
        assert_eq!(estimate_tokens("═══"), 1);
    }

    #[test]
    fn test_estimate_message_tokens_text_only() {
        let msg = Message::user("Hello, world!"); // 13 chars → 4
        assert_eq!(estimate_message_tokens(&msg), 4 + 4);
    }

    #[test]
    fn test_function_parts_cost_more_than_overhead() {
        let mut args = serde_json::Map::new();
        args.insert("path".into(), serde_json::json!("/tmp"));
        let msg = Message::function_call("list_directory", args);
        assert!(estimate_message_tokens(&msg) > MESSAGE_OVERHEAD_TOKENS + FUNCTION_PART_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_history_tokens_sum() {
        let history = vec![Message::user("abcd"), Message::model("efgh")];
        assert_eq!(estimate_history_tokens(&history), 2 * (4 + 1));
    }

    #[test]
    fn test_render_transcript_labels_roles() {
        let history = vec![Message::user("hi"), Message::model("hello")];
        assert_eq!(render_transcript(&history), "User: hi\n\nAssistant: hello");
    }

    #[test]
    fn test_summarize_turn_truncates() {
        let summary = summarize_turn(&Message::user("x".repeat(200)));
        assert!(summary.starts_with("User: xxx"));
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_truncate_utf8_within_multibyte() {
        let text = "═══"; // 9 bytes total
        assert_eq!(truncate_utf8(text, 4), "═");
        assert_eq!(truncate_utf8(text, 6), "══");
        assert_eq!(truncate_utf8("short", 100), "short");
    }
}
