//! Shared types for the agent core.
//!
//! Conversation messages, tool results, routing decisions and confirmation
//! types used across the router, registry, orchestrator and session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool parameters: a JSON object keyed by parameter name.
pub type ToolParams = Map<String, Value>;

/// Prefix of the synthetic message that replaces compacted history.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary: ";

// ─── Conversation Messages ──────────────────────────────────────────────────

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
    /// Carries a tool's response back to the model.
    Function,
    /// Informational notices: summaries, model switches, failures.
    System,
}

/// One piece of a message. Exactly one kind per part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Part {
    Text { text: String },
    FunctionCall { name: String, args: ToolParams },
    FunctionResponse { name: String, response: Value },
}

/// A single message in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// A message holding a single text part.
    pub fn new_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Text { text: text.into() }],
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new_text(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new_text(Role::Model, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new_text(Role::System, text)
    }

    /// The model's request to run a tool.
    pub fn function_call(name: impl Into<String>, args: ToolParams) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::FunctionCall {
                name: name.into(),
                args,
            }],
            timestamp: Utc::now(),
        }
    }

    /// A tool's response, addressed back to the model.
    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            role: Role::Function,
            parts: vec![Part::FunctionResponse {
                name: name.into(),
                response,
            }],
            timestamp: Utc::now(),
        }
    }

    /// The synthetic message standing in for compacted history.
    pub fn summary(summary_text: &str) -> Self {
        Self::system(format!("{SUMMARY_PREFIX}{}]", summary_text.trim()))
    }

    /// Concatenated text parts. Function parts render as short tags.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { text } => text.clone(),
                Part::FunctionCall { name, args } => {
                    format!("[call {name} {}]", Value::Object(args.clone()))
                }
                Part::FunctionResponse { name, response } => {
                    format!("[{name} returned {response}]")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether this is a compaction summary.
    pub fn is_summary(&self) -> bool {
        self.role == Role::System
            && matches!(self.parts.first(), Some(Part::Text { text }) if text.starts_with(SUMMARY_PREFIX))
    }
}

// ─── Tool Results ───────────────────────────────────────────────────────────

/// Outcome of one tool call.
///
/// `content` is what the model sees; `display_result` is what the user sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
    pub display_result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result.
    pub fn ok(content: impl Into<String>, display_result: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            display_result: display_result.into(),
            error: None,
        }
    }

    /// A failed result carrying the error message in every field the
    /// consumers read.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        let message = error.to_string();
        Self {
            success: false,
            content: format!("Error: {message}"),
            display_result: format!("✗ {message}"),
            error: Some(message),
        }
    }

    /// The model-facing payload for a function response part.
    pub fn to_response_value(&self) -> Value {
        match &self.error {
            None => serde_json::json!({ "success": true, "content": self.content }),
            Some(err) => serde_json::json!({ "success": false, "error": err }),
        }
    }
}

/// One executed (or refused) tool call, recorded per turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub params: ToolParams,
    pub result: ToolResult,
    pub execution_time_ms: u64,
    /// Whether the action passed through an explicit confirmation.
    pub confirmed: bool,
}

// ─── Risk & Confirmation ────────────────────────────────────────────────────

/// How much damage an action can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Dangerous,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Dangerous => "dangerous",
        };
        f.write_str(label)
    }
}

/// Everything a human needs to approve or refuse an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDetails {
    pub tool_name: String,
    pub params: ToolParams,
    /// One-line description of what will happen.
    pub description: String,
    pub risk: RiskLevel,
    /// Longer preview, e.g. the file content about to be written.
    pub preview: String,
}

/// A confirmation handler's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConfirmationResponse {
    /// Allow this call only.
    Confirmed,
    /// Allow this tool for the rest of the session (not for dangerous calls).
    ConfirmedForSession,
    /// Refuse.
    Rejected,
}

// ─── Routing ────────────────────────────────────────────────────────────────

/// Which router stage produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Pattern,
    Classification,
    LlmGuided,
    Fallback,
}

/// A tool the router believes the user wants run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedToolCall {
    pub tool_name: String,
    pub params: ToolParams,
    /// In `[0, 1]`.
    pub confidence: f32,
}

/// The router's verdict for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// True iff at least one call meets the execution threshold.
    pub execute_tools: bool,
    /// Detected calls in detection order.
    pub tool_calls: Vec<DetectedToolCall>,
    pub reasoning: String,
    pub route: Route,
    /// The text looked like an action request but nothing was confident.
    #[serde(default)]
    pub ambiguous: bool,
    /// Model text produced while routing that can serve as the reply when
    /// no tool runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_reply: Option<String>,
}

impl RoutingDecision {
    /// Build a decision, deriving `execute_tools` from `threshold`.
    pub fn new(
        tool_calls: Vec<DetectedToolCall>,
        threshold: f32,
        route: Route,
        reasoning: impl Into<String>,
    ) -> Self {
        let execute_tools = tool_calls.iter().any(|c| c.confidence >= threshold);
        Self {
            execute_tools,
            tool_calls,
            reasoning: reasoning.into(),
            route,
            ambiguous: false,
            draft_reply: None,
        }
    }

    /// No tools; plain conversation.
    pub fn conversational(route: Route, reasoning: impl Into<String>) -> Self {
        Self::new(Vec::new(), 1.0, route, reasoning)
    }

    /// Calls at or above `threshold`, ordered by descending confidence with
    /// detection order breaking ties.
    pub fn executable_calls(&self, threshold: f32) -> Vec<&DetectedToolCall> {
        let mut calls: Vec<&DetectedToolCall> = self
            .tool_calls
            .iter()
            .filter(|c| c.confidence >= threshold)
            .collect();
        // `sort_by` is stable, so equal confidences keep detection order.
        calls.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        calls
    }
}

// ─── Turn & Budget ──────────────────────────────────────────────────────────

/// What one user turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub reply: String,
    pub tool_executions: Vec<ToolExecution>,
    pub route: Route,
    /// The backend failed; `reply` holds the notice appended to history.
    pub failed: bool,
}

/// Context window usage for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextBudget {
    pub used: u32,
    pub limit: u32,
    /// Token count above which the next append compacts history.
    pub compaction_at: u32,
    pub remaining: u32,
}

// ─── Tests ──────────────────────────────────────────────────────────────────
