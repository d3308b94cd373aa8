//! Agent Core: the tool-calling pipeline for devpilot.
//!
//! Submodules:
//! - `session`: History, token accounting, compaction, model switching
//! - `orchestrator`: One user turn from routing to final reply
//! - `router`: Staged intent routing (pattern → classification → LLM-guided)
//! - `patterns`: Regex rule table for the pattern stage
//! - `classifier`: Prompt and lenient parser for the classification stage
//! - `tool_registry`: The `Tool` trait and validated, gated dispatch
//! - `permissions`: Confirmation handlers, session grants, the permission gate
//! - `risk`: Deterministic risk classification for commands and paths
//! - `settings`: Persisted per-session behaviour settings
//! - `tokens`: Token estimation and transcript rendering
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod classifier;
pub mod errors;
pub mod orchestrator;
pub mod patterns;
pub mod permissions;
pub mod risk;
pub mod router;
pub mod session;
pub mod settings;
pub mod tokens;
pub mod tool_registry;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use errors::{AgentError, ToolError};
pub use orchestrator::{ExecutionOrchestrator, TurnFlow};
pub use permissions::{
    ChannelConfirmationHandler, ConfirmationHandler, ConfirmationPolicy, ConfirmationRequest,
    PermissionGate, PermissionStore, PolicyConfirmationHandler,
};
pub use router::{IntentRouter, RoutingStrategy};
pub use session::{SessionHandle, SessionManager, SessionSnapshot};
pub use settings::SessionSettings;
pub use tool_registry::{Tool, ToolRegistry};
pub use types::{
    ConfirmationDetails, ConfirmationResponse, ContextBudget, DetectedToolCall, Message, Part,
    RiskLevel, Role, Route, RoutingDecision, ToolExecution, ToolParams, ToolResult, TurnResult,
};
