//! Tool Registry: catalog of local capabilities and the single entry point
//! for running one.
//!
//! [`ToolRegistry::execute_tool_call`] owns the full lifecycle of a call:
//! lookup → validate → confirm (via the [`PermissionGate`]) → execute.
//! Every failure along the way, including a panic inside the tool, comes
//! back as a failed [`ToolResult`]. The only error that escapes is a
//! configuration fault: a call that needs confirmation with no handler wired.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use super::errors::{AgentError, ToolError};
use super::permissions::PermissionGate;
use super::tokens::truncate_utf8;
use super::types::{ConfirmationDetails, RiskLevel, ToolExecution, ToolParams, ToolResult};

// ─── Tool Trait ─────────────────────────────────────────────────────────────

/// A local capability the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique key used by the router and the model.
    fn name(&self) -> &str;

    /// Human-facing label.
    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema-like description: `{type, properties, required}`.
    fn parameter_schema(&self) -> Value;

    /// Tools that never change anything skip confirmation at `Safe` risk.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Risk of running with these parameters.
    fn risk(&self, _params: &ToolParams) -> RiskLevel {
        RiskLevel::Safe
    }

    /// Check parameters before anything else happens.
    fn validate(&self, params: &ToolParams) -> Result<(), String> {
        validate_against_schema(&self.parameter_schema(), params)
    }

    /// One-line description of what this call will do.
    fn describe(&self, params: &ToolParams) -> String {
        let args = Value::Object(params.clone()).to_string();
        let shown = truncate_utf8(&args, 100);
        let ellipsis = if shown.len() < args.len() { "..." } else { "" };
        format!("Execute {}: {shown}{ellipsis}", self.name())
    }

    /// Longer preview shown in the confirmation prompt.
    fn preview(&self, _params: &ToolParams) -> String {
        String::new()
    }

    /// Confirmation details when this call must pass the gate, `None` when
    /// it may run directly.
    fn should_confirm(&self, params: &ToolParams) -> Option<ConfirmationDetails> {
        let risk = self.risk(params);
        if self.is_read_only() && risk == RiskLevel::Safe {
            return None;
        }
        Some(ConfirmationDetails {
            tool_name: self.name().to_string(),
            params: params.clone(),
            description: self.describe(params),
            risk,
            preview: self.preview(params),
        })
    }

    async fn execute(&self, params: &ToolParams) -> Result<ToolResult, ToolError>;
}

// ─── Schema Validation ──────────────────────────────────────────────────────

/// Check required fields and top-level property types.
///
/// Parameters the schema does not mention are ignored.
pub fn validate_against_schema(schema: &Value, params: &ToolParams) -> Result<(), String> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            match params.get(field) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required parameter '{field}'"))
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in params {
        let Some(expected) = properties
            .get(key)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !matches {
            return Err(format!("parameter '{key}' must be of type {expected}"));
        }
    }

    Ok(())
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

/// Name, description and parameter names of a registered tool, for prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub parameters: Vec<String>,
}

/// The immutable set of tools available to a session.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentError::Configuration {
                reason: format!("tool '{name}' registered twice"),
            });
        }
        tracing::debug!(tool = %name, "tool registered");
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Summaries in registration order.
    pub fn tool_summaries(&self) -> Vec<ToolSummary> {
        self.tools
            .iter()
            .map(|t| {
                let schema = t.parameter_schema();
                let parameters = schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().collect())
                    .unwrap_or_default();
                ToolSummary {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters,
                }
            })
            .collect()
    }

    /// Render the catalog with full schemas, for function-calling prompts.
    pub fn describe_tools(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                format!(
                    "- {}: {}\n  parameters: {}",
                    t.name(),
                    t.description(),
                    t.parameter_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Check that `execute_tool_call` would not hit a configuration fault for
    /// this call. Unknown tools and invalid parameters pass: they fail later
    /// as ordinary results.
    pub fn preflight(
        &self,
        name: &str,
        params: &ToolParams,
        gate: &PermissionGate,
    ) -> Result<(), AgentError> {
        let Some(tool) = self.get(name) else {
            return Ok(());
        };
        if tool.validate(params).is_err() {
            return Ok(());
        }
        match tool.should_confirm(params) {
            Some(details) => gate.ensure_can_authorize(&details),
            None => Ok(()),
        }
    }

    /// Run one tool call through validation, confirmation and execution.
    pub async fn execute_tool_call(
        &self,
        name: &str,
        params: &ToolParams,
        gate: &mut PermissionGate,
    ) -> Result<ToolExecution, AgentError> {
        let start = Instant::now();

        // 1. Lookup
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = %name, "unknown tool requested");
            return Ok(finish(
                name,
                params,
                ToolResult::failure(ToolError::UnknownTool { name: name.into() }),
                false,
                start,
            ));
        };

        // 2. Validate
        if let Err(reason) = tool.validate(params) {
            tracing::info!(tool = %name, reason = %reason, "tool parameters rejected");
            return Ok(finish(
                name,
                params,
                ToolResult::failure(ToolError::Validation { reason }),
                false,
                start,
            ));
        }

        // 3. Confirm
        let mut confirmed = false;
        if let Some(details) = tool.should_confirm(params) {
            let outcome = gate.authorize(&details).await?;
            if !outcome.granted {
                return Ok(finish(
                    name,
                    params,
                    ToolResult::failure(ToolError::PermissionDenied {
                        tool_name: name.into(),
                    }),
                    outcome.prompted,
                    start,
                ));
            }
            confirmed = outcome.prompted;
        }

        // 4. Execute
        let result = match AssertUnwindSafe(tool.execute(params)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failure(e),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                tracing::error!(tool = %name, reason = %reason, "tool panicked");
                ToolResult::failure(ToolError::Execution {
                    reason: format!("tool panicked: {reason}"),
                })
            }
        };

        Ok(finish(name, params, result, confirmed, start))
    }
}

fn finish(
    name: &str,
    params: &ToolParams,
    result: ToolResult,
    confirmed: bool,
    start: Instant,
) -> ToolExecution {
    let execution_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(
        tool = %name,
        success = result.success,
        confirmed,
        elapsed_ms = execution_time_ms,
        error = result.error.as_deref().unwrap_or(""),
        "tool call finished"
    );
    ToolExecution {
        tool_name: name.to_string(),
        params: params.clone(),
        result,
        execution_time_ms,
        confirmed,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::permissions::{ConfirmationPolicy, PolicyConfirmationHandler};
    use crate::agent_core::testing::RecordingTool;
    use serde_json::json;

    fn params(value: Value) -> ToolParams {
        value.as_object().cloned().unwrap_or_default()
    }

    fn registry_with(tool: Arc<RecordingTool>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(tool).unwrap();
        registry
    }

    fn gate(policy: ConfirmationPolicy) -> PermissionGate {
        PermissionGate::new(Some(Arc::new(PolicyConfirmationHandler::new(policy))), false)
    }

    #[test]
    fn test_validate_against_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "timeout": {"type": "integer"}
            },
            "required": ["path"]
        });
        assert!(validate_against_schema(&schema, &params(json!({"path": "a"}))).is_ok());
        assert!(validate_against_schema(&schema, &params(json!({"path": "a", "extra": 1}))).is_ok());
        let missing = validate_against_schema(&schema, &params(json!({}))).unwrap_err();
        assert!(missing.contains("'path'"));
        let wrong = validate_against_schema(&schema, &params(json!({"path": "a", "timeout": "x"})))
            .unwrap_err();
        assert!(wrong.contains("integer"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::safe("echo")).unwrap();
        let result = registry.register(RecordingTool::safe("echo"));
        assert!(matches!(result, Err(AgentError::Configuration { .. })));
    }

    #[test]
    fn test_summaries_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::safe("zeta")).unwrap();
        registry.register(RecordingTool::safe("alpha")).unwrap();
        let names: Vec<String> = registry.tool_summaries().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(registry.describe_tools().contains("- zeta:"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result() {
        let registry = ToolRegistry::new();
        let mut gate = gate(ConfirmationPolicy::AllowAll);
        let exec = registry
            .execute_tool_call("nope", &ToolParams::new(), &mut gate)
            .await
            .unwrap();
        assert!(!exec.result.success);
        assert!(exec.result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_execute() {
        let tool = RecordingTool::safe("echo");
        let registry = registry_with(tool.clone());
        let mut gate = gate(ConfirmationPolicy::AllowAll);
        let exec = registry
            .execute_tool_call("echo", &params(json!({"text": 5})), &mut gate)
            .await
            .unwrap();
        assert!(!exec.result.success);
        assert!(exec.result.error.unwrap().contains("invalid parameters"));
        assert_eq!(tool.executions(), 0);
    }

    #[tokio::test]
    async fn test_denied_confirmation_skips_execute() {
        let tool = RecordingTool::with_risk("danger", RiskLevel::Dangerous);
        let registry = registry_with(tool.clone());
        let mut gate = gate(ConfirmationPolicy::DenyAll);
        let exec = registry
            .execute_tool_call("danger", &params(json!({"text": "x"})), &mut gate)
            .await
            .unwrap();
        assert!(!exec.result.success);
        assert!(exec.result.error.unwrap().contains("permission denied"));
        assert!(exec.confirmed);
        assert_eq!(tool.executions(), 0);
    }

    #[tokio::test]
    async fn test_granted_confirmation_executes() {
        let tool = RecordingTool::with_risk("mod", RiskLevel::Moderate);
        let registry = registry_with(tool.clone());
        let mut gate = gate(ConfirmationPolicy::AllowAll);
        let exec = registry
            .execute_tool_call("mod", &params(json!({"text": "hi"})), &mut gate)
            .await
            .unwrap();
        assert!(exec.result.success);
        assert!(exec.confirmed);
        assert_eq!(tool.executions(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_is_configuration_fault() {
        let tool = RecordingTool::with_risk("mod", RiskLevel::Moderate);
        let registry = registry_with(tool.clone());
        let mut gate = PermissionGate::new(None, true);
        let result = registry
            .execute_tool_call("mod", &params(json!({"text": "hi"})), &mut gate)
            .await;
        assert!(matches!(result, Err(AgentError::MissingConfirmationHandler { .. })));
        assert_eq!(tool.executions(), 0);
    }

    #[test]
    fn test_preflight_flags_only_calls_needing_a_handler() {
        let mut registry = ToolRegistry::new();
        registry.register(RecordingTool::safe("echo")).unwrap();
        registry
            .register(RecordingTool::with_risk("mod", RiskLevel::Moderate))
            .unwrap();
        let gate = PermissionGate::new(None, false);
        let args = params(json!({"text": "hi"}));

        assert!(registry.preflight("echo", &args, &gate).is_ok());
        assert!(registry.preflight("nope", &args, &gate).is_ok());
        assert!(registry.preflight("mod", &params(json!({"text": 5})), &gate).is_ok());
        assert!(matches!(
            registry.preflight("mod", &args, &gate),
            Err(AgentError::MissingConfirmationHandler { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_safe_tool_runs_without_handler() {
        let tool = RecordingTool::safe("echo");
        let registry = registry_with(tool.clone());
        let mut gate = PermissionGate::new(None, false);
        let exec = registry
            .execute_tool_call("echo", &params(json!({"text": "hi"})), &mut gate)
            .await
            .unwrap();
        assert!(exec.result.success);
        assert!(!exec.confirmed);
    }

    #[tokio::test]
    async fn test_tool_error_and_panic_are_normalized() {
        let failing = RecordingTool::failing("broken");
        let panicking = RecordingTool::panicking("explodes");
        let mut registry = ToolRegistry::new();
        registry.register(failing).unwrap();
        registry.register(panicking).unwrap();
        let mut gate = gate(ConfirmationPolicy::AllowAll);

        let exec = registry
            .execute_tool_call("broken", &params(json!({"text": "x"})), &mut gate)
            .await
            .unwrap();
        assert!(exec.result.error.unwrap().contains("execution failed"));

        let exec = registry
            .execute_tool_call("explodes", &params(json!({"text": "x"})), &mut gate)
            .await
            .unwrap();
        assert!(!exec.result.success);
        assert!(exec.result.error.unwrap().contains("tool panicked"));
    }
}
