//! Intent router: decides, per user turn, whether tools should run.
//!
//! Stages run cheapest first and stop at the first confident answer:
//!
//! 1. **Pattern**: regex rule table, no model call ([`super::patterns`]).
//! 2. **Classification**: one call to the lightweight classifier model
//!    ([`super::classifier`]).
//! 3. **LLM-guided**: the primary model, told to answer with a
//!    `{"function_call": ...}` object when it wants to act. In the two-phase
//!    turn flow the draft is produced up front and only parsed here.
//! 4. **Fallback**: nothing confident; flag the turn as ambiguous when it
//!    reads like an action request.
//!
//! Backend faults inside stages 2 and 3 are logged and count as "no
//! detection". The router never fails a turn.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::classifier::{self, ClassifierAnswer};
use super::patterns;
use super::tool_registry::ToolRegistry;
use super::types::{DetectedToolCall, Route, RoutingDecision, ToolParams};
use crate::inference::{extract_function_call, Completion, GenerateRequest, InferenceError, ModelBackend};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Default confidence at or above which a detected call executes.
pub const DEFAULT_EXECUTION_THRESHOLD: f32 = 0.7;

/// Confidence given to a call the primary model asked for explicitly.
const LLM_GUIDED_CONFIDENCE: f32 = 0.9;

// ─── Strategy ───────────────────────────────────────────────────────────────

/// Which stages the router runs. The pattern stage always runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Pattern, classification, then LLM-guided.
    #[default]
    Staged,
    PatternOnly,
    /// Pattern then classification.
    Classification,
    /// Pattern then LLM-guided.
    LlmGuided,
}

impl RoutingStrategy {
    pub fn uses_classification(self) -> bool {
        matches!(self, Self::Staged | Self::Classification)
    }

    pub fn uses_llm_guidance(self) -> bool {
        matches!(self, Self::Staged | Self::LlmGuided)
    }
}

// ─── Request / Output ───────────────────────────────────────────────────────

/// Everything the router looks at for one turn.
pub struct RouteRequest<'a> {
    pub user_text: &'a str,
    /// A primary-model draft already produced for this turn (two-phase flow).
    pub draft: Option<&'a str>,
    /// The last few messages, one line each.
    pub recent_context: &'a [String],
    /// The primary-model request the LLM-guided stage should extend with
    /// function-calling instructions. `None` skips that stage unless a draft
    /// is supplied.
    pub base_request: Option<&'a GenerateRequest>,
}

/// A routing decision plus the model continuation state from the LLM-guided
/// call, when that call was made.
#[derive(Debug, Clone)]
pub struct Routed {
    pub decision: RoutingDecision,
    pub context: Option<Vec<i64>>,
}

// ─── IntentRouter ───────────────────────────────────────────────────────────

pub struct IntentRouter {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    strategy: RoutingStrategy,
    threshold: f32,
}

impl IntentRouter {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        strategy: RoutingStrategy,
        threshold: f32,
    ) -> Self {
        Self {
            backend,
            registry,
            strategy,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Produce the routing decision for one turn.
    pub async fn route(&self, request: RouteRequest<'_>) -> Routed {
        let is_known = |name: &str| self.registry.contains(name);

        // ── Stage 1: pattern ──
        let pattern_calls = patterns::detect(request.user_text, is_known);
        if pattern_calls.iter().any(|c| c.confidence >= self.threshold) {
            let names = join_names(&pattern_calls);
            tracing::info!(tools = %names, "routed by pattern");
            return self.done(RoutingDecision::new(
                pattern_calls,
                self.threshold,
                Route::Pattern,
                format!("pattern match: {names}"),
            ));
        }

        // Sub-threshold candidates are kept for the fallback decision.
        let mut candidates = pattern_calls;

        // ── Stage 2: classification ──
        if self.strategy.uses_classification() && !self.registry.is_empty() {
            match self.classify(&request).await {
                Some(answer) if answer.no_tools => {
                    tracing::info!(reason = %answer.reason, "classifier says conversational");
                    let reason = if answer.reason.is_empty() {
                        "classifier found no tool".to_string()
                    } else {
                        answer.reason
                    };
                    return self.done(RoutingDecision::conversational(
                        Route::Classification,
                        reason,
                    ));
                }
                Some(answer) => {
                    let calls = self.calls_from_answer(&answer, &candidates);
                    if calls.iter().any(|c| c.confidence >= self.threshold) {
                        tracing::info!(tools = %join_names(&calls), "routed by classifier");
                        return self.done(RoutingDecision::new(
                            calls,
                            self.threshold,
                            Route::Classification,
                            answer.reason,
                        ));
                    }
                    merge_candidates(&mut candidates, calls);
                }
                None => {}
            }
        }

        // ── Stage 3: LLM-guided ──
        let mut draft_reply = None;
        let mut context = None;
        if self.strategy.uses_llm_guidance() {
            let draft = match (request.draft, request.base_request) {
                (Some(draft), _) => Some(draft.to_string()),
                (None, Some(base)) => match self.generate_draft(base).await {
                    Ok(completion) => {
                        context = completion.context;
                        Some(completion.text)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "llm-guided routing call failed");
                        None
                    }
                },
                (None, None) => None,
            };

            if let Some(text) = draft {
                match extract_function_call(&text) {
                    Some(call) if self.registry.contains(&call.name) => {
                        tracing::info!(tool = %call.name, "routed by model function call");
                        let calls = vec![DetectedToolCall {
                            tool_name: call.name.clone(),
                            params: call.arguments,
                            confidence: LLM_GUIDED_CONFIDENCE,
                        }];
                        return Routed {
                            decision: RoutingDecision::new(
                                calls,
                                self.threshold,
                                Route::LlmGuided,
                                format!("model requested {}", call.name),
                            ),
                            context,
                        };
                    }
                    Some(call) => {
                        tracing::warn!(tool = %call.name, "model requested an unknown tool");
                    }
                    None if !text.trim().is_empty() => draft_reply = Some(text),
                    None => {}
                }
            }
        }

        // ── Stage 4: fallback ──
        let ambiguous = patterns::looks_like_action_request(request.user_text);
        let route = if draft_reply.is_some() && !ambiguous {
            Route::LlmGuided
        } else {
            Route::Fallback
        };
        let reasoning = if ambiguous {
            "looks like an action request but no confident tool call"
        } else {
            "no tool needed"
        };
        tracing::debug!(?route, ambiguous, "no confident tool call");

        let mut decision = RoutingDecision::new(candidates, self.threshold, route, reasoning);
        decision.ambiguous = ambiguous;
        decision.draft_reply = draft_reply;
        Routed { decision, context }
    }

    /// Run the primary model with function-calling instructions appended to
    /// the request's system prompt.
    pub async fn generate_draft(&self, base: &GenerateRequest) -> Result<Completion, InferenceError> {
        let instructions = self.function_calling_instructions();
        let system = match &base.system {
            Some(system) if !system.is_empty() => format!("{system}\n\n{instructions}"),
            _ => instructions,
        };
        let request = base.clone().with_system(system);
        self.backend.generate(request).await
    }

    /// Instructions telling the primary model how to request a tool.
    pub fn function_calling_instructions(&self) -> String {
        format!(
            "You can act on the user's machine with these tools:\n{}\n\n\
             To use a tool, reply with ONLY this JSON object and nothing else:\n\
             {{\"function_call\": {{\"name\": \"<tool name>\", \"arguments\": {{...}}}}}}\n\
             If no tool is needed, reply normally in plain text.",
            self.registry.describe_tools()
        )
    }

    fn done(&self, decision: RoutingDecision) -> Routed {
        Routed {
            decision,
            context: None,
        }
    }

    async fn classify(&self, request: &RouteRequest<'_>) -> Option<ClassifierAnswer> {
        let prompt = classifier::build_prompt(
            request.user_text,
            &self.registry.tool_summaries(),
            request.recent_context,
        );
        match self.backend.classify(&prompt).await {
            Ok(text) => {
                let answer = classifier::parse_answer(&text, |name| self.registry.contains(name));
                if answer.is_none() {
                    tracing::debug!(response = %text, "classifier answer not understood");
                }
                answer
            }
            Err(e) => {
                tracing::warn!(error = %e, "classification call failed");
                None
            }
        }
    }

    /// Turn a classifier answer into calls. Each tool gets the answer's
    /// params restricted to its own schema, with anything the pattern stage
    /// already extracted for that tool taking precedence.
    fn calls_from_answer(
        &self,
        answer: &ClassifierAnswer,
        candidates: &[DetectedToolCall],
    ) -> Vec<DetectedToolCall> {
        let summaries = self.registry.tool_summaries();
        answer
            .tools
            .iter()
            .map(|(name, confidence)| {
                let accepted = summaries
                    .iter()
                    .find(|s| &s.name == name)
                    .map(|s| s.parameters.as_slice())
                    .unwrap_or_default();
                let mut params = filter_params(&answer.params, accepted);
                if let Some(prior) = candidates.iter().find(|c| &c.tool_name == name) {
                    for (k, v) in &prior.params {
                        params.insert(k.clone(), v.clone());
                    }
                }
                DetectedToolCall {
                    tool_name: name.clone(),
                    params,
                    confidence: *confidence,
                }
            })
            .collect()
    }
}

fn filter_params(params: &ToolParams, accepted: &[String]) -> ToolParams {
    if accepted.is_empty() {
        return params.clone();
    }
    params
        .iter()
        .filter(|(k, _)| accepted.iter().any(|a| a == *k))
        .map(|(k, v): (&String, &Value)| (k.clone(), v.clone()))
        .collect()
}

/// Add classifier candidates for tools the pattern stage did not report.
fn merge_candidates(candidates: &mut Vec<DetectedToolCall>, extra: Vec<DetectedToolCall>) {
    for call in extra {
        if !candidates.iter().any(|c| c.tool_name == call.tool_name) {
            candidates.push(call);
        }
    }
}

fn join_names(calls: &[DetectedToolCall]) -> String {
    calls
        .iter()
        .map(|c| c.tool_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::testing::{RecordingTool, ScriptedBackend};
    use crate::agent_core::types::RiskLevel;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for name in ["write_file", "read_file", "run_shell_command", "list_directory"] {
            registry
                .register(RecordingTool::with_risk(name, RiskLevel::Safe))
                .unwrap();
        }
        Arc::new(registry)
    }

    fn router(backend: &Arc<ScriptedBackend>, strategy: RoutingStrategy) -> IntentRouter {
        IntentRouter::new(
            backend.clone(),
            registry(),
            strategy,
            DEFAULT_EXECUTION_THRESHOLD,
        )
    }

    fn request<'a>(text: &'a str, base: Option<&'a GenerateRequest>) -> RouteRequest<'a> {
        RouteRequest {
            user_text: text,
            draft: None,
            recent_context: &[],
            base_request: base,
        }
    }

    #[tokio::test]
    async fn test_pattern_stage_short_circuits() {
        let backend = Arc::new(ScriptedBackend::new());
        let base = GenerateRequest::new("m", "run the command `ls -la`");
        let routed = router(&backend, RoutingStrategy::Staged)
            .route(request("run the command `ls -la`", Some(&base)))
            .await;

        assert_eq!(routed.decision.route, Route::Pattern);
        assert!(routed.decision.execute_tools);
        assert_eq!(routed.decision.tool_calls[0].params["command"], "ls -la");
        assert_eq!(backend.classify_calls(), 0);
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_classifier_none_is_conversational() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_classify("TOOLS: NONE\nREASON: just chatting");
        let base = GenerateRequest::new("m", "hello there");
        let routed = router(&backend, RoutingStrategy::Staged)
            .route(request("hello there", Some(&base)))
            .await;

        assert!(!routed.decision.execute_tools);
        assert_eq!(routed.decision.route, Route::Classification);
        assert_eq!(routed.decision.reasoning, "just chatting");
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_classifier_detection_filters_params_by_schema() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_classify("TOOLS: read_file:0.85\nPARAMS: text:notes, bogus:1\nREASON: wants notes");
        let routed = router(&backend, RoutingStrategy::Classification)
            .route(request("what did I write down earlier", None))
            .await;

        assert_eq!(routed.decision.route, Route::Classification);
        assert!(routed.decision.execute_tools);
        let call = &routed.decision.tool_calls[0];
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.params.len(), 1);
        assert_eq!(call.params["text"], "notes");
    }

    #[tokio::test]
    async fn test_low_confidence_classification_falls_through_to_model() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_classify("TOOLS: read_file:0.3\nREASON: unsure");
        backend.push_generate(
            "Sure.\n```json\n{\"function_call\": {\"name\": \"read_file\", \"arguments\": {\"text\": \"a\"}}}\n```",
        );
        let base = GenerateRequest::new("m", "prompt").with_system("be helpful");
        let routed = router(&backend, RoutingStrategy::Staged)
            .route(request("peek at that thing", Some(&base)))
            .await;

        assert_eq!(routed.decision.route, Route::LlmGuided);
        assert!(routed.decision.execute_tools);
        assert_eq!(routed.decision.tool_calls.len(), 1);
        assert_eq!(routed.decision.tool_calls[0].params["text"], "a");

        let sent = backend.requests();
        let system = sent[0].system.as_deref().unwrap();
        assert!(system.starts_with("be helpful"));
        assert!(system.contains("function_call"));
    }

    #[tokio::test]
    async fn test_plain_model_text_becomes_draft_reply() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_generate("Rust's borrow checker enforces aliasing rules.");
        let base = GenerateRequest::new("m", "prompt");
        let routed = router(&backend, RoutingStrategy::LlmGuided)
            .route(request("why does the borrow checker complain?", Some(&base)))
            .await;

        assert!(!routed.decision.execute_tools);
        assert_eq!(routed.decision.route, Route::LlmGuided);
        assert_eq!(
            routed.decision.draft_reply.as_deref(),
            Some("Rust's borrow checker enforces aliasing rules.")
        );
        assert_eq!(backend.classify_calls(), 0);
    }

    #[tokio::test]
    async fn test_supplied_draft_is_parsed_without_a_model_call() {
        let backend = Arc::new(ScriptedBackend::new());
        let mut req = request("please handle it", None);
        req.draft = Some(r#"{"function_call": {"name": "list_directory", "arguments": {"text": "."}}}"#);
        let routed = router(&backend, RoutingStrategy::LlmGuided).route(req).await;

        assert_eq!(routed.decision.route, Route::LlmGuided);
        assert_eq!(routed.decision.tool_calls[0].tool_name, "list_directory");
        assert_eq!(backend.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_function_call_is_ignored() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_generate(r#"{"function_call": {"name": "launch_rocket", "arguments": {}}}"#);
        let base = GenerateRequest::new("m", "prompt");
        let routed = router(&backend, RoutingStrategy::LlmGuided)
            .route(request("hi", Some(&base)))
            .await;

        assert!(!routed.decision.execute_tools);
        assert!(routed.decision.draft_reply.is_none());
        assert_eq!(routed.decision.route, Route::Fallback);
    }

    #[tokio::test]
    async fn test_ambiguous_action_request() {
        let backend = Arc::new(ScriptedBackend::new());
        let routed = router(&backend, RoutingStrategy::PatternOnly)
            .route(request("create a file called notes.txt", None))
            .await;

        let decision = routed.decision;
        assert!(!decision.execute_tools);
        assert!(decision.ambiguous);
        assert_eq!(decision.route, Route::Fallback);
        // The partial pattern match is kept as a sub-threshold candidate.
        assert_eq!(decision.tool_calls.len(), 1);
        assert!(decision.tool_calls[0].confidence < DEFAULT_EXECUTION_THRESHOLD);
    }

    #[tokio::test]
    async fn test_backend_faults_mean_no_detection() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_generate_error();
        let base = GenerateRequest::new("m", "prompt");
        // Classification is unscripted and fails, generation fails too.
        let routed = router(&backend, RoutingStrategy::Staged)
            .route(request("tell me a joke", Some(&base)))
            .await;

        assert!(!routed.decision.execute_tools);
        assert!(!routed.decision.ambiguous);
        assert_eq!(routed.decision.route, Route::Fallback);
        assert!(routed.decision.draft_reply.is_none());
    }

    #[test]
    fn test_strategy_stage_selection() {
        assert!(RoutingStrategy::Staged.uses_classification());
        assert!(RoutingStrategy::Staged.uses_llm_guidance());
        assert!(!RoutingStrategy::PatternOnly.uses_classification());
        assert!(!RoutingStrategy::PatternOnly.uses_llm_guidance());
        assert!(!RoutingStrategy::Classification.uses_llm_guidance());
        assert!(!RoutingStrategy::LlmGuided.uses_classification());
        assert_eq!(
            serde_json::from_str::<RoutingStrategy>("\"pattern_only\"").unwrap(),
            RoutingStrategy::PatternOnly
        );
    }
}
