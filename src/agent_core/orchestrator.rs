//! Execution orchestrator: one user turn from routing to final reply.
//!
//! 1. **Route**: ask the [`IntentRouter`] what the turn needs. In the
//!    two-phase flow the primary model drafts an answer first and the router
//!    only parses it.
//! 2. **Execute**: run every call at or above the threshold, highest
//!    confidence first, one at a time, through the registry and gate.
//! 3. **Follow up**: feed tool outcomes back to the model for the reply.
//!    With no execution, the reply is the router's draft or a direct
//!    completion.
//!
//! The orchestrator never touches history. It returns the messages to
//! append and the session applies them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::AgentError;
use super::permissions::PermissionGate;
use super::router::{IntentRouter, RouteRequest};
use super::settings::SessionSettings;
use super::tokens::truncate_utf8;
use super::tool_registry::ToolRegistry;
use super::types::{Message, Route, RoutingDecision, ToolExecution};
use crate::inference::{
    extract_function_call, GenerateOptions, GenerateRequest, InferenceError, ModelBackend,
};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Tool output beyond this many bytes is cut before it reaches the model.
const MAX_TOOL_CONTENT_BYTES: usize = 4000;

const CLARIFICATION_HINT: &str = "The user's last message may be asking you to act, but the request \
is not specific enough to run a tool. Ask a short clarifying question about what exactly they want done.";

// ─── Types ──────────────────────────────────────────────────────────────────

/// How a turn obtains the model's first answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFlow {
    /// Route first; the model is called only by the stages that need it.
    #[default]
    Routed,
    /// Draft with function-calling instructions first, then route the draft.
    TwoPhase,
}

/// Inputs for one turn, prepared by the session.
pub struct TurnInput<'a> {
    pub user_text: &'a str,
    pub model: &'a str,
    /// Prompt for the primary model: the user text when `context` is set,
    /// otherwise the rendered transcript ending with the user text.
    pub prompt: String,
    pub context: Option<Vec<i64>>,
    pub recent_context: &'a [String],
}

/// What a turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Messages to append after the user message, in order.
    pub messages: Vec<Message>,
    pub reply: String,
    pub tool_executions: Vec<ToolExecution>,
    pub route: Route,
    /// The model backend failed; `reply` is the system notice.
    pub failed: bool,
    /// Continuation state for the next turn. `None` makes the next prompt
    /// re-send the transcript.
    pub context: Option<Vec<i64>>,
}

// ─── ExecutionOrchestrator ──────────────────────────────────────────────────

pub struct ExecutionOrchestrator {
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    router: IntentRouter,
    flow: TurnFlow,
    system_prompt: String,
    tool_options: GenerateOptions,
    conversational_options: GenerateOptions,
}

impl ExecutionOrchestrator {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        settings: &SessionSettings,
    ) -> Self {
        let router = IntentRouter::new(
            backend.clone(),
            registry.clone(),
            settings.routing_strategy,
            settings.execution_threshold,
        );
        Self {
            backend,
            registry,
            router,
            flow: settings.turn_flow,
            system_prompt: settings.system_prompt.clone(),
            tool_options: GenerateOptions {
                temperature: Some(settings.tool_temperature),
                top_p: Some(settings.tool_top_p),
                ..GenerateOptions::default()
            },
            conversational_options: GenerateOptions {
                temperature: Some(settings.conversational_temperature),
                top_p: Some(settings.conversational_top_p),
                ..GenerateOptions::default()
            },
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Run one turn.
    ///
    /// Backend faults come back as a failed [`TurnOutcome`]. Only
    /// configuration faults (e.g. a confirmation is needed and no handler is
    /// wired) return `Err`.
    pub async fn run_turn(
        &self,
        input: TurnInput<'_>,
        gate: &mut PermissionGate,
    ) -> Result<TurnOutcome, AgentError> {
        let guided_base = GenerateRequest::new(input.model, input.prompt.clone())
            .with_system(self.system_prompt.clone())
            .with_context(input.context.clone())
            .with_options(self.tool_options.clone());

        // ── Phase 1: Route ──────────────────────────────────────────────
        let mut context = None;
        let draft = match self.flow {
            TurnFlow::Routed => None,
            TurnFlow::TwoPhase => match self.router.generate_draft(&guided_base).await {
                Ok(completion) => {
                    context = completion.context;
                    Some(completion.text)
                }
                Err(e) => return Ok(backend_failure(&e, Vec::new(), Route::LlmGuided)),
            },
        };

        let routed = self
            .router
            .route(RouteRequest {
                user_text: input.user_text,
                draft: draft.as_deref(),
                recent_context: input.recent_context,
                base_request: match self.flow {
                    TurnFlow::Routed => Some(&guided_base),
                    TurnFlow::TwoPhase => None,
                },
            })
            .await;
        if routed.context.is_some() {
            context = routed.context;
        }
        let decision = routed.decision;

        tracing::info!(
            route = ?decision.route,
            execute_tools = decision.execute_tools,
            ambiguous = decision.ambiguous,
            calls = decision.tool_calls.len(),
            "turn routed"
        );

        // ── Phase 2: Execute ────────────────────────────────────────────
        let mut messages = Vec::new();
        let mut executions = Vec::new();
        if decision.execute_tools {
            let calls = decision.executable_calls(self.router.threshold());
            // Refuse the whole batch before anything runs.
            for call in &calls {
                if let Err(e) = self.registry.preflight(&call.tool_name, &call.params, gate) {
                    tracing::warn!(tool = %call.tool_name, error = %e, "turn refused before execution");
                    return Err(e);
                }
            }
            for call in calls {
                let execution = self
                    .registry
                    .execute_tool_call(&call.tool_name, &call.params, gate)
                    .await?;
                if decision.route == Route::LlmGuided {
                    messages.push(Message::function_call(&call.tool_name, call.params.clone()));
                    messages.push(Message::function_response(
                        &call.tool_name,
                        execution.result.to_response_value(),
                    ));
                }
                executions.push(execution);
            }
        }

        // ── Phase 3: Reply ──────────────────────────────────────────────
        if !executions.is_empty() {
            let follow_up = GenerateRequest::new(
                input.model,
                build_follow_up_prompt(input.user_text, &executions),
            )
            .with_system(self.system_prompt.clone())
            .with_context(context.or(input.context))
            .with_options(self.conversational_options.clone());

            return Ok(match self.backend.generate(follow_up).await {
                Ok(completion) => {
                    messages.push(Message::model(completion.text.clone()));
                    TurnOutcome {
                        messages,
                        reply: completion.text,
                        tool_executions: executions,
                        route: decision.route,
                        failed: false,
                        context: completion.context,
                    }
                }
                Err(e) => {
                    let mut outcome = backend_failure(&e, messages, decision.route);
                    outcome.tool_executions = executions;
                    outcome
                }
            });
        }

        // A two-phase draft that asked for nothing is already the answer.
        let reply_draft = decision.draft_reply.clone().or_else(|| {
            draft
                .filter(|d| !d.trim().is_empty() && extract_function_call(d).is_none())
        });
        if let Some(draft) = reply_draft {
            messages.push(Message::model(draft.clone()));
            return Ok(TurnOutcome {
                messages,
                reply: draft,
                tool_executions: executions,
                route: decision.route,
                failed: false,
                context,
            });
        }

        Ok(self.direct_reply(&input, &decision, messages).await)
    }

    /// Ask the primary model for a plain answer.
    async fn direct_reply(
        &self,
        input: &TurnInput<'_>,
        decision: &RoutingDecision,
        mut messages: Vec<Message>,
    ) -> TurnOutcome {
        let system = if decision.ambiguous {
            format!("{}\n\n{CLARIFICATION_HINT}", self.system_prompt)
        } else {
            self.system_prompt.clone()
        };
        let request = GenerateRequest::new(input.model, input.prompt.clone())
            .with_system(system)
            .with_context(input.context.clone())
            .with_options(self.conversational_options.clone());

        match self.backend.generate(request).await {
            Ok(completion) => {
                messages.push(Message::model(completion.text.clone()));
                TurnOutcome {
                    messages,
                    reply: completion.text,
                    tool_executions: Vec::new(),
                    route: decision.route,
                    failed: false,
                    context: completion.context,
                }
            }
            Err(e) => backend_failure(&e, messages, decision.route),
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn backend_failure(error: &InferenceError, mut messages: Vec<Message>, route: Route) -> TurnOutcome {
    tracing::error!(error = %error, "model backend failed during turn");
    let notice = format!("Model backend error: {error}. The turn could not be completed.");
    messages.push(Message::system(notice.clone()));
    TurnOutcome {
        messages,
        reply: notice,
        tool_executions: Vec::new(),
        route,
        failed: true,
        context: None,
    }
}

/// Prompt for the completion that follows tool execution.
fn build_follow_up_prompt(user_text: &str, executions: &[ToolExecution]) -> String {
    let results = executions
        .iter()
        .map(|e| {
            if e.result.success {
                let content = &e.result.content;
                let body = if content.len() <= MAX_TOOL_CONTENT_BYTES {
                    content.clone()
                } else {
                    format!(
                        "{}... ({} bytes total)",
                        truncate_utf8(content, MAX_TOOL_CONTENT_BYTES),
                        content.len()
                    )
                };
                format!("- {} succeeded:\n{body}", e.tool_name)
            } else {
                let err = e.result.error.as_deref().unwrap_or("unknown error");
                format!("- {} failed: {err}", e.tool_name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "The user asked: \"{user_text}\"\n\n\
         The following tools were run:\n{results}\n\n\
         Answer the user based on these results. Be concise. Report failed or \
         refused actions honestly. NEVER invent output that is not shown above."
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
