//! Session manager: history, token accounting, compaction and model identity.
//!
//! The session is the only writer of history. A turn goes:
//!
//! 1. append the user message (which may compact),
//! 2. hand the turn to the [`ExecutionOrchestrator`],
//! 3. append whatever messages the orchestrator returns.
//!
//! Compaction keeps the last [`KEEP_RECENT_MESSAGES`] messages verbatim and
//! replaces everything before them with one model-written summary. If the
//! summary call fails, the prefix is simply dropped.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as TokioMutex, MutexGuard};

use super::errors::AgentError;
use super::orchestrator::{ExecutionOrchestrator, TurnInput};
use super::permissions::{ConfirmationHandler, PermissionGate, PermissionStore};
use super::settings::{write_atomic, SessionSettings};
use super::tokens::{estimate_history_tokens, render_transcript, summarize_turn};
use super::tool_registry::ToolRegistry;
use super::types::{ContextBudget, Message, TurnResult};
use crate::inference::{GenerateOptions, GenerateRequest, ModelBackend, ModelsConfig};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Messages kept verbatim by compaction.
pub const KEEP_RECENT_MESSAGES: usize = 4;

/// Compaction needs more than this many messages to do anything.
const MIN_MESSAGES_FOR_COMPACTION: usize = 2;

const SUMMARY_MAX_TOKENS: u32 = 512;

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Serializable session state for resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub history: Vec<Message>,
    pub current_model: String,
    pub settings: SessionSettings,
    pub token_count: u32,
    pub compaction_count: u32,
}

impl SessionSnapshot {
    /// Read a snapshot written by [`SessionManager::save_snapshot`].
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| AgentError::PersistenceError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

// ─── SessionManager ─────────────────────────────────────────────────────────

pub struct SessionManager {
    id: String,
    start_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    history: Vec<Message>,
    current_model: String,
    context_window: u32,
    settings: SessionSettings,
    token_count: u32,
    compaction_count: u32,
    /// Continuation state from the last completion. Reset whenever history
    /// is rewritten or the model changes.
    model_context: Option<Vec<i64>>,
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    models: ModelsConfig,
    orchestrator: ExecutionOrchestrator,
    gate: PermissionGate,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        models: ModelsConfig,
        settings: SessionSettings,
    ) -> Self {
        let settings = settings.normalized();
        let now = Utc::now();
        let current_model = models.active_model.clone();
        let context_window = models.model_settings(&current_model).context_window;
        let orchestrator = ExecutionOrchestrator::new(backend.clone(), registry.clone(), &settings);
        let gate = PermissionGate::new(None, settings.auto_approve_safe);
        let id = uuid::Uuid::new_v4().to_string();

        tracing::info!(session_id = %id, model = %current_model, context_window, "session started");

        Self {
            id,
            start_time: now,
            last_activity: now,
            history: Vec::new(),
            current_model,
            context_window,
            settings,
            token_count: 0,
            compaction_count: 0,
            model_context: None,
            backend,
            registry,
            models,
            orchestrator,
            gate,
        }
    }

    /// Rebuild a session from a snapshot.
    pub fn restore(
        snapshot: SessionSnapshot,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
        models: ModelsConfig,
    ) -> Self {
        let mut session = Self::new(backend, registry, models, snapshot.settings);
        session.id = snapshot.id;
        session.start_time = snapshot.start_time;
        session.context_window = session.models.model_settings(&snapshot.current_model).context_window;
        session.current_model = snapshot.current_model;
        session.history = snapshot.history;
        session.token_count = snapshot.token_count;
        session.compaction_count = snapshot.compaction_count;
        tracing::info!(
            session_id = %session.id,
            messages = session.history.len(),
            "session restored"
        );
        session
    }

    /// Wire the handler that answers confirmation prompts.
    pub fn with_confirmation_handler(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.gate = PermissionGate::new(Some(handler), self.settings.auto_approve_safe);
        self
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn current_model(&self) -> &str {
        &self.current_model
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn token_count(&self) -> u32 {
        self.token_count
    }

    pub fn compaction_count(&self) -> u32 {
        self.compaction_count
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Session-scoped tool grants.
    pub fn permissions(&self) -> &PermissionStore {
        self.gate.permissions()
    }

    pub fn permissions_mut(&mut self) -> &mut PermissionStore {
        self.gate.permissions_mut()
    }

    /// Replace the settings. Routing and sampling changes apply from the
    /// next turn.
    pub fn update_settings(&mut self, settings: SessionSettings) {
        self.settings = settings.normalized();
        self.orchestrator =
            ExecutionOrchestrator::new(self.backend.clone(), self.registry.clone(), &self.settings);
        self.gate.set_auto_approve_safe(self.settings.auto_approve_safe);
        tracing::info!(session_id = %self.id, "session settings updated");
    }

    // ─── Turns ──────────────────────────────────────────────────────────

    /// Run one user turn.
    ///
    /// Backend failures produce a failed [`TurnResult`] with a system notice
    /// in history. Configuration faults are recorded in history and returned
    /// as `Err`; the session stays usable either way.
    pub async fn send(&mut self, user_text: &str) -> Result<TurnResult, AgentError> {
        let recent = self.recent_context(self.settings.recent_context_messages);
        self.add_message(Message::user(user_text)).await;

        let prompt = match (&self.model_context, self.history.len()) {
            (Some(_), _) | (None, 0..=1) => user_text.to_string(),
            (None, _) => render_transcript(&self.history),
        };
        let input = TurnInput {
            user_text,
            model: &self.current_model,
            prompt,
            context: self.model_context.clone(),
            recent_context: &recent,
        };

        match self.orchestrator.run_turn(input, &mut self.gate).await {
            Ok(outcome) => {
                for message in outcome.messages {
                    self.add_message(message).await;
                }
                // Appends above may have compacted and reset the context.
                self.model_context = if outcome.failed { None } else { outcome.context };
                tracing::info!(
                    session_id = %self.id,
                    route = ?outcome.route,
                    tools = outcome.tool_executions.len(),
                    failed = outcome.failed,
                    tokens = self.token_count,
                    "turn complete"
                );
                Ok(TurnResult {
                    reply: outcome.reply,
                    tool_executions: outcome.tool_executions,
                    route: outcome.route,
                    failed: outcome.failed,
                })
            }
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "turn refused");
                self.add_message(Message::system(format!("Configuration error: {e}")))
                    .await;
                self.model_context = None;
                Err(e)
            }
        }
    }

    // ─── History ────────────────────────────────────────────────────────

    /// Append a message, recount tokens, and compact if over budget.
    ///
    /// Never fails: counting falls back to estimation and compaction falls
    /// back to truncation.
    pub async fn add_message(&mut self, message: Message) {
        self.history.push(message);
        self.last_activity = Utc::now();
        self.recount_tokens().await;

        if self.token_count > self.compaction_limit() {
            tracing::info!(
                session_id = %self.id,
                tokens = self.token_count,
                limit = self.compaction_limit(),
                "context over budget"
            );
            self.compact().await;
        }
    }

    /// Token count at which the next append compacts.
    pub fn compaction_limit(&self) -> u32 {
        (self.context_window as f64 * self.settings.compaction_threshold as f64) as u32
    }

    /// Summarize everything before the last [`KEEP_RECENT_MESSAGES`]
    /// messages into one summary message.
    ///
    /// Returns whether history changed. A history that is already
    /// `[summary, ..recent]` is left alone.
    pub async fn compact(&mut self) -> bool {
        let len = self.history.len();
        if len <= MIN_MESSAGES_FOR_COMPACTION || len <= KEEP_RECENT_MESSAGES {
            return false;
        }
        let split = len - KEEP_RECENT_MESSAGES;
        if split == 1 && self.history[0].is_summary() {
            return false;
        }

        let recent = self.history.split_off(split);
        let prefix = std::mem::replace(&mut self.history, recent);

        match self.summarize(&prefix).await {
            Some(summary) => {
                self.history.insert(0, Message::summary(&summary));
                tracing::info!(
                    session_id = %self.id,
                    summarized = prefix.len(),
                    "history compacted"
                );
            }
            None => {
                tracing::warn!(
                    session_id = %self.id,
                    dropped = prefix.len(),
                    "summary unavailable, history truncated"
                );
            }
        }

        self.compaction_count += 1;
        self.model_context = None;
        self.recount_tokens().await;
        true
    }

    /// Drop all history. Id, model, settings and permission grants stay.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.token_count = 0;
        self.compaction_count = 0;
        self.model_context = None;
        self.last_activity = Utc::now();
        tracing::info!(session_id = %self.id, "history cleared");
    }

    /// The last `n` messages as one-line summaries, oldest first.
    pub fn recent_context(&self, n: usize) -> Vec<String> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..].iter().map(summarize_turn).collect()
    }

    pub fn context_budget(&self) -> ContextBudget {
        ContextBudget {
            used: self.token_count,
            limit: self.context_window,
            compaction_at: self.compaction_limit(),
            remaining: self.context_window.saturating_sub(self.token_count),
        }
    }

    // ─── Models ─────────────────────────────────────────────────────────

    /// Switch the primary model.
    ///
    /// The name is checked against the backend's catalog, or the configured
    /// models when the catalog is unavailable.
    pub async fn switch_model(&mut self, name: &str) -> Result<(), AgentError> {
        let available = self.available_models().await;
        let found = available
            .iter()
            .find(|m| m.as_str() == name || m.strip_suffix(":latest") == Some(name))
            .cloned();
        let Some(resolved) = found else {
            tracing::warn!(session_id = %self.id, model = %name, "unknown model requested");
            return Err(AgentError::UnknownModel {
                name: name.to_string(),
                available,
            });
        };

        let previous = std::mem::replace(&mut self.current_model, resolved.clone());
        self.context_window = self.models.model_settings(&resolved).context_window;
        self.model_context = None;
        tracing::info!(
            session_id = %self.id,
            from = %previous,
            to = %resolved,
            context_window = self.context_window,
            "model switched"
        );
        self.add_message(Message::system(format!(
            "Switched model from {previous} to {resolved}."
        )))
        .await;
        Ok(())
    }

    /// Model names the session may switch to, sorted.
    pub async fn available_models(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.backend.list_models().await {
            Ok(models) if !models.is_empty() => models.into_iter().map(|m| m.name).collect(),
            Ok(_) => self.configured_models(),
            Err(e) => {
                tracing::warn!(error = %e, "model catalog unavailable, using configured models");
                self.configured_models()
            }
        };
        names.sort();
        names.dedup();
        names
    }

    fn configured_models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.models.keys().cloned().collect();
        names.push(self.models.active_model.clone());
        names
    }

    // ─── Persistence ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            start_time: self.start_time,
            history: self.history.clone(),
            current_model: self.current_model.clone(),
            settings: self.settings.clone(),
            token_count: self.token_count,
            compaction_count: self.compaction_count,
        }
    }

    /// Write a snapshot to `path` (atomic write).
    pub fn save_snapshot(&self, path: &Path) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        write_atomic(path, json.as_bytes())?;
        tracing::debug!(session_id = %self.id, path = %path.display(), "snapshot saved");
        Ok(())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    async fn recount_tokens(&mut self) {
        let transcript = render_transcript(&self.history);
        self.token_count = match self.backend.count_tokens(&self.current_model, &transcript).await {
            Ok(count) => count,
            Err(e) => {
                tracing::trace!(error = %e, "token count unavailable, estimating");
                estimate_history_tokens(&self.history)
            }
        };
    }

    async fn summarize(&self, messages: &[Message]) -> Option<String> {
        let prompt = format!(
            "Summarize the following conversation between a developer and their assistant. \
             Keep file names, commands, decisions and open tasks. Be brief.\n\n{}",
            render_transcript(messages)
        );
        let request = GenerateRequest::new(&self.current_model, prompt).with_options(GenerateOptions {
            temperature: Some(0.2),
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            ..GenerateOptions::default()
        });
        match self.backend.generate(request).await {
            Ok(completion) if !completion.text.trim().is_empty() => Some(completion.text),
            Ok(_) => {
                tracing::warn!("summarizer returned empty text");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed");
                None
            }
        }
    }
}

// ─── SessionHandle ──────────────────────────────────────────────────────────

/// Shared access to a session that refuses overlapping turns.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    inner: Arc<TokioMutex<SessionManager>>,
}

impl SessionHandle {
    pub fn new(session: SessionManager) -> Self {
        Self {
            id: session.id().to_string(),
            inner: Arc::new(TokioMutex::new(session)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run a turn, or fail with [`AgentError::TurnInProgress`] if one is
    /// already running.
    pub async fn send(&self, user_text: &str) -> Result<TurnResult, AgentError> {
        let mut session = self.try_session()?;
        session.send(user_text).await
    }

    /// Exclusive access for non-turn operations, refused while a turn runs.
    pub fn try_session(&self) -> Result<MutexGuard<'_, SessionManager>, AgentError> {
        self.inner.try_lock().map_err(|_| AgentError::TurnInProgress {
            session_id: self.id.clone(),
        })
    }

    /// Wait for the session to be free.
    pub async fn session(&self) -> MutexGuard<'_, SessionManager> {
        self.inner.lock().await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
