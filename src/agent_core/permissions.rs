//! Permission Gate: turns a risk-classified action into a go/no-go decision.
//!
//! Decision order for one action:
//! 1. `Safe` and the session enables `auto_approve_safe` → granted silently.
//! 2. Not `Dangerous` and the tool holds a session grant → granted silently.
//! 3. Otherwise ask the [`ConfirmationHandler`]. No handler wired → fail
//!    closed with [`AgentError::MissingConfirmationHandler`].
//!
//! `Dangerous` actions always reach the handler; a session grant never
//! covers them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::errors::AgentError;
use super::types::{ConfirmationDetails, ConfirmationResponse, RiskLevel};

// ─── Confirmation Handlers ──────────────────────────────────────────────────

/// Something that can approve or refuse an action: a human prompt or a
/// static policy.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, details: &ConfirmationDetails) -> ConfirmationResponse;
}

/// A pending confirmation forwarded to the presentation layer.
#[derive(Debug)]
pub struct ConfirmationRequest {
    /// Unique request ID for matching responses in logs.
    pub request_id: String,
    pub details: ConfirmationDetails,
    /// Send the user's answer here. Dropping it counts as a rejection.
    pub respond_to: oneshot::Sender<ConfirmationResponse>,
}

/// Forwards confirmations over a channel and waits for the answer.
///
/// The receiving end belongs to whatever renders prompts (a terminal UI, an
/// editor plugin).
#[derive(Clone)]
pub struct ChannelConfirmationHandler {
    tx: mpsc::Sender<ConfirmationRequest>,
}

impl ChannelConfirmationHandler {
    /// Create the handler and the receiver the presentation layer polls.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ConfirmationRequest>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConfirmationHandler for ChannelConfirmationHandler {
    async fn confirm(&self, details: &ConfirmationDetails) -> ConfirmationResponse {
        let (respond_to, response_rx) = oneshot::channel();
        let request = ConfirmationRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            details: details.clone(),
            respond_to,
        };
        let request_id = request.request_id.clone();

        if self.tx.send(request).await.is_err() {
            tracing::warn!(
                tool = %details.tool_name,
                "confirmation receiver dropped, treating as rejection"
            );
            return ConfirmationResponse::Rejected;
        }

        match response_rx.await {
            Ok(response) => {
                tracing::debug!(request_id = %request_id, response = ?response, "confirmation answered");
                response
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %request_id,
                    tool = %details.tool_name,
                    "confirmation cancelled"
                );
                ConfirmationResponse::Rejected
            }
        }
    }
}

/// A fixed answer for non-interactive use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPolicy {
    AllowAll,
    DenyAll,
    /// Allow actions at or below this risk; refuse the rest.
    AllowUpTo(RiskLevel),
}

/// Answers confirmations from a [`ConfirmationPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct PolicyConfirmationHandler {
    policy: ConfirmationPolicy,
}

impl PolicyConfirmationHandler {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl ConfirmationHandler for PolicyConfirmationHandler {
    async fn confirm(&self, details: &ConfirmationDetails) -> ConfirmationResponse {
        let allowed = match self.policy {
            ConfirmationPolicy::AllowAll => true,
            ConfirmationPolicy::DenyAll => false,
            ConfirmationPolicy::AllowUpTo(max) => details.risk <= max,
        };
        if allowed {
            ConfirmationResponse::Confirmed
        } else {
            ConfirmationResponse::Rejected
        }
    }
}

// ─── PermissionStore ────────────────────────────────────────────────────────

/// A session-scoped grant for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionGrant {
    pub tool_name: String,
    /// ISO 8601 timestamp when the grant was created.
    pub granted_at: String,
}

/// Result of checking a tool's permission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Tool has an active grant: skip confirmation.
    Allowed,
    /// No grant: proceed with normal confirmation flow.
    NeedsConfirmation,
}

/// Grants that live until the session ends.
#[derive(Debug, Default)]
pub struct PermissionStore {
    session_grants: HashMap<String, PermissionGrant>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a tool has an active permission grant.
    pub fn check(&self, tool_name: &str) -> PermissionStatus {
        if self.session_grants.contains_key(tool_name) {
            PermissionStatus::Allowed
        } else {
            PermissionStatus::NeedsConfirmation
        }
    }

    /// Grant a tool for the rest of the session.
    pub fn grant(&mut self, tool_name: &str) {
        let grant = PermissionGrant {
            tool_name: tool_name.to_string(),
            granted_at: chrono::Utc::now().to_rfc3339(),
        };
        self.session_grants.insert(tool_name.to_string(), grant);
        tracing::info!(tool = tool_name, "session permission granted");
    }

    /// Revoke a grant. Returns whether one existed.
    pub fn revoke(&mut self, tool_name: &str) -> bool {
        let removed = self.session_grants.remove(tool_name).is_some();
        if removed {
            tracing::info!(tool = tool_name, "permission revoked");
        }
        removed
    }

    /// All grants, sorted by tool name.
    pub fn list(&self) -> Vec<&PermissionGrant> {
        let mut grants: Vec<&PermissionGrant> = self.session_grants.values().collect();
        grants.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        grants
    }

    /// Clear all session grants.
    pub fn clear_session(&mut self) {
        let count = self.session_grants.len();
        self.session_grants.clear();
        if count > 0 {
            tracing::info!(cleared = count, "session permissions cleared");
        }
    }
}

// ─── PermissionGate ─────────────────────────────────────────────────────────

/// The gate's answer for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    pub granted: bool,
    /// Whether the handler was actually asked.
    pub prompted: bool,
}

/// Decides whether an action may run.
pub struct PermissionGate {
    handler: Option<Arc<dyn ConfirmationHandler>>,
    store: PermissionStore,
    auto_approve_safe: bool,
}

impl PermissionGate {
    pub fn new(handler: Option<Arc<dyn ConfirmationHandler>>, auto_approve_safe: bool) -> Self {
        Self {
            handler,
            store: PermissionStore::new(),
            auto_approve_safe,
        }
    }

    pub fn set_auto_approve_safe(&mut self, enabled: bool) {
        self.auto_approve_safe = enabled;
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.store
    }

    pub fn permissions_mut(&mut self) -> &mut PermissionStore {
        &mut self.store
    }

    /// Whether the action is granted without asking the handler.
    fn pre_approved(&self, details: &ConfirmationDetails) -> bool {
        if details.risk == RiskLevel::Safe && self.auto_approve_safe {
            tracing::debug!(tool = %details.tool_name, "safe action auto-approved");
            return true;
        }
        if details.risk != RiskLevel::Dangerous
            && self.store.check(&details.tool_name) == PermissionStatus::Allowed
        {
            tracing::debug!(
                tool = %details.tool_name,
                "skipping confirmation: session permission granted"
            );
            return true;
        }
        false
    }

    /// Fail with `MissingConfirmationHandler` when `authorize` would need a
    /// handler and none is wired. Asks nobody.
    pub fn ensure_can_authorize(&self, details: &ConfirmationDetails) -> Result<(), AgentError> {
        if self.handler.is_none() && !self.pre_approved(details) {
            return Err(AgentError::MissingConfirmationHandler {
                tool_name: details.tool_name.clone(),
            });
        }
        Ok(())
    }

    /// Decide whether the described action may run.
    pub async fn authorize(
        &mut self,
        details: &ConfirmationDetails,
    ) -> Result<GateOutcome, AgentError> {
        if self.pre_approved(details) {
            return Ok(GateOutcome {
                granted: true,
                prompted: false,
            });
        }

        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| AgentError::MissingConfirmationHandler {
                tool_name: details.tool_name.clone(),
            })?;

        tracing::info!(
            tool = %details.tool_name,
            risk = %details.risk,
            description = %details.description,
            "requesting confirmation"
        );

        let granted = match handler.confirm(details).await {
            ConfirmationResponse::Confirmed => true,
            ConfirmationResponse::ConfirmedForSession => {
                if details.risk == RiskLevel::Dangerous {
                    tracing::info!(
                        tool = %details.tool_name,
                        "session grant ignored for dangerous action"
                    );
                } else {
                    self.store.grant(&details.tool_name);
                }
                true
            }
            ConfirmationResponse::Rejected => false,
        };

        tracing::info!(tool = %details.tool_name, granted, "confirmation resolved");
        Ok(GateOutcome {
            granted,
            prompted: true,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn details(tool: &str, risk: RiskLevel) -> ConfirmationDetails {
        ConfirmationDetails {
            tool_name: tool.into(),
            params: serde_json::Map::new(),
            description: format!("run {tool}"),
            risk,
            preview: String::new(),
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
        response: ConfirmationResponse,
    }

    #[async_trait]
    impl ConfirmationHandler for CountingHandler {
        async fn confirm(&self, _details: &ConfirmationDetails) -> ConfirmationResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
        }
    }

    fn counting(response: ConfirmationResponse) -> Arc<CountingHandler> {
        Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            response,
        })
    }

    #[test]
    fn test_check_returns_needs_confirmation_by_default() {
        let store = PermissionStore::new();
        assert_eq!(store.check("write_file"), PermissionStatus::NeedsConfirmation);
    }

    #[test]
    fn test_clear_session_removes_grants() {
        let mut store = PermissionStore::new();
        store.grant("zzz");
        store.grant("aaa");
        assert_eq!(store.list()[0].tool_name, "aaa");
        store.clear_session();
        assert_eq!(store.check("aaa"), PermissionStatus::NeedsConfirmation);
        assert!(!store.revoke("zzz"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_closed() {
        let mut gate = PermissionGate::new(None, false);
        let result = gate.authorize(&details("write_file", RiskLevel::Moderate)).await;
        assert!(matches!(
            result,
            Err(AgentError::MissingConfirmationHandler { .. })
        ));
    }

    #[test]
    fn test_ensure_can_authorize_without_handler() {
        let mut gate = PermissionGate::new(None, true);
        assert!(gate.ensure_can_authorize(&details("read_file", RiskLevel::Safe)).is_ok());
        assert!(gate
            .ensure_can_authorize(&details("write_file", RiskLevel::Moderate))
            .is_err());

        gate.permissions_mut().grant("write_file");
        assert!(gate
            .ensure_can_authorize(&details("write_file", RiskLevel::Moderate))
            .is_ok());
        assert!(gate
            .ensure_can_authorize(&details("write_file", RiskLevel::Dangerous))
            .is_err());
    }

    #[tokio::test]
    async fn test_safe_auto_approval_requires_setting() {
        let handler = counting(ConfirmationResponse::Rejected);
        let mut gate = PermissionGate::new(Some(handler.clone()), false);
        let outcome = gate.authorize(&details("write_file", RiskLevel::Safe)).await.unwrap();
        assert!(!outcome.granted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        gate.set_auto_approve_safe(true);
        let outcome = gate.authorize(&details("write_file", RiskLevel::Safe)).await.unwrap();
        assert!(outcome.granted);
        assert!(!outcome.prompted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auto_approval_never_covers_moderate() {
        let handler = counting(ConfirmationResponse::Rejected);
        let mut gate = PermissionGate::new(Some(handler.clone()), true);
        let outcome = gate.authorize(&details("write_file", RiskLevel::Moderate)).await.unwrap();
        assert!(!outcome.granted);
        assert!(outcome.prompted);
    }

    #[tokio::test]
    async fn test_session_grant_skips_prompt_for_moderate_only() {
        let handler = counting(ConfirmationResponse::ConfirmedForSession);
        let mut gate = PermissionGate::new(Some(handler.clone()), false);

        gate.authorize(&details("run_shell_command", RiskLevel::Moderate)).await.unwrap();
        let second = gate.authorize(&details("run_shell_command", RiskLevel::Moderate)).await.unwrap();
        assert!(second.granted);
        assert!(!second.prompted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        let dangerous = gate.authorize(&details("run_shell_command", RiskLevel::Dangerous)).await.unwrap();
        assert!(dangerous.prompted);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dangerous_session_answer_does_not_store_grant() {
        let handler = counting(ConfirmationResponse::ConfirmedForSession);
        let mut gate = PermissionGate::new(Some(handler), false);
        gate.authorize(&details("run_shell_command", RiskLevel::Dangerous)).await.unwrap();
        assert_eq!(
            gate.permissions().check("run_shell_command"),
            PermissionStatus::NeedsConfirmation
        );
    }

    #[tokio::test]
    async fn test_policy_handler_allow_up_to() {
        let handler = PolicyConfirmationHandler::new(ConfirmationPolicy::AllowUpTo(RiskLevel::Moderate));
        assert_eq!(
            handler.confirm(&details("x", RiskLevel::Moderate)).await,
            ConfirmationResponse::Confirmed
        );
        assert_eq!(
            handler.confirm(&details("x", RiskLevel::Dangerous)).await,
            ConfirmationResponse::Rejected
        );
    }

    #[tokio::test]
    async fn test_channel_handler_round_trip() {
        let (handler, mut rx) = ChannelConfirmationHandler::new(4);
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            assert_eq!(request.details.tool_name, "write_file");
            request.respond_to.send(ConfirmationResponse::Confirmed).unwrap();
        });
        let response = handler.confirm(&details("write_file", RiskLevel::Moderate)).await;
        assert_eq!(response, ConfirmationResponse::Confirmed);
    }

    #[tokio::test]
    async fn test_channel_handler_dropped_request_is_rejection() {
        let (handler, mut rx) = ChannelConfirmationHandler::new(4);
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            drop(request);
        });
        let response = handler.confirm(&details("write_file", RiskLevel::Moderate)).await;
        assert_eq!(response, ConfirmationResponse::Rejected);
    }
}
