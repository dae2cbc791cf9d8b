//! Decision engine.
//!
//! Per request: `RECEIVED -> {AUTO_ALLOWED | AUTO_DENIED | AWAITING_USER} ->
//! {ALLOWED | DENIED}`. Remembered rules short-circuit the prompt; a
//! remembered answer is made durable before the decision is returned, and
//! therefore before anything is signed.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalDecision, ApprovalPrompt, Approver};
use crate::error::{BridgeError, Result};
use crate::permissions::{PermissionRule, PermissionStore, RuleDecision, RuleScope};
use crate::request::{RequestKey, SigningRequest};

/// Default approval timeout
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// How a request may be resolved when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitMode {
    /// Prompt the user.
    #[default]
    Interactive,
    /// Never prompt; fail with `ApprovalRequired`.
    Background,
}

/// Outcome of a successful decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A remembered allow rule matched.
    AutoAllowed,
    /// The user approved.
    Allowed,
}

/// A request waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecision {
    pub request_key: RequestKey,
    pub request: SigningRequest,
    pub target: Option<String>,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

/// Removes a pending entry however the prompt ends.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestKey, PendingDecision>,
    key: RequestKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

pub struct DecisionEngine {
    store: Arc<PermissionStore>,
    approver: Arc<dyn Approver>,
    approval_timeout: Duration,
    pending: DashMap<RequestKey, PendingDecision>,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<PermissionStore>,
        approver: Arc<dyn Approver>,
        approval_timeout: Duration,
    ) -> Self {
        Self {
            store,
            approver,
            approval_timeout,
            pending: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<PermissionStore> {
        &self.store
    }

    /// Requests currently awaiting the user, oldest first.
    pub fn pending(&self) -> Vec<PendingDecision> {
        let mut pending: Vec<_> = self.pending.iter().map(|entry| entry.clone()).collect();
        pending.sort_by_key(|entry| entry.created_at);
        pending
    }

    /// Decide whether `request` may proceed.
    ///
    /// `on_prompt` runs once the request is listed as pending, just before the
    /// approver is invoked. No lock is held while waiting for the user.
    pub async fn decide(
        &self,
        request: &SigningRequest,
        target: Option<&str>,
        mode: SubmitMode,
        on_prompt: impl FnOnce(),
    ) -> Result<Verdict> {
        let calling_app = request.calling_app.as_str();
        let action = request.action;

        if let Some(rule) = self.store.lookup(calling_app, action, target) {
            return match rule.decision {
                RuleDecision::Allow => {
                    debug!(calling_app, %action, request_id = %request.id, scope = %rule.scope, "Auto-allowed by rule");
                    Ok(Verdict::AutoAllowed)
                }
                RuleDecision::Deny => {
                    info!(calling_app, %action, request_id = %request.id, scope = %rule.scope, "Auto-denied by rule");
                    Err(BridgeError::PermissionDenied(format!(
                        "remembered rule denies {action} for {calling_app}"
                    )))
                }
            };
        }

        if mode == SubmitMode::Background {
            debug!(calling_app, %action, request_id = %request.id, "No rule; approval required");
            return Err(BridgeError::ApprovalRequired);
        }

        let answer = self.prompt(request, target, on_prompt).await?;

        if answer.remember {
            let scope = match target {
                Some(target) if !answer.any_target => RuleScope::ExactTarget(target.to_string()),
                _ => RuleScope::AnyTarget,
            };
            let rule = PermissionRule::new(calling_app, action, scope, answer.decision);
            self.store.upsert(rule).await.map_err(|err| {
                warn!(calling_app, %action, request_id = %request.id, error = %err, "Failed to persist remembered decision");
                BridgeError::from(err)
            })?;
        }

        if answer.is_allow() {
            info!(calling_app, %action, request_id = %request.id, remember = answer.remember, "User approved");
            Ok(Verdict::Allowed)
        } else {
            info!(calling_app, %action, request_id = %request.id, remember = answer.remember, "User denied");
            Err(BridgeError::PermissionDenied(format!(
                "user denied {action} for {calling_app}"
            )))
        }
    }

    async fn prompt(
        &self,
        request: &SigningRequest,
        target: Option<&str>,
        on_prompt: impl FnOnce(),
    ) -> Result<ApprovalDecision> {
        let key = request.key();
        self.pending.insert(
            key.clone(),
            PendingDecision {
                request_key: key.clone(),
                request: request.clone(),
                target: target.map(str::to_string),
                created_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            key,
        };
        on_prompt();

        info!(
            calling_app = %request.calling_app,
            action = %request.action,
            request_id = %request.id,
            "Awaiting user approval"
        );
        let prompt = ApprovalPrompt::new(request.clone(), target.map(str::to_string));
        match tokio::time::timeout(self.approval_timeout, self.approver.prompt_user(&prompt)).await
        {
            Ok(answer) => Ok(answer?),
            Err(_) => {
                info!(
                    calling_app = %request.calling_app,
                    action = %request.action,
                    request_id = %request.id,
                    timeout_ms = self.approval_timeout.as_millis() as u64,
                    "Approval timed out"
                );
                Err(BridgeError::UserTimeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalError;
    use crate::request::Action;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedApprover {
        answer: ApprovalDecision,
        calls: AtomicUsize,
    }

    impl FixedApprover {
        fn new(answer: ApprovalDecision) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Approver for FixedApprover {
        async fn prompt_user(
            &self,
            _prompt: &ApprovalPrompt,
        ) -> std::result::Result<ApprovalDecision, ApprovalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    struct SlowApprover;

    #[async_trait]
    impl Approver for SlowApprover {
        async fn prompt_user(
            &self,
            _prompt: &ApprovalPrompt,
        ) -> std::result::Result<ApprovalDecision, ApprovalError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ApprovalDecision::allow())
        }
    }

    fn engine(approver: Arc<dyn Approver>) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(PermissionStore::in_memory()),
            approver,
            DEFAULT_APPROVAL_TIMEOUT,
        )
    }

    fn request(id: &str) -> SigningRequest {
        SigningRequest::new(Action::SignEvent, id, "app", 1)
    }

    #[tokio::test]
    async fn test_remembered_allow_skips_prompt() {
        let approver = FixedApprover::new(ApprovalDecision::allow().remembered());
        let engine = engine(approver.clone());

        let first = engine
            .decide(&request("1"), Some("1"), SubmitMode::Interactive, || {})
            .await;
        assert_eq!(first, Ok(Verdict::Allowed));

        let second = engine
            .decide(&request("2"), Some("1"), SubmitMode::Interactive, || {})
            .await;
        assert_eq!(second, Ok(Verdict::AutoAllowed));
        assert_eq!(approver.calls.load(Ordering::SeqCst), 1);

        // Exact scope: another kind prompts again.
        let other_kind = engine
            .decide(&request("3"), Some("4"), SubmitMode::Interactive, || {})
            .await;
        assert_eq!(other_kind, Ok(Verdict::Allowed));
        assert_eq!(approver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_any_target_remember() {
        let approver = FixedApprover::new(ApprovalDecision::allow().remembered().for_any_target());
        let engine = engine(approver.clone());
        engine
            .decide(&request("1"), Some("1"), SubmitMode::Interactive, || {})
            .await
            .unwrap();
        assert_eq!(
            engine
                .decide(&request("2"), Some("30023"), SubmitMode::Interactive, || {})
                .await,
            Ok(Verdict::AutoAllowed)
        );
    }

    #[tokio::test]
    async fn test_user_deny_without_remember_prompts_again() {
        let approver = FixedApprover::new(ApprovalDecision::deny());
        let engine = engine(approver.clone());
        for id in ["1", "2"] {
            assert!(matches!(
                engine
                    .decide(&request(id), Some("1"), SubmitMode::Interactive, || {})
                    .await,
                Err(BridgeError::PermissionDenied(_))
            ));
        }
        assert_eq!(approver.calls.load(Ordering::SeqCst), 2);
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_background_mode_never_prompts() {
        let approver = FixedApprover::new(ApprovalDecision::allow());
        let engine = engine(approver.clone());
        let mut prompted = false;
        let result = engine
            .decide(&request("1"), Some("1"), SubmitMode::Background, || prompted = true)
            .await;
        assert_eq!(result, Err(BridgeError::ApprovalRequired));
        assert!(!prompted);
        assert_eq!(approver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_user_timeout() {
        let engine = DecisionEngine::new(
            Arc::new(PermissionStore::in_memory()),
            Arc::new(SlowApprover),
            Duration::from_secs(60),
        );
        let result = engine
            .decide(&request("1"), Some("1"), SubmitMode::Interactive, || {})
            .await;
        assert_eq!(result, Err(BridgeError::UserTimeout));
        assert!(engine.pending().is_empty());
    }

    #[tokio::test]
    async fn test_pending_visible_while_prompting() {
        let (approver, mut queue) = crate::approval::ChannelApprover::new();
        let engine = Arc::new(engine(Arc::new(approver)));

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .decide(&request("p1"), Some("1"), SubmitMode::Interactive, || {})
                    .await
            })
        };

        let ticket = queue.next().await.unwrap();
        let pending = engine.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_key, RequestKey::new("app", "p1"));
        assert_eq!(pending[0].target.as_deref(), Some("1"));

        ticket.respond(ApprovalDecision::allow());
        assert_eq!(task.await.unwrap(), Ok(Verdict::Allowed));
        assert!(engine.pending().is_empty());
    }
}
