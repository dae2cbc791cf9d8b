//! Human approval.
//!
//! The decision engine asks an [`Approver`] whenever no remembered rule
//! matches. [`ChannelApprover`] hands each prompt to a UI layer as a
//! [`PromptTicket`] and waits for the answer.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::operation::params;
use crate::permissions::RuleDecision;
use crate::request::{Action, SigningRequest};

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval UI unavailable")]
    Unavailable,

    #[error("approval failed: {0}")]
    Failed(String),
}

impl From<ApprovalError> for BridgeError {
    fn from(err: ApprovalError) -> Self {
        BridgeError::InternalError(err.to_string())
    }
}

/// Everything a UI needs to show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPrompt {
    pub request: SigningRequest,
    /// Event kind a remembered rule would be scoped to
    pub target: Option<String>,
}

impl ApprovalPrompt {
    pub fn new(request: SigningRequest, target: Option<String>) -> Self {
        Self { request, target }
    }

    /// One-line description for a dialog.
    pub fn describe(&self) -> String {
        let app = &self.request.calling_app;
        let kind = self.target.as_deref().unwrap_or("?");
        let peer = self.request.param(params::PUBKEY).unwrap_or("?");
        match self.request.action {
            Action::GetPublicKey => format!("{app} wants to read your public key"),
            Action::SignEvent => format!("{app} wants to sign a kind {kind} event"),
            Action::Nip04Encrypt | Action::Nip44Encrypt => {
                format!("{app} wants to encrypt a message for {peer}")
            }
            Action::Nip04Decrypt | Action::Nip44Decrypt => {
                format!("{app} wants to decrypt a message from {peer}")
            }
        }
    }
}

/// The user's answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub decision: RuleDecision,
    /// Store a rule so matching requests skip the prompt
    pub remember: bool,
    /// Store the rule for every target of the action, not just this one
    pub any_target: bool,
}

impl ApprovalDecision {
    pub fn allow() -> Self {
        Self {
            decision: RuleDecision::Allow,
            remember: false,
            any_target: false,
        }
    }

    pub fn deny() -> Self {
        Self {
            decision: RuleDecision::Deny,
            remember: false,
            any_target: false,
        }
    }

    pub fn remembered(mut self) -> Self {
        self.remember = true;
        self
    }

    pub fn for_any_target(mut self) -> Self {
        self.any_target = true;
        self
    }

    pub fn is_allow(&self) -> bool {
        self.decision == RuleDecision::Allow
    }
}

/// Asks a human whether a request may proceed.
///
/// Implementations may take arbitrarily long; the engine applies the
/// approval timeout.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn prompt_user(&self, prompt: &ApprovalPrompt) -> Result<ApprovalDecision, ApprovalError>;
}

/// A prompt waiting for the UI. Dropping it unanswered denies the request.
#[derive(Debug)]
pub struct PromptTicket {
    pub prompt: ApprovalPrompt,
    responder: oneshot::Sender<ApprovalDecision>,
}

impl PromptTicket {
    /// Deliver the answer. Returns `false` if the request already gave up.
    pub fn respond(self, decision: ApprovalDecision) -> bool {
        self.responder.send(decision).is_ok()
    }
}

/// Receiving half of a [`ChannelApprover`].
pub struct PromptQueue {
    rx: mpsc::Receiver<PromptTicket>,
}

impl PromptQueue {
    pub async fn next(&mut self) -> Option<PromptTicket> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<PromptTicket> {
        self.rx.try_recv().ok()
    }
}

/// Prompts that may wait for the UI before new ones are refused.
pub const DEFAULT_PROMPT_QUEUE_CAPACITY: usize = 64;

/// Forwards prompts to a [`PromptQueue`].
#[derive(Clone)]
pub struct ChannelApprover {
    tx: mpsc::Sender<PromptTicket>,
}

impl ChannelApprover {
    pub fn new() -> (Self, PromptQueue) {
        Self::with_capacity(DEFAULT_PROMPT_QUEUE_CAPACITY)
    }

    /// A full queue fails further prompts with [`ApprovalError::Unavailable`].
    pub fn with_capacity(capacity: usize) -> (Self, PromptQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, PromptQueue { rx })
    }
}

#[async_trait]
impl Approver for ChannelApprover {
    async fn prompt_user(&self, prompt: &ApprovalPrompt) -> Result<ApprovalDecision, ApprovalError> {
        let (responder, answer) = oneshot::channel();
        let ticket = PromptTicket {
            prompt: prompt.clone(),
            responder,
        };
        if let Err(err) = self.tx.try_send(ticket) {
            if matches!(err, mpsc::error::TrySendError::Full(_)) {
                warn!(
                    calling_app = %prompt.request.calling_app,
                    request_id = %prompt.request.id,
                    "Prompt queue full"
                );
            }
            return Err(ApprovalError::Unavailable);
        }

        match answer.await {
            Ok(decision) => Ok(decision),
            Err(_) => {
                debug!(
                    calling_app = %prompt.request.calling_app,
                    request_id = %prompt.request.id,
                    "Prompt dismissed without an answer"
                );
                Ok(ApprovalDecision::deny())
            }
        }
    }
}
