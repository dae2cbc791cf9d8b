//! The signing bridge.
//!
//! Wires the pipeline together:
//!
//! ```text
//! raw bytes -> validator -> operation preflight -> coordinator claim
//!           -> decision engine (rules, prompt) -> signing core -> audit
//! ```
//!
//! The leader of a `(callingApp, id)` pair runs the pipeline on its own task,
//! so a caller that goes away does not cancel a prompt already shown. Every
//! other caller of the same pair follows the leader's progress.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span};

use crate::approval::Approver;
use crate::audit::{AuditDecision, AuditEntry, AuditError, AuditLog, JsonlAuditSink};
use crate::config::{BridgeConfig, ConfigError};
use crate::coordinator::{
    Claim, InFlight, Outcome, RequestCoordinator, RequestState, wait_for_outcome,
};
use crate::engine::{DecisionEngine, PendingDecision, SubmitMode, Verdict};
use crate::error::BridgeError;
use crate::operation::Operation;
use crate::permissions::{PermissionStore, SqliteRuleBackend};
use crate::request::SigningRequest;
use crate::response::BridgeResponse;
use crate::signer::SigningCore;
use crate::signer::keys::KeyMaterial;
use crate::validator::RequestValidator;

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::InternalError(err.to_string())
    }
}

impl From<AuditError> for BridgeError {
    fn from(err: AuditError) -> Self {
        BridgeError::InternalError(err.to_string())
    }
}

/// Health probe answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStatus {
    pub version: &'static str,
    pub pubkey: String,
    /// Requests waiting for the user
    pub pending: usize,
    pub in_flight: usize,
    pub rules: usize,
}

struct BridgeInner {
    validator: RequestValidator,
    engine: DecisionEngine,
    signer: SigningCore,
    audit: AuditLog,
    coordinator: RequestCoordinator,
}

#[derive(Clone)]
pub struct SigningBridge {
    inner: Arc<BridgeInner>,
}

pub struct SigningBridgeBuilder {
    config: BridgeConfig,
    key: Arc<dyn KeyMaterial>,
    approver: Arc<dyn Approver>,
    store: Option<Arc<PermissionStore>>,
    audit: Option<AuditLog>,
}

impl SigningBridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn permission_store(mut self, store: Arc<PermissionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<SigningBridge, ConfigError> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(PermissionStore::in_memory()));
        let inner = BridgeInner {
            validator: RequestValidator::new(
                config.freshness_window_ms as i64,
                config.max_request_bytes,
            ),
            engine: DecisionEngine::new(store, self.approver, config.approval_timeout()),
            signer: SigningCore::new(self.key),
            audit: self.audit.unwrap_or_else(AuditLog::tracing_only),
            coordinator: RequestCoordinator::new(
                config.completed_cache_ttl(),
                config.completed_cache_capacity,
            ),
        };
        Ok(SigningBridge {
            inner: Arc::new(inner),
        })
    }
}

impl SigningBridge {
    pub fn builder(key: Arc<dyn KeyMaterial>, approver: Arc<dyn Approver>) -> SigningBridgeBuilder {
        SigningBridgeBuilder {
            config: BridgeConfig::default(),
            key,
            approver,
            store: None,
            audit: None,
        }
    }

    /// Bridge with SQLite rules and a JSONL audit trail under the config's
    /// data directory.
    pub fn open(
        config: BridgeConfig,
        key: Arc<dyn KeyMaterial>,
        approver: Arc<dyn Approver>,
    ) -> Result<Self, BridgeError> {
        let data_path = config.data_path()?;
        std::fs::create_dir_all(&data_path).map_err(|err| {
            BridgeError::InternalError(format!("failed to create {}: {err}", data_path.display()))
        })?;
        let backend = SqliteRuleBackend::open(config.permissions_db_path()?)?;
        let store = PermissionStore::open(Arc::new(backend))?;
        let audit = AuditLog::tracing_only()
            .with_sink(Arc::new(JsonlAuditSink::open(config.audit_log_path()?)?));
        Ok(Self::builder(key, approver)
            .config(config)
            .permission_store(Arc::new(store))
            .audit_log(audit)
            .build()?)
    }

    /// Handle a request and wait for its terminal outcome.
    pub async fn handle(&self, raw: &[u8]) -> BridgeResponse {
        self.process(raw, SubmitMode::Interactive, true).await
    }

    /// Handle a request, answering `{"processing": true}` as soon as it is
    /// waiting for the user. Resubmitting the same `(callingApp, id)` later
    /// returns the outcome.
    pub async fn submit(&self, raw: &[u8], mode: SubmitMode) -> BridgeResponse {
        self.process(raw, mode, false).await
    }

    pub fn ping(&self) -> BridgeStatus {
        BridgeStatus {
            version: env!("CARGO_PKG_VERSION"),
            pubkey: self.inner.signer.public_key_hex(),
            pending: self.inner.engine.pending().len(),
            in_flight: self.inner.coordinator.in_flight(),
            rules: self.inner.engine.store().len(),
        }
    }

    pub fn pending(&self) -> Vec<PendingDecision> {
        self.inner.engine.pending()
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        self.inner.engine.store()
    }

    async fn process(&self, raw: &[u8], mode: SubmitMode, wait: bool) -> BridgeResponse {
        let inner = &self.inner;
        let now = chrono::Utc::now();

        let request = match inner.validator.validate(raw, now.timestamp_millis()) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "Rejected request");
                inner.audit.append(AuditEntry::for_error(None, &err));
                return BridgeResponse::error(None, &err);
            }
        };

        let operation = match Operation::prepare(
            &request,
            &inner.signer.public_key_hex(),
            now.timestamp().max(0) as u64,
        ) {
            Ok(operation) => operation,
            Err(err) => {
                debug!(
                    calling_app = %request.calling_app,
                    action = %request.action,
                    request_id = %request.id,
                    error = %err,
                    "Rejected request parameters"
                );
                inner.audit.append(AuditEntry::for_error(Some(&request), &err));
                return BridgeResponse::error(Some(request.id), &err);
            }
        };

        let claim = if mode == SubmitMode::Background
            && inner
                .engine
                .store()
                .lookup(&request.calling_app, request.action, operation.target().as_deref())
                .is_none()
        {
            match inner.coordinator.observe(&request.key()) {
                Some(existing) => existing,
                None => {
                    let err = BridgeError::ApprovalRequired;
                    debug!(
                        calling_app = %request.calling_app,
                        action = %request.action,
                        request_id = %request.id,
                        "No rule; approval required"
                    );
                    inner.audit.append(AuditEntry::for_error(Some(&request), &err));
                    return BridgeResponse::error(Some(request.id), &err);
                }
            }
        } else {
            inner.coordinator.claim(&request.key())
        };

        let rx = match claim {
            Claim::Completed(outcome) => return BridgeResponse::from_outcome(request.id, &outcome),
            Claim::Joined(rx) => rx,
            Claim::Leader(in_flight) => {
                let rx = in_flight.subscribe();
                let span = info_span!(
                    "request",
                    calling_app = %request.calling_app,
                    action = %request.action,
                    request_id = %request.id,
                );
                tokio::spawn(
                    run_pipeline(self.inner.clone(), request.clone(), operation, mode, in_flight)
                        .instrument(span),
                );
                rx
            }
        };

        if wait {
            let outcome = wait_for_outcome(rx).await;
            BridgeResponse::from_outcome(request.id, &outcome)
        } else {
            respond_when_settled(request.id, rx, mode).await
        }
    }
}

/// Wait until the request is either finished or waiting for the user. A
/// background submission never reports `processing`.
async fn respond_when_settled(
    id: String,
    mut rx: watch::Receiver<RequestState>,
    mode: SubmitMode,
) -> BridgeResponse {
    let state = match rx
        .wait_for(|state| !matches!(state, RequestState::Received))
        .await
    {
        Ok(state) => state.clone(),
        Err(_) => {
            return BridgeResponse::error(
                Some(id),
                &BridgeError::InternalError("request execution was abandoned".into()),
            );
        }
    };
    match state {
        RequestState::Done(outcome) => BridgeResponse::from_outcome(id, &outcome),
        _ if mode == SubmitMode::Background => {
            BridgeResponse::error(Some(id), &BridgeError::ApprovalRequired)
        }
        _ => BridgeResponse::processing(id),
    }
}

async fn run_pipeline(
    inner: Arc<BridgeInner>,
    request: SigningRequest,
    operation: Operation,
    mode: SubmitMode,
    in_flight: InFlight,
) {
    let target = operation.target();
    let decision = inner
        .engine
        .decide(&request, target.as_deref(), mode, || {
            in_flight.set_awaiting_user()
        })
        .await;

    let outcome: Result<(Verdict, _), BridgeError> = match decision {
        Ok(verdict) => inner
            .signer
            .execute(&request.calling_app, &operation)
            .await
            .map(|result| (verdict, result)),
        Err(err) => Err(err),
    };

    let entry = match &outcome {
        Ok((Verdict::AutoAllowed, _)) => AuditEntry::for_request(AuditDecision::AutoAllowed, &request),
        Ok((Verdict::Allowed, _)) => AuditEntry::for_request(AuditDecision::Allowed, &request),
        Err(err) => AuditEntry::for_error(Some(&request), err),
    };
    let entry = match (target.as_deref(), operation.peer()) {
        _ if entry.detail.is_some() => entry,
        (Some(target), _) => entry.with_detail(format!("target={target}")),
        (None, Some(peer)) => entry.with_detail(format!("peer={peer}")),
        (None, None) => entry,
    };
    inner.audit.append(entry);

    let outcome: Outcome = outcome.map(|(_, result)| result);
    debug!(ok = outcome.is_ok(), "Request finished");
    in_flight.finish(outcome);
}
