//! Error taxonomy for bridge requests.
//!
//! Every terminal failure of a request is one [`BridgeError`]. Callers use
//! [`BridgeError::class`] to tell a security-policy denial apart from a
//! rejected request or a crypto failure.

use serde::Serialize;
use thiserror::Error;

/// Errors that terminate a signing request.
///
/// The type is `Clone` so a single outcome can be handed to every caller that
/// submitted the same `(callingApp, id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("timestamp {timestamp} is outside the freshness window (now {now})")]
    StaleOrFutureTimestamp { timestamp: i64, now: i64 },

    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid event payload: {0}")]
    InvalidEventPayload(String),

    #[error("crypto operation failed: {0}")]
    CryptoOperationFailed(String),

    #[error("user did not respond before the approval timeout")]
    UserTimeout,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no remembered permission; user approval required")]
    ApprovalRequired,

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Coarse classification of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Rejected before any decision or cryptographic work.
    Rejected,
    /// Denied by policy: the user declined, a remembered rule denied, or the
    /// prompt timed out.
    Denied,
    /// The cryptographic primitive failed.
    CryptoFailure,
    /// Something broke inside the bridge.
    Internal,
}

impl BridgeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::MalformedRequest(_) => "malformed_request",
            BridgeError::UnsupportedAction(_) => "unsupported_action",
            BridgeError::StaleOrFutureTimestamp { .. } => "stale_or_future_timestamp",
            BridgeError::RequestTooLarge { .. } => "request_too_large",
            BridgeError::MissingParameter(_) => "missing_parameter",
            BridgeError::InvalidEventPayload(_) => "invalid_event_payload",
            BridgeError::CryptoOperationFailed(_) => "crypto_operation_failed",
            BridgeError::UserTimeout => "user_timeout",
            BridgeError::PermissionDenied(_) => "permission_denied",
            BridgeError::ApprovalRequired => "approval_required",
            BridgeError::InternalError(_) => "internal_error",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::MalformedRequest(_)
            | BridgeError::UnsupportedAction(_)
            | BridgeError::StaleOrFutureTimestamp { .. }
            | BridgeError::RequestTooLarge { .. }
            | BridgeError::MissingParameter(_)
            | BridgeError::InvalidEventPayload(_) => ErrorClass::Rejected,
            BridgeError::UserTimeout
            | BridgeError::PermissionDenied(_)
            | BridgeError::ApprovalRequired => ErrorClass::Denied,
            BridgeError::CryptoOperationFailed(_) => ErrorClass::CryptoFailure,
            BridgeError::InternalError(_) => ErrorClass::Internal,
        }
    }

    /// HTTP-equivalent status for transport adapters.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::RequestTooLarge { .. } => 413,
            BridgeError::UserTimeout => 408,
            _ => match self.class() {
                ErrorClass::Rejected => 400,
                ErrorClass::Denied => 403,
                ErrorClass::CryptoFailure => 422,
                ErrorClass::Internal => 500,
            },
        }
    }
}

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
