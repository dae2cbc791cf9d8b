//! Response shapes returned to calling apps.
//!
//! - `{"id", "result", "event"?}` on success
//! - `{"id"?, "error", "code", "class"}` on failure
//! - `{"id", "processing": true}` while the user has not answered

use serde::Serialize;

use crate::coordinator::Outcome;
use crate::error::{BridgeError, ErrorClass};
use crate::signer::event::Event;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BridgeResponse {
    Result {
        id: String,
        result: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<Event>,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        error: String,
        code: &'static str,
        class: ErrorClass,
        #[serde(skip)]
        status: u16,
    },
    Processing {
        id: String,
        processing: bool,
    },
}

impl BridgeResponse {
    pub fn from_outcome(id: impl Into<String>, outcome: &Outcome) -> Self {
        let id = id.into();
        match outcome {
            Ok(result) => BridgeResponse::Result {
                id,
                result: result.result_value().to_string(),
                event: result.event().cloned(),
            },
            Err(err) => BridgeResponse::error(Some(id), err),
        }
    }

    pub fn error(id: Option<String>, err: &BridgeError) -> Self {
        BridgeResponse::Error {
            id,
            error: err.to_string(),
            code: err.code(),
            class: err.class(),
            status: err.status_code(),
        }
    }

    pub fn processing(id: impl Into<String>) -> Self {
        BridgeResponse::Processing {
            id: id.into(),
            processing: true,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, BridgeResponse::Processing { .. })
    }

    /// The `result` value, if this is a success.
    pub fn result(&self) -> Option<&str> {
        match self {
            BridgeResponse::Result { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            BridgeResponse::Error { code, .. } => Some(code),
            _ => None,
        }
    }

    /// HTTP-equivalent status for transport adapters.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeResponse::Result { .. } => 200,
            BridgeResponse::Processing { .. } => 202,
            BridgeResponse::Error { status, .. } => *status,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from(r#"{"error":"internal"}"#))
    }
}
