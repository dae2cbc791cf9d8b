//! Parameter preflight.
//!
//! Turns a validated request into a typed [`Operation`] before any decision
//! or key access, so missing parameters and broken event payloads are
//! reported without prompting the user.

use crate::error::{BridgeError, Result};
use crate::request::{Action, SigningRequest};
use crate::signer::event::EventTemplate;

/// Request parameter names
pub mod params {
    pub const EVENT: &str = "event";
    pub const PUBKEY: &str = "pubkey";
    pub const PLAINTEXT: &str = "plaintext";
    pub const CIPHERTEXT: &str = "ciphertext";
}

/// A fully-parameterised operation for the signing core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    GetPublicKey,
    SignEvent(EventTemplate),
    Nip04Encrypt { peer: String, plaintext: String },
    Nip04Decrypt { peer: String, ciphertext: String },
    Nip44Encrypt { peer: String, plaintext: String },
    Nip44Decrypt { peer: String, ciphertext: String },
}

impl Operation {
    /// Extract and check the parameters `request.action` needs.
    ///
    /// `signer_pubkey` is the key the bridge signs with; an event naming any
    /// other pubkey is rejected. `now_secs` fills a missing `created_at`.
    pub fn prepare(request: &SigningRequest, signer_pubkey: &str, now_secs: u64) -> Result<Self> {
        let op = match request.action {
            Action::GetPublicKey => Operation::GetPublicKey,
            Action::SignEvent => {
                let raw = require(request, params::EVENT)?;
                let template = EventTemplate::from_json(raw, now_secs)
                    .map_err(|e| BridgeError::InvalidEventPayload(e.to_string()))?;
                if let Some(pubkey) = &template.pubkey
                    && pubkey != signer_pubkey
                {
                    return Err(BridgeError::InvalidEventPayload(format!(
                        "event pubkey {pubkey} does not match the signer"
                    )));
                }
                Operation::SignEvent(template)
            }
            Action::Nip04Encrypt => Operation::Nip04Encrypt {
                peer: peer(request)?,
                plaintext: require(request, params::PLAINTEXT)?.to_string(),
            },
            Action::Nip04Decrypt => Operation::Nip04Decrypt {
                peer: peer(request)?,
                ciphertext: require(request, params::CIPHERTEXT)?.to_string(),
            },
            Action::Nip44Encrypt => Operation::Nip44Encrypt {
                peer: peer(request)?,
                plaintext: require(request, params::PLAINTEXT)?.to_string(),
            },
            Action::Nip44Decrypt => Operation::Nip44Decrypt {
                peer: peer(request)?,
                ciphertext: require(request, params::CIPHERTEXT)?.to_string(),
            },
        };
        Ok(op)
    }

    pub fn action(&self) -> Action {
        match self {
            Operation::GetPublicKey => Action::GetPublicKey,
            Operation::SignEvent(_) => Action::SignEvent,
            Operation::Nip04Encrypt { .. } => Action::Nip04Encrypt,
            Operation::Nip04Decrypt { .. } => Action::Nip04Decrypt,
            Operation::Nip44Encrypt { .. } => Action::Nip44Encrypt,
            Operation::Nip44Decrypt { .. } => Action::Nip44Decrypt,
        }
    }

    /// Permission target: the event kind for `sign_event`. Every other
    /// action is permitted per `(callingApp, action)` only.
    pub fn target(&self) -> Option<String> {
        match self {
            Operation::SignEvent(template) => Some(template.kind.to_string()),
            _ => None,
        }
    }

    /// Counterparty of an encryption operation.
    pub fn peer(&self) -> Option<&str> {
        match self {
            Operation::Nip04Encrypt { peer, .. }
            | Operation::Nip04Decrypt { peer, .. }
            | Operation::Nip44Encrypt { peer, .. }
            | Operation::Nip44Decrypt { peer, .. } => Some(peer),
            _ => None,
        }
    }
}

fn require<'a>(request: &'a SigningRequest, name: &str) -> Result<&'a str> {
    match request.param(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(BridgeError::MissingParameter(name.to_string())),
    }
}

fn peer(request: &SigningRequest) -> Result<String> {
    Ok(require(request, params::PUBKEY)?.trim().to_lowercase())
}
