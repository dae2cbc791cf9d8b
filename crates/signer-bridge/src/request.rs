//! NIP-55 signing requests as seen by the bridge.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/55.md>

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation a calling app asks the signer to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GetPublicKey,
    SignEvent,
    Nip04Encrypt,
    Nip04Decrypt,
    Nip44Encrypt,
    Nip44Decrypt,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::GetPublicKey,
        Action::SignEvent,
        Action::Nip04Encrypt,
        Action::Nip04Decrypt,
        Action::Nip44Encrypt,
        Action::Nip44Decrypt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetPublicKey => "get_public_key",
            Action::SignEvent => "sign_event",
            Action::Nip04Encrypt => "nip04_encrypt",
            Action::Nip04Decrypt => "nip04_decrypt",
            Action::Nip44Encrypt => "nip44_encrypt",
            Action::Nip44Decrypt => "nip44_decrypt",
        }
    }

    /// Parse a wire identifier. Unknown identifiers yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|action| action.as_str() == s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// De-duplication key of a request: `(callingApp, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub calling_app: String,
    pub id: String,
}

impl RequestKey {
    pub fn new(calling_app: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            calling_app: calling_app.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.calling_app, self.id)
    }
}

/// A validated signing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    /// Caller-supplied id, unique per calling app
    pub id: String,
    /// Requested operation
    #[serde(rename = "type")]
    pub action: Action,
    /// Operation parameters (event JSON, pubkey, plaintext, ciphertext)
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Package identifier of the calling app
    pub calling_app: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl SigningRequest {
    pub fn new(
        action: Action,
        id: impl Into<String>,
        calling_app: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            params: BTreeMap::new(),
            calling_app: calling_app.into(),
            timestamp,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.calling_app.clone(), self.id.clone())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}
