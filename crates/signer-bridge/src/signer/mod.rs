//! Signing core.
//!
//! Executes approved operations against the injected [`KeyMaterial`]. Each
//! execution holds the `(callingApp, action)` signing lock for the duration
//! of the in-memory crypto call only.

pub mod event;
pub mod keys;

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::coordinator::KeyedLocks;
use crate::error::{BridgeError, Result};
use crate::operation::Operation;
use crate::request::Action;

use event::{Event, assemble, event_digest};
use keys::KeyMaterial;

/// Public artifact produced by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SigningResult {
    PublicKey(String),
    SignedEvent { signature: String, event: Event },
    Ciphertext(String),
    Plaintext(String),
}

impl SigningResult {
    /// Value placed in the `result` field of a response.
    pub fn result_value(&self) -> &str {
        match self {
            SigningResult::PublicKey(value)
            | SigningResult::Ciphertext(value)
            | SigningResult::Plaintext(value) => value,
            SigningResult::SignedEvent { signature, .. } => signature,
        }
    }

    pub fn event(&self) -> Option<&Event> {
        match self {
            SigningResult::SignedEvent { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Sole owner of the signer's key material.
pub struct SigningCore {
    key: Arc<dyn KeyMaterial>,
    locks: KeyedLocks<(String, Action)>,
}

impl SigningCore {
    pub fn new(key: Arc<dyn KeyMaterial>) -> Self {
        Self {
            key,
            locks: KeyedLocks::new(),
        }
    }

    pub fn public_key_hex(&self) -> String {
        self.key.public_key_hex()
    }

    /// Run `operation` for `calling_app`.
    pub async fn execute(&self, calling_app: &str, operation: &Operation) -> Result<SigningResult> {
        let action = operation.action();
        let _guard = self.locks.lock(&(calling_app.to_string(), action)).await;
        debug!(calling_app, %action, "Executing signing operation");

        let result = self.run(operation);
        if let Err(err) = &result {
            warn!(calling_app, %action, error = %err, "Signing operation failed");
        }
        result
    }

    fn run(&self, operation: &Operation) -> Result<SigningResult> {
        let key = self.key.as_ref();
        let result = match operation {
            Operation::GetPublicKey => SigningResult::PublicKey(key.public_key_hex()),
            Operation::SignEvent(template) => {
                let unsigned = template.to_unsigned(&key.public_key_hex());
                let digest = event_digest(&unsigned)
                    .map_err(|e| BridgeError::InvalidEventPayload(e.to_string()))?;
                let sig = key.sign_digest(digest)?;
                let event = assemble(unsigned, digest, sig);
                SigningResult::SignedEvent {
                    signature: event.sig.clone(),
                    event,
                }
            }
            Operation::Nip04Encrypt { peer, plaintext } => {
                SigningResult::Ciphertext(key.nip04_encrypt(peer, plaintext)?)
            }
            Operation::Nip04Decrypt { peer, ciphertext } => {
                SigningResult::Plaintext(key.nip04_decrypt(peer, ciphertext)?)
            }
            Operation::Nip44Encrypt { peer, plaintext } => {
                SigningResult::Ciphertext(key.nip44_encrypt(peer, plaintext)?)
            }
            Operation::Nip44Decrypt { peer, ciphertext } => {
                SigningResult::Plaintext(key.nip44_decrypt(peer, ciphertext)?)
            }
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::event::{EventTemplate, verify_event};
    use crate::signer::keys::LocalKey;

    fn core() -> SigningCore {
        SigningCore::new(Arc::new(LocalKey::generate()))
    }

    #[tokio::test]
    async fn test_sign_event_verifies() {
        let core = core();
        let template = EventTemplate::from_json(r#"{"kind": 1, "content": "gm"}"#, 1_700_000_000)
            .unwrap();
        let result = core
            .execute("app", &Operation::SignEvent(template))
            .await
            .unwrap();

        let event = result.event().unwrap();
        assert_eq!(event.pubkey, core.public_key_hex());
        assert_eq!(result.result_value(), event.sig);
        assert!(verify_event(event).unwrap());
    }

    #[tokio::test]
    async fn test_get_public_key() {
        let core = core();
        let result = core.execute("app", &Operation::GetPublicKey).await.unwrap();
        assert_eq!(result, SigningResult::PublicKey(core.public_key_hex()));
    }

    #[tokio::test]
    async fn test_crypto_failure_reported() {
        let core = core();
        let op = Operation::Nip04Decrypt {
            peer: core.public_key_hex(),
            ciphertext: "garbage".into(),
        };
        assert!(matches!(
            core.execute("app", &op).await,
            Err(BridgeError::CryptoOperationFailed(_))
        ));
    }
}
