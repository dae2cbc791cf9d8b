//! NIP-01 events: canonical serialization, id and Schnorr signature.
//!
//! Calling apps hand the bridge an event template as JSON. The bridge fills in
//! its own public key, computes the id over
//! `[0, pubkey, created_at, kind, tags, content]` and signs the id.

use bitcoin::hashes::{Hash, sha256};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Message, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while parsing or verifying events.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("verification error: {0}")]
    Verification(String),
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Event as submitted by a calling app, without the signer's public key.
///
/// `pubkey` is kept only when the caller supplied one, so the bridge can
/// refuse to sign for a key it does not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub pubkey: Option<String>,
}

impl EventTemplate {
    /// Parse the `event` parameter of a `sign_event` request.
    ///
    /// `kind` is required. `created_at` defaults to `now_secs`, `content` and
    /// `tags` default to empty.
    pub fn from_json(raw: &str, now_secs: u64) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| EventError::InvalidJson(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(EventError::InvalidEvent("event must be a JSON object".into()));
        };

        let kind = match object.get("kind") {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|k| u16::try_from(k).ok())
                .ok_or_else(|| EventError::InvalidEvent(format!("kind {n} out of range")))?,
            Some(_) => return Err(EventError::InvalidEvent("kind must be an integer".into())),
            None => return Err(EventError::InvalidEvent("missing kind".into())),
        };

        let created_at = match object.get("created_at") {
            None | Some(Value::Null) => now_secs,
            Some(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| EventError::InvalidEvent("created_at must be non-negative".into()))?,
            Some(_) => {
                return Err(EventError::InvalidEvent(
                    "created_at must be an integer".into(),
                ));
            }
        };

        let content = match object.get("content") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(EventError::InvalidEvent("content must be a string".into())),
        };

        let tags = match object.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(tags) => serde_json::from_value::<Vec<Vec<String>>>(tags.clone())
                .map_err(|_| EventError::InvalidEvent("tags must be arrays of strings".into()))?,
        };

        let pubkey = match object.get("pubkey") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.to_lowercase()),
            Some(_) => return Err(EventError::InvalidEvent("pubkey must be a string".into())),
        };

        Ok(Self {
            created_at,
            kind,
            tags,
            content,
            pubkey,
        })
    }

    /// Bind the template to the signer's public key.
    pub fn to_unsigned(&self, pubkey: &str) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: pubkey.to_string(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, EventError> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(EventError::InvalidEvent(
            "pubkey must be 64 lowercase hex characters".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| EventError::Serialization(e.to_string()))
}

/// sha256 of the canonical serialization.
pub fn event_digest(event: &UnsignedEvent) -> Result<[u8; 32], EventError> {
    let serialized = serialize_event(event)?;
    Ok(sha256::Hash::hash(serialized.as_bytes()).to_byte_array())
}

/// Attach an id and signature to an unsigned event.
pub fn assemble(unsigned: UnsignedEvent, id: [u8; 32], sig: [u8; 64]) -> Event {
    Event {
        id: hex::encode(id),
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(sig),
    }
}

/// Verify an event's id and signature.
pub fn verify_event(event: &Event) -> Result<bool, EventError> {
    if !is_lower_hex(&event.id, 64) || !is_lower_hex(&event.sig, 128) {
        return Ok(false);
    }

    let unsigned = UnsignedEvent {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        kind: event.kind,
        tags: event.tags.clone(),
        content: event.content.clone(),
    };
    let digest = event_digest(&unsigned)?;
    if hex::encode(digest) != event.id {
        return Ok(false);
    }

    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(digest);

    let sig_bytes = hex::decode(&event.sig)
        .map_err(|e| EventError::Verification(format!("invalid sig hex: {e}")))?;
    let sig = schnorr::Signature::from_slice(&sig_bytes)
        .map_err(|e| EventError::Verification(format!("invalid signature: {e}")))?;

    let pubkey_bytes = hex::decode(&event.pubkey)
        .map_err(|e| EventError::Verification(format!("invalid pubkey hex: {e}")))?;
    let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
        .map_err(|e| EventError::Verification(format!("invalid pubkey: {e}")))?;

    Ok(secp.verify_schnorr(&sig, &message, &pubkey).is_ok())
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}
