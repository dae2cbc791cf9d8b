#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use signer_bridge::approval::ApprovalError;
use signer_bridge::signer::keys::KeyError;
use signer_bridge::{
    ApprovalDecision, ApprovalPrompt, Approver, AuditLog, BridgeConfig, InMemoryAuditLog,
    KeyMaterial, LocalKey, PermissionStore, SigningBridge,
};

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serialized request body.
pub fn request(action: &str, id: &str, app: &str, params: Value) -> Vec<u8> {
    request_at(action, id, app, params, now_ms())
}

pub fn request_at(action: &str, id: &str, app: &str, params: Value, timestamp: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": action,
        "id": id,
        "params": params,
        "callingApp": app,
        "timestamp": timestamp,
    }))
    .unwrap()
}

/// Answers every prompt the same way, optionally after a delay.
pub struct ScriptedApprover {
    answer: ApprovalDecision,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedApprover {
    pub fn new(answer: ApprovalDecision) -> Arc<Self> {
        Self::with_delay(answer, Duration::ZERO)
    }

    pub fn with_delay(answer: ApprovalDecision, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Approver for ScriptedApprover {
    async fn prompt_user(&self, _prompt: &ApprovalPrompt) -> Result<ApprovalDecision, ApprovalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answer)
    }
}

/// Local key that counts signatures.
pub struct CountingKey {
    inner: LocalKey,
    signatures: AtomicUsize,
}

impl CountingKey {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: LocalKey::generate(),
            signatures: AtomicUsize::new(0),
        })
    }

    pub fn signatures(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }
}

impl KeyMaterial for CountingKey {
    fn public_key_hex(&self) -> String {
        self.inner.public_key_hex()
    }

    fn sign_digest(&self, digest: [u8; 32]) -> Result<[u8; 64], KeyError> {
        self.signatures.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_digest(digest)
    }

    fn nip04_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError> {
        self.inner.nip04_encrypt(peer, plaintext)
    }

    fn nip04_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError> {
        self.inner.nip04_decrypt(peer, ciphertext)
    }

    fn nip44_encrypt(&self, peer: &str, plaintext: &str) -> Result<String, KeyError> {
        self.inner.nip44_encrypt(peer, plaintext)
    }

    fn nip44_decrypt(&self, peer: &str, ciphertext: &str) -> Result<String, KeyError> {
        self.inner.nip44_decrypt(peer, ciphertext)
    }
}

pub struct Harness {
    pub bridge: SigningBridge,
    pub key: Arc<CountingKey>,
    pub audit: InMemoryAuditLog,
}

impl Harness {
    pub fn pubkey(&self) -> String {
        self.key.public_key_hex()
    }
}

pub fn harness(approver: Arc<dyn Approver>) -> Harness {
    harness_with(approver, BridgeConfig::default(), Arc::new(PermissionStore::in_memory()))
}

pub fn harness_with(
    approver: Arc<dyn Approver>,
    config: BridgeConfig,
    store: Arc<PermissionStore>,
) -> Harness {
    signer_bridge::telemetry::init_test();
    let key = CountingKey::new();
    let audit = InMemoryAuditLog::new();
    let bridge = SigningBridge::builder(key.clone(), approver)
        .config(config)
        .permission_store(store)
        .audit_log(AuditLog::new(vec![Arc::new(audit.clone())]))
        .build()
        .unwrap();
    Harness { bridge, key, audit }
}
