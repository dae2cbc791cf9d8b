//! Permission store.
//!
//! Remembered decisions keyed by `(callingApp, action, scope)`. Reads are
//! served from memory; every mutation is written through to a
//! [`RuleBackend`] before it becomes visible, and mutations for one
//! `(callingApp, action)` pair are serialized.

pub mod sqlite;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::coordinator::KeyedLocks;
use crate::error::BridgeError;
use crate::request::Action;

pub use sqlite::SqliteRuleBackend;

/// Errors from the permission store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt rule: {0}")]
    Corrupt(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for BridgeError {
    fn from(err: StoreError) -> Self {
        BridgeError::InternalError(format!("permission store: {err}"))
    }
}

/// Which requests a rule covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "target")]
pub enum RuleScope {
    /// Only requests whose target (event kind) equals this value.
    ExactTarget(String),
    /// Every request for the action.
    AnyTarget,
}

impl RuleScope {
    pub fn for_target(target: Option<&str>) -> Self {
        match target {
            Some(target) => RuleScope::ExactTarget(target.to_string()),
            None => RuleScope::AnyTarget,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            RuleScope::ExactTarget(target) => Some(target),
            RuleScope::AnyTarget => None,
        }
    }
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::ExactTarget(target) => write!(f, "exact:{target}"),
            RuleScope::AnyTarget => f.write_str("any"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleDecision {
    Allow,
    Deny,
}

impl RuleDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleDecision::Allow => "ALLOW",
            RuleDecision::Deny => "DENY",
        }
    }
}

/// Identity of a rule; `upsert` is last-write-wins per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub calling_app: String,
    pub action: Action,
    pub scope: RuleScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    pub calling_app: String,
    pub action: Action,
    pub scope: RuleScope,
    pub decision: RuleDecision,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    pub remembered: bool,
}

impl PermissionRule {
    pub fn new(
        calling_app: impl Into<String>,
        action: Action,
        scope: RuleScope,
        decision: RuleDecision,
    ) -> Self {
        Self {
            calling_app: calling_app.into(),
            action,
            scope,
            decision,
            created_at: chrono::Utc::now().timestamp_millis(),
            remembered: true,
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey {
            calling_app: self.calling_app.clone(),
            action: self.action,
            scope: self.scope.clone(),
        }
    }
}

/// Durable storage for rules.
pub trait RuleBackend: Send + Sync {
    fn load_all(&self) -> Result<Vec<PermissionRule>, StoreError>;

    fn put(&self, rule: &PermissionRule) -> Result<(), StoreError>;

    /// Returns whether a rule was removed.
    fn delete(&self, key: &RuleKey) -> Result<bool, StoreError>;
}

/// Process-local backend; rules are lost on exit.
#[derive(Default)]
pub struct MemoryRuleBackend {
    rules: Mutex<BTreeMap<RuleKey, PermissionRule>>,
}

impl RuleBackend for MemoryRuleBackend {
    fn load_all(&self) -> Result<Vec<PermissionRule>, StoreError> {
        Ok(self.rules.lock().values().cloned().collect())
    }

    fn put(&self, rule: &PermissionRule) -> Result<(), StoreError> {
        self.rules.lock().insert(rule.key(), rule.clone());
        Ok(())
    }

    fn delete(&self, key: &RuleKey) -> Result<bool, StoreError> {
        Ok(self.rules.lock().remove(key).is_some())
    }
}

pub struct PermissionStore {
    rules: RwLock<HashMap<RuleKey, PermissionRule>>,
    backend: Arc<dyn RuleBackend>,
    locks: KeyedLocks<(String, Action)>,
}

impl PermissionStore {
    /// Load every persisted rule from `backend`.
    pub fn open(backend: Arc<dyn RuleBackend>) -> Result<Self, StoreError> {
        let rules: HashMap<_, _> = backend
            .load_all()?
            .into_iter()
            .map(|rule| (rule.key(), rule))
            .collect();
        debug!(rules = rules.len(), "Loaded permission rules");
        Ok(Self {
            rules: RwLock::new(rules),
            backend,
            locks: KeyedLocks::new(),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            backend: Arc::new(MemoryRuleBackend::default()),
            locks: KeyedLocks::new(),
        }
    }

    /// Most specific rule for a request: exact target first, then any-target.
    pub fn lookup(
        &self,
        calling_app: &str,
        action: Action,
        target: Option<&str>,
    ) -> Option<PermissionRule> {
        let rules = self.rules.read();
        let mut key = RuleKey {
            calling_app: calling_app.to_string(),
            action,
            scope: RuleScope::AnyTarget,
        };
        if let Some(target) = target {
            key.scope = RuleScope::ExactTarget(target.to_string());
            if let Some(rule) = rules.get(&key) {
                return Some(rule.clone());
            }
            key.scope = RuleScope::AnyTarget;
        }
        rules.get(&key).cloned()
    }

    /// Insert or replace the rule with the same key. Durable on return.
    pub async fn upsert(&self, rule: PermissionRule) -> Result<(), StoreError> {
        let _guard = self
            .locks
            .lock(&(rule.calling_app.clone(), rule.action))
            .await;
        self.backend.put(&rule)?;
        info!(
            calling_app = %rule.calling_app,
            action = %rule.action,
            scope = %rule.scope,
            decision = rule.decision.as_str(),
            "Permission rule stored"
        );
        self.rules.write().insert(rule.key(), rule);
        Ok(())
    }

    /// Remove the rule for `target` (`None` removes the any-target rule).
    pub async fn revoke(
        &self,
        calling_app: &str,
        action: Action,
        target: Option<&str>,
    ) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(&(calling_app.to_string(), action)).await;
        let key = RuleKey {
            calling_app: calling_app.to_string(),
            action,
            scope: RuleScope::for_target(target),
        };
        let removed = self.backend.delete(&key)?;
        let removed = self.rules.write().remove(&key).is_some() || removed;
        if removed {
            info!(calling_app, %action, scope = %key.scope, "Permission rule revoked");
        }
        Ok(removed)
    }

    /// Remove every rule of `calling_app`. Returns the number removed.
    pub async fn revoke_app(&self, calling_app: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for action in Action::ALL {
            let _guard = self.locks.lock(&(calling_app.to_string(), action)).await;
            let keys: Vec<RuleKey> = self
                .rules
                .read()
                .keys()
                .filter(|key| key.calling_app == calling_app && key.action == action)
                .cloned()
                .collect();
            for key in keys {
                self.backend.delete(&key)?;
                self.rules.write().remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(calling_app, removed, "Revoked all permission rules for app");
        }
        Ok(removed)
    }

    /// Rules sorted by app, action and scope; optionally for one app only.
    pub fn list(&self, calling_app: Option<&str>) -> Vec<PermissionRule> {
        let mut rules: Vec<PermissionRule> = self
            .rules
            .read()
            .values()
            .filter(|rule| calling_app.is_none_or(|app| rule.calling_app == app))
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.key().cmp(&b.key()));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(app: &str, action: Action, scope: RuleScope, decision: RuleDecision) -> PermissionRule {
        PermissionRule::new(app, action, scope, decision)
    }

    #[tokio::test]
    async fn test_exact_target_wins_over_any() {
        let store = PermissionStore::in_memory();
        store
            .upsert(rule("app", Action::SignEvent, RuleScope::AnyTarget, RuleDecision::Allow))
            .await
            .unwrap();
        store
            .upsert(rule(
                "app",
                Action::SignEvent,
                RuleScope::ExactTarget("4".into()),
                RuleDecision::Deny,
            ))
            .await
            .unwrap();

        let dm = store.lookup("app", Action::SignEvent, Some("4")).unwrap();
        assert_eq!(dm.decision, RuleDecision::Deny);
        let note = store.lookup("app", Action::SignEvent, Some("1")).unwrap();
        assert_eq!(note.decision, RuleDecision::Allow);
        assert_eq!(
            store.lookup("app", Action::SignEvent, None).unwrap().scope,
            RuleScope::AnyTarget
        );
    }

    #[tokio::test]
    async fn test_exact_rule_does_not_match_other_targets() {
        let store = PermissionStore::in_memory();
        store
            .upsert(rule(
                "app",
                Action::Nip44Encrypt,
                RuleScope::ExactTarget("aa".into()),
                RuleDecision::Allow,
            ))
            .await
            .unwrap();
        assert!(store.lookup("app", Action::Nip44Encrypt, Some("bb")).is_none());
        assert!(store.lookup("app", Action::Nip44Encrypt, None).is_none());
    }

    #[tokio::test]
    async fn test_upsert_is_last_write_wins() {
        let store = PermissionStore::in_memory();
        let key_rule = |decision| rule("app", Action::GetPublicKey, RuleScope::AnyTarget, decision);
        store.upsert(key_rule(RuleDecision::Allow)).await.unwrap();
        store.upsert(key_rule(RuleDecision::Deny)).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup("app", Action::GetPublicKey, None).unwrap().decision,
            RuleDecision::Deny
        );
    }

    #[tokio::test]
    async fn test_rules_are_isolated_per_app_and_action() {
        let store = PermissionStore::in_memory();
        store
            .upsert(rule("x", Action::SignEvent, RuleScope::AnyTarget, RuleDecision::Deny))
            .await
            .unwrap();
        assert!(store.lookup("x", Action::GetPublicKey, None).is_none());
        assert!(store.lookup("y", Action::SignEvent, Some("1")).is_none());
    }

    #[tokio::test]
    async fn test_revoke_and_list() {
        let store = PermissionStore::in_memory();
        for (app, action) in [
            ("a", Action::GetPublicKey),
            ("a", Action::SignEvent),
            ("b", Action::GetPublicKey),
        ] {
            store
                .upsert(rule(app, action, RuleScope::AnyTarget, RuleDecision::Allow))
                .await
                .unwrap();
        }
        assert_eq!(store.list(Some("a")).len(), 2);
        assert_eq!(store.list(None).len(), 3);

        assert!(store.revoke("a", Action::SignEvent, None).await.unwrap());
        assert!(!store.revoke("a", Action::SignEvent, None).await.unwrap());
        assert_eq!(store.revoke_app("a").await.unwrap(), 1);
        assert_eq!(store.list(None).len(), 1);
        assert_eq!(store.list(None)[0].calling_app, "b");
    }

    #[tokio::test]
    async fn test_reopen_from_backend() {
        let backend = Arc::new(MemoryRuleBackend::default());
        let store = PermissionStore::open(backend.clone()).unwrap();
        store
            .upsert(rule("a", Action::GetPublicKey, RuleScope::AnyTarget, RuleDecision::Allow))
            .await
            .unwrap();
        drop(store);

        let reopened = PermissionStore::open(backend).unwrap();
        assert!(reopened.lookup("a", Action::GetPublicKey, None).is_some());
    }
}
