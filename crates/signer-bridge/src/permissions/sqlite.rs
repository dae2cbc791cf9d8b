//! SQLite rule backend.

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

use super::{PermissionRule, RuleBackend, RuleDecision, RuleKey, RuleScope, StoreError};
use crate::request::Action;

const SCOPE_EXACT: &str = "exact";
const SCOPE_ANY: &str = "any";

/// Rules persisted in a SQLite database.
pub struct SqliteRuleBackend {
    conn: Mutex<Connection>,
}

impl SqliteRuleBackend {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.migrate()?;
        Ok(backend)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let backend = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.migrate()?;
        Ok(backend)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            )",
            [],
        )?;
        run_migration(&conn, "001_permission_rules", MIGRATION_001)?;
        Ok(())
    }
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<(), StoreError> {
    let applied: Option<i64> = conn
        .query_row("SELECT 1 FROM migrations WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?;
    if applied.is_some() {
        return Ok(());
    }

    conn.execute_batch(sql)?;
    conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    tracing::info!("Applied migration: {}", name);
    Ok(())
}

fn scope_columns(scope: &RuleScope) -> (&'static str, &str) {
    match scope {
        RuleScope::ExactTarget(target) => (SCOPE_EXACT, target.as_str()),
        RuleScope::AnyTarget => (SCOPE_ANY, ""),
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Result<PermissionRule, StoreError>> {
    let calling_app: String = row.get(0)?;
    let action: String = row.get(1)?;
    let scope_kind: String = row.get(2)?;
    let target: String = row.get(3)?;
    let decision: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    let remembered: bool = row.get(6)?;

    let parsed = (|| {
        let action = Action::parse(&action)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown action {action}")))?;
        let scope = match scope_kind.as_str() {
            SCOPE_EXACT => RuleScope::ExactTarget(target),
            SCOPE_ANY => RuleScope::AnyTarget,
            other => return Err(StoreError::Corrupt(format!("unknown scope {other}"))),
        };
        let decision = match decision.as_str() {
            "ALLOW" => RuleDecision::Allow,
            "DENY" => RuleDecision::Deny,
            other => return Err(StoreError::Corrupt(format!("unknown decision {other}"))),
        };
        Ok(PermissionRule {
            calling_app,
            action,
            scope,
            decision,
            created_at,
            remembered,
        })
    })();
    Ok(parsed)
}

impl RuleBackend for SqliteRuleBackend {
    fn load_all(&self) -> Result<Vec<PermissionRule>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT calling_app, action, scope, target, decision, created_at, remembered
             FROM permission_rules ORDER BY calling_app, action, scope, target",
        )?;
        let rows = stmt.query_map([], rule_from_row)?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row??);
        }
        Ok(rules)
    }

    fn put(&self, rule: &PermissionRule) -> Result<(), StoreError> {
        let (scope, target) = scope_columns(&rule.scope);
        self.conn.lock().execute(
            "INSERT INTO permission_rules
                (calling_app, action, scope, target, decision, created_at, remembered)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(calling_app, action, scope, target) DO UPDATE SET
                decision = excluded.decision,
                created_at = excluded.created_at,
                remembered = excluded.remembered",
            params![
                rule.calling_app,
                rule.action.as_str(),
                scope,
                target,
                rule.decision.as_str(),
                rule.created_at,
                rule.remembered,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, key: &RuleKey) -> Result<bool, StoreError> {
        let (scope, target) = scope_columns(&key.scope);
        let removed = self.conn.lock().execute(
            "DELETE FROM permission_rules
             WHERE calling_app = ?1 AND action = ?2 AND scope = ?3 AND target = ?4",
            params![key.calling_app, key.action.as_str(), scope, target],
        )?;
        Ok(removed > 0)
    }
}

/// Initial schema migration
const MIGRATION_001: &str = r#"
CREATE TABLE IF NOT EXISTS permission_rules (
    calling_app TEXT NOT NULL,
    action TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('exact', 'any')),
    target TEXT NOT NULL DEFAULT '',
    decision TEXT NOT NULL CHECK(decision IN ('ALLOW', 'DENY')),
    created_at INTEGER NOT NULL,
    remembered INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (calling_app, action, scope, target)
);

CREATE INDEX IF NOT EXISTS idx_permission_rules_app ON permission_rules(calling_app);
"#;
