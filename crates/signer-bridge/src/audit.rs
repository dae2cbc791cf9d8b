//! Audit log.
//!
//! Every terminal outcome of a request produces one [`AuditEntry`]. Entries
//! go to one or more [`AuditSink`]s; a failing sink never fails the request,
//! the entry is written to the tracing fallback instead.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::error::BridgeError;
use crate::request::{Action, RequestKey, SigningRequest};

/// Tracing target for audit records
pub const AUDIT_TARGET: &str = "signer_bridge::audit";

/// Calling app recorded when a request was rejected before it was parsed.
pub const UNKNOWN_APP: &str = "unknown";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDecision {
    Allowed,
    AutoAllowed,
    Denied,
    Error,
}

impl AuditDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Allowed => "ALLOWED",
            AuditDecision::AutoAllowed => "AUTO_ALLOWED",
            AuditDecision::Denied => "DENIED",
            AuditDecision::Error => "ERROR",
        }
    }
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub request_key: Option<RequestKey>,
    pub calling_app: String,
    pub action: Option<Action>,
    pub decision: AuditDecision,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn new(decision: AuditDecision, calling_app: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            request_key: None,
            calling_app: calling_app.into(),
            action: None,
            decision,
            timestamp: chrono::Utc::now().timestamp_millis(),
            detail: None,
        }
    }

    /// Entry for a request that passed validation.
    pub fn for_request(decision: AuditDecision, request: &SigningRequest) -> Self {
        let mut entry = Self::new(decision, request.calling_app.clone());
        entry.request_key = Some(request.key());
        entry.action = Some(request.action);
        entry
    }

    /// Entry for an outcome that is an error.
    pub fn for_error(request: Option<&SigningRequest>, error: &BridgeError) -> Self {
        let decision = match error.class() {
            crate::error::ErrorClass::Denied => AuditDecision::Denied,
            _ => AuditDecision::Error,
        };
        let entry = match request {
            Some(request) => Self::for_request(decision, request),
            None => Self::new(decision, UNKNOWN_APP),
        };
        entry.with_detail(format!("{}: {error}", error.code()))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError>;

    /// Whether entries written here already reach the tracing channel.
    fn is_tracing(&self) -> bool {
        false
    }
}

/// Keeps entries in memory. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries recorded for one request.
    pub fn for_key(&self, key: &RequestKey) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.request_key.as_ref() == Some(key))
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Writes entries as `tracing` events on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            target: AUDIT_TARGET,
            entry_id = %entry.entry_id,
            calling_app = %entry.calling_app,
            request_id = entry.request_key.as_ref().map(|key| key.id.as_str()),
            action = entry.action.map(|action| action.as_str()),
            decision = entry.decision.as_str(),
            detail = entry.detail.as_deref(),
            "audit entry"
        );
        Ok(())
    }

    fn is_tracing(&self) -> bool {
        true
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Read the last `limit` entries of a JSONL audit file. Unparsable lines are
/// skipped.
pub fn read_tail(path: impl AsRef<Path>, limit: usize) -> Result<Vec<AuditEntry>, AuditError> {
    let file = File::open(path)?;
    let mut entries = std::collections::VecDeque::with_capacity(limit);
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) else {
            continue;
        };
        if entries.len() == limit {
            entries.pop_front();
        }
        if limit > 0 {
            entries.push_back(entry);
        }
    }
    Ok(entries.into())
}

/// Fan-out to every configured sink, with tracing as the fallback channel.
#[derive(Clone)]
pub struct AuditLog {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn tracing_only() -> Self {
        Self::new(vec![Arc::new(TracingAuditSink)])
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Whether a failed sink write is mirrored to tracing. Not needed when a
    /// tracing sink already received the entry.
    pub fn needs_fallback(&self) -> bool {
        !self.sinks.iter().any(|sink| sink.is_tracing())
    }

    /// Record `entry`. Never fails.
    pub fn append(&self, entry: AuditEntry) {
        let mut failed = false;
        for sink in &self.sinks {
            if let Err(err) = sink.append(&entry) {
                tracing::warn!(
                    target: AUDIT_TARGET,
                    error = %err,
                    "Audit sink failed"
                );
                failed = true;
            }
        }
        if failed && self.needs_fallback() {
            let _ = TracingAuditSink.append(&entry);
        }
    }
}
