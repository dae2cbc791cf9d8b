//! Concurrency coordination.
//!
//! - [`KeyedLocks`]: fine-grained async mutexes, one per key, so requests for
//!   different `(callingApp, action)` pairs never wait on each other.
//! - [`RequestCoordinator`]: coalesces concurrent submissions of the same
//!   `(callingApp, id)` onto a single execution and replays its outcome to
//!   late duplicates for a short window.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::request::RequestKey;
use crate::signer::SigningResult;

/// Terminal outcome of a request, shared with every coalesced caller.
pub type Outcome = Result<SigningResult>;

/// One async mutex per key, created on first use.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquire the lock for `key`. Waits only on holders of the same key.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Observable progress of an in-flight request.
#[derive(Debug, Clone)]
pub enum RequestState {
    Received,
    AwaitingUser,
    Done(Outcome),
}

impl RequestState {
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            RequestState::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Result of [`RequestCoordinator::claim`].
pub enum Claim {
    /// The request finished recently; replay its outcome.
    Completed(Outcome),
    /// Another caller is executing it; follow its progress.
    Joined(watch::Receiver<RequestState>),
    /// This caller executes it and must call [`InFlight::finish`].
    Leader(InFlight),
}

struct CompletedEntry {
    finished_at: Instant,
    outcome: Outcome,
}

#[derive(Default)]
struct Inner {
    in_flight: HashMap<RequestKey, watch::Sender<RequestState>>,
    completed: HashMap<RequestKey, CompletedEntry>,
    completion_order: VecDeque<RequestKey>,
}

impl Inner {
    fn purge_expired(&mut self, ttl: Duration, now: Instant) {
        while let Some(key) = self.completion_order.front() {
            let expired = self
                .completed
                .get(key)
                .is_none_or(|entry| now.duration_since(entry.finished_at) >= ttl);
            if !expired {
                break;
            }
            if let Some(key) = self.completion_order.pop_front() {
                self.completed.remove(&key);
            }
        }
    }
}

/// De-duplicates requests by [`RequestKey`].
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    capacity: usize,
}

impl RequestCoordinator {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            ttl,
            capacity,
        }
    }

    /// Register interest in `key`.
    ///
    /// Checking the completed cache, joining an in-flight execution and
    /// becoming the leader happen under one lock, so exactly one caller leads.
    pub fn claim(&self, key: &RequestKey) -> Claim {
        let mut inner = self.inner.lock();
        if let Some(existing) = self.existing(&mut inner, key) {
            return existing;
        }

        let (tx, _rx) = watch::channel(RequestState::Received);
        inner.in_flight.insert(key.clone(), tx.clone());
        Claim::Leader(InFlight {
            key: key.clone(),
            tx,
            coordinator: self.clone(),
            finished: false,
        })
    }

    /// Like [`claim`](Self::claim), but never takes the lead: `None` when
    /// nothing is known about `key`.
    pub fn observe(&self, key: &RequestKey) -> Option<Claim> {
        let mut inner = self.inner.lock();
        self.existing(&mut inner, key)
    }

    fn existing(&self, inner: &mut Inner, key: &RequestKey) -> Option<Claim> {
        inner.purge_expired(self.ttl, Instant::now());
        if let Some(entry) = inner.completed.get(key) {
            debug!(request = %key, "Replaying completed request");
            return Some(Claim::Completed(entry.outcome.clone()));
        }
        if let Some(tx) = inner.in_flight.get(key) {
            debug!(request = %key, "Joining in-flight request");
            return Some(Claim::Joined(tx.subscribe()));
        }
        None
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    pub fn completed(&self) -> usize {
        self.inner.lock().completed.len()
    }

    fn complete(&self, key: &RequestKey, outcome: Outcome) -> Option<watch::Sender<RequestState>> {
        let mut inner = self.inner.lock();
        let tx = inner.in_flight.remove(key);
        // Not a decision: a later interactive submission must still prompt.
        let replayable = !matches!(outcome, Err(BridgeError::ApprovalRequired));
        if replayable && self.capacity > 0 && !self.ttl.is_zero() {
            let now = Instant::now();
            inner.purge_expired(self.ttl, now);
            while inner.completed.len() >= self.capacity {
                match inner.completion_order.pop_front() {
                    Some(oldest) => {
                        inner.completed.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.completed.insert(
                key.clone(),
                CompletedEntry {
                    finished_at: now,
                    outcome,
                },
            );
            inner.completion_order.push_back(key.clone());
        }
        tx
    }
}

/// Leadership of one in-flight request.
pub struct InFlight {
    key: RequestKey,
    tx: watch::Sender<RequestState>,
    coordinator: RequestCoordinator,
    finished: bool,
}

impl InFlight {
    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestState> {
        self.tx.subscribe()
    }

    pub fn set_awaiting_user(&self) {
        self.tx.send_replace(RequestState::AwaitingUser);
    }

    /// Publish the terminal outcome to every joined caller and cache it.
    pub fn finish(mut self, outcome: Outcome) {
        self.finished = true;
        self.publish(outcome);
    }

    fn publish(&self, outcome: Outcome) {
        self.coordinator.complete(&self.key, outcome.clone());
        self.tx.send_replace(RequestState::Done(outcome));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            // Leader went away without an outcome (panic); release joiners.
            self.coordinator.inner.lock().in_flight.remove(&self.key);
            self.tx.send_replace(RequestState::Done(Err(BridgeError::InternalError(
                "request execution was abandoned".into(),
            ))));
        }
    }
}

/// Wait until `rx` reports a terminal outcome.
pub async fn wait_for_outcome(mut rx: watch::Receiver<RequestState>) -> Outcome {
    match rx.wait_for(|state| state.outcome().is_some()).await {
        Ok(state) => state
            .outcome()
            .cloned()
            .unwrap_or_else(|| Err(BridgeError::InternalError("missing outcome".into()))),
        Err(_) => Err(BridgeError::InternalError(
            "request execution was abandoned".into(),
        )),
    }
}
