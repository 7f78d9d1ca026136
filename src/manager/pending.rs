//! Pending-decision table for in-flight review RPCs.
//!
//! Each outbound review registers a oneshot waiter keyed by request id. A
//! waiter resolves exactly once, by whichever of these removes its entry
//! first: a matching `decision` frame, the caller's deadline, or `fail_all`
//! on manager disconnect. Dropping a waiter's sender is how `fail_all`
//! signals the loss; the RPC side maps the closed channel to
//! `ManagerDisconnected`. A reply for an id that is no longer in the table
//! is dropped silently.

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::manager::frames::Decision;

#[derive(Debug, Default)]
pub struct PendingDecisions {
    waiters: DashMap<String, oneshot::Sender<Decision>>,
}

impl PendingDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`. The caller enforces its own deadline on
    /// the returned receiver and must `discard` the id when it gives up.
    pub fn register(&self, id: String) -> oneshot::Receiver<Decision> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    /// Resolve the waiter for `id`. Returns false for unknown ids (late or
    /// duplicate replies), which callers drop.
    pub fn complete(&self, id: &str, decision: Decision) -> bool {
        match self.waiters.remove(id) {
            Some((_, tx)) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    /// Forget a waiter whose caller stopped waiting (deadline expiry or a
    /// failed channel write).
    pub fn discard(&self, id: &str) {
        self.waiters.remove(id);
    }

    /// Fail every in-flight waiter. Invoked only by channel teardown; each
    /// dropped sender resolves its RPC with a disconnect error.
    pub fn fail_all(&self) -> usize {
        let failed = self.waiters.len();
        self.waiters.clear();
        failed
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
