//! Pending-call table keyed by correlation id.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::RelayError;

/// Completion handle of a pending call.
pub type Completion = oneshot::Sender<Result<Value, RelayError>>;

/// Maps correlation ids to the completions of outstanding calls.
#[derive(Default)]
pub struct Correlator {
    pending: HashMap<String, Completion>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. The caller guarantees `id` is unique.
    pub fn register(&mut self, id: impl Into<String>, completion: Completion) {
        let id = id.into();
        if self.pending.insert(id.clone(), completion).is_some() {
            tracing::warn!(%id, "replaced pending call with duplicate id");
        }
    }

    /// Completes the call with `id`. Returns `false` if no such call exists.
    pub fn resolve(&mut self, id: &str, result: Value) -> bool {
        match self.pending.remove(id) {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error.
                let _ = tx.send(Ok(result));
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without completing it.
    pub fn remove(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Fails every outstanding call with `error` and clears the table.
    ///
    /// The table is detached before any completion fires.
    pub fn fail_all(&mut self, error: RelayError) -> usize {
        let drained = std::mem::take(&mut self.pending);
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}
