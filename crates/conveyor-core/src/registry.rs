//! Shared cancellation-handle registry (spec.md §5 "Each run carries a
//! cancellation handle... `stopRun` from the API signals the handle for
//! `caseId` (or `caseId:scheduled` for cron-originated runs)").
//!
//! Both `conveyor-daemon` (HTTP-invoked runs) and `conveyor-cron`
//! (schedule-invoked runs) register a run's token here under the same key
//! scheme, so a `stopRun` call reaches either kind of run.

use crate::{CaseId, RunOrigin};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// `caseId`, or `caseId:scheduled` for a cron-originated run.
pub fn run_key(case_id: CaseId, origin: RunOrigin) -> String {
    match origin {
        RunOrigin::Manual => case_id.as_str().to_string(),
        RunOrigin::Scheduled => format!("{}:scheduled", case_id.as_str()),
    }
}

#[derive(Clone, Default)]
pub struct CancelRegistry(Arc<Mutex<HashMap<String, CancellationToken>>>);

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh token for `key`, replacing any stale entry left
    /// behind by a run that didn't clean up after itself.
    pub fn register(&self, key: impl Into<String>) -> CancellationToken {
        let token = CancellationToken::new();
        self.0
            .lock()
            .expect("cancel registry mutex poisoned")
            .insert(key.into(), token.clone());
        token
    }

    /// Signals the token for `key`. Returns `false` if no run is registered
    /// under it (`stopRun`'s `404`, spec.md §6).
    pub fn cancel(&self, key: &str) -> bool {
        match self.0.lock().expect("cancel registry mutex poisoned").get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the entry once a run reaches a terminal state, so a later run
    /// under the same key doesn't inherit an already-cancelled token.
    pub fn remove(&self, key: &str) {
        self.0.lock().expect("cancel registry mutex poisoned").remove(key);
    }
}
