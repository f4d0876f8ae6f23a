//! Admission Controller (C7) — spec.md §4.5. The single choke-point every
//! run and schedule tick must pass through before any state is mutated.
//!
//! Grounded on `mqk-execution::gateway::BrokerGateway`'s verdict/refusal
//! pattern — there, three sequential gate checks guard every broker call;
//! here, the two admission rules (caseId already running, scope overlap)
//! guard every run start. `AdmissionDecision` plays the role of
//! `Result<_, GateRefusal>` but as an explicit enum so the conflicting run
//! rides along with the denial.

use chrono::{DateTime, Utc};
use conveyor_core::{CaseId, RunOrigin, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// One run currently holding admission for its `caseId`.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: String,
    pub case_id: CaseId,
    pub scope: Scope,
    pub origin: RunOrigin,
    pub schedule_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Read-only snapshot of a conflicting run, reported back in a denial
/// (spec.md §6's `409` body and Scenario S2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRunRef {
    pub run_id: String,
    pub case_id: CaseId,
    pub origin: RunOrigin,
    pub schedule_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl From<&ActiveRun> for ActiveRunRef {
    fn from(run: &ActiveRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            case_id: run.case_id,
            origin: run.origin,
            schedule_id: run.schedule_id.clone(),
            started_at: run.started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DenialReason {
    /// Rule 1 — the exact `caseId` already has an admitted run.
    CaseAlreadyRunning,
    /// Rule 2 — the requested scope overlaps an admitted run's scope.
    ScopeOverlap,
}

/// Proof of a successful admission. Release it once the run reaches a
/// terminal state so the `caseId` frees up for the next request.
#[derive(Debug)]
pub struct AdmissionToken {
    case_id: CaseId,
}

impl AdmissionToken {
    pub fn case_id(&self) -> CaseId {
        self.case_id
    }
}

#[derive(Debug)]
pub enum AdmissionDecision {
    Admitted(AdmissionToken),
    Denied {
        conflict: ActiveRunRef,
        reason: DenialReason,
    },
}

/// In-memory admission table, keyed by `caseId` (spec.md §4.5). A plain
/// `std::sync::Mutex` rather than the teacher's `tokio::sync::RwLock`:
/// admission is write-heavy relative to reads (every run start and every
/// cron tick takes the lock to mutate), unlike the teacher's `AppState`
/// which is read far more than written.
#[derive(Default)]
pub struct AdmissionController {
    active: Mutex<HashMap<CaseId, ActiveRun>>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates both admission rules against every currently active run
    /// and registers `run` only on success (spec.md §4.5: "Admission
    /// decisions are made before any state is mutated; a run is registered
    /// only on admission success").
    pub fn try_admit(&self, run: ActiveRun) -> AdmissionDecision {
        let mut active = self.active.lock().expect("admission mutex poisoned");

        if let Some(existing) = active.get(&run.case_id) {
            return AdmissionDecision::Denied {
                conflict: existing.into(),
                reason: DenialReason::CaseAlreadyRunning,
            };
        }

        if let Some(conflict) = active.values().find(|other| other.scope.overlaps(&run.scope)) {
            return AdmissionDecision::Denied {
                conflict: conflict.into(),
                reason: DenialReason::ScopeOverlap,
            };
        }

        let case_id = run.case_id;
        active.insert(case_id, run);
        AdmissionDecision::Admitted(AdmissionToken { case_id })
    }

    /// Patches in the real run id once step 3 of the Run Coordinator's
    /// lifecycle (spec.md §4.3) has resolved it. Admission happens before
    /// the run id is known — the two admission rules never depend on its
    /// value — so `try_admit` is called with a placeholder and this backfills
    /// it once allocated.
    pub fn set_run_id(&self, case_id: CaseId, run_id: &str) {
        if let Some(active) = self
            .active
            .lock()
            .expect("admission mutex poisoned")
            .get_mut(&case_id)
        {
            active.run_id = run_id.to_string();
        }
    }

    /// Frees the `caseId` the token was issued for.
    pub fn release(&self, token: AdmissionToken) {
        self.active
            .lock()
            .expect("admission mutex poisoned")
            .remove(&token.case_id);
    }

    pub fn active_run(&self, case_id: CaseId) -> Option<ActiveRun> {
        self.active
            .lock()
            .expect("admission mutex poisoned")
            .get(&case_id)
            .cloned()
    }

    /// Every run currently holding admission, for `GET /api/active-runs`.
    pub fn active_runs(&self) -> Vec<ActiveRunRef> {
        self.active
            .lock()
            .expect("admission mutex poisoned")
            .values()
            .map(ActiveRunRef::from)
            .collect()
    }
}
