//! Per-tick logic for one schedule firing (spec.md §4.6 steps 1–5), kept
//! separate from the sleep loop in `lib.rs` so it can be driven directly in
//! tests without waiting on wall-clock time.

use crate::CronDeps;
use conveyor_config::Config;
use conveyor_core::traits::RunNotification;
use conveyor_core::{
    AuditLevel, AuditOutcome, CaseId, Pair, RunOrigin, RunParams, RunStateStatus, Schedule,
    ScheduleAuditEntry,
};
use conveyor_coordinator::{CoordinatorDeps, RunOutcome};
use conveyor_admission::DenialReason;
use conveyor_core::run_key;
use serde_json::json;

/// `(brands, purchasers)` -> pair list, using `config.s3.buckets` as the
/// `brand -> purchasers[]` map (spec.md §4.6 step 1). Each schedule brand
/// expands to every purchaser configured for it; an explicit `purchasers`
/// list narrows that set rather than replacing it, so a schedule can't
/// accidentally address a `(brand, purchaser)` pair no bucket covers.
pub(crate) fn expand_pairs(schedule: &Schedule, config: &Config) -> Vec<Pair> {
    let mut pairs = Vec::new();
    for brand in &schedule.brands {
        let configured: Vec<&String> = config
            .s3
            .buckets
            .iter()
            .filter(|b| &b.tenant == brand)
            .map(|b| &b.purchaser)
            .collect();

        let selected: Vec<String> = if schedule.purchasers.is_empty() {
            configured.into_iter().cloned().collect()
        } else {
            schedule
                .purchasers
                .iter()
                .filter(|p| configured.contains(p))
                .cloned()
                .collect()
        };

        for purchaser in selected {
            pairs.push(Pair { tenant: brand.clone(), purchaser });
        }
    }
    pairs.sort();
    pairs.dedup();
    pairs
}

async fn audit(
    deps: &CronDeps,
    schedule_id: &str,
    outcome: AuditOutcome,
    level: AuditLevel,
    message: impl Into<String>,
    data: Option<serde_json::Value>,
) {
    deps.store
        .append_audit(&ScheduleAuditEntry {
            timestamp: chrono::Utc::now(),
            schedule_id: Some(schedule_id.to_string()),
            outcome,
            level,
            message: message.into(),
            data,
        })
        .await;
}

/// Runs one firing of `schedule` to completion: pair expansion, the paused
/// check, admission via the Run Coordinator, and the resulting audit trail
/// (spec.md §4.6 steps 1–5).
pub async fn tick(deps: &CronDeps, schedule: &Schedule) {
    let pairs = expand_pairs(schedule, &deps.config);
    if pairs.is_empty() {
        audit(
            deps,
            &schedule.id,
            AuditOutcome::Skipped,
            AuditLevel::Warn,
            "schedule matches no configured buckets",
            None,
        )
        .await;
        return;
    }

    // Step 3. Checked for every resume-capable caseId, not just PIPE: a
    // scheduled PIPE run must not race a paused EXTRACT resume either.
    for case_id in [CaseId::Sync, CaseId::Extract, CaseId::Pipe] {
        if !case_id.is_resume_capable() {
            continue;
        }
        if let Ok(Some(state)) = deps.store.get_run_state(case_id).await {
            if state.status == RunStateStatus::Stopped {
                audit(
                    deps,
                    &schedule.id,
                    AuditOutcome::Skipped,
                    AuditLevel::Warn,
                    format!("skipped: {case_id} is paused awaiting resume"),
                    None,
                )
                .await;
                return;
            }
        }
    }

    // Step 2's overlap check and step 4's registration are one atomic
    // `try_admit` call inside the coordinator, so there is no separate
    // pre-check here — a denial from `run` below *is* step 2's "on overlap,
    // stop", just folded into a single call instead of a peek-then-admit
    // pair (see DESIGN.md).
    audit(
        deps,
        &schedule.id,
        AuditOutcome::Executed,
        AuditLevel::Info,
        "Scheduled job started",
        None,
    )
    .await;

    let params = RunParams { pairs: Some(pairs), ..Default::default() };
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let coordinator_deps = CoordinatorDeps {
        store: &deps.store,
        admission: &deps.admission,
        config: &deps.config,
        object_store: deps.object_store.as_ref(),
        extraction_client: deps.extraction_client.as_ref(),
    };

    let registry_key = run_key(CaseId::Pipe, RunOrigin::Scheduled);
    let cancel = deps.cancel_registry.register(&registry_key);

    let outcome = conveyor_coordinator::run(
        &coordinator_deps,
        CaseId::Pipe,
        params,
        RunOrigin::Scheduled,
        Some(schedule.id.clone()),
        tx,
        cancel,
    )
    .await;
    deps.cancel_registry.remove(&registry_key);

    match outcome {
        RunOutcome::Completed { run_id } | RunOutcome::Stopped { run_id } => {
            audit(
                deps,
                &schedule.id,
                AuditOutcome::Executed,
                AuditLevel::Info,
                "finished",
                Some(json!({ "runId": run_id, "exitCode": 0 })),
            )
            .await;
        }
        RunOutcome::Denied { conflict, reason } => {
            let message = match reason {
                DenialReason::CaseAlreadyRunning => format!(
                    "overlap with {} run {} already running as {}",
                    conflict.origin.as_str(),
                    conflict.run_id,
                    conflict.case_id
                ),
                DenialReason::ScopeOverlap => format!(
                    "overlap with {} run {} (caseId={})",
                    conflict.origin.as_str(),
                    conflict.run_id,
                    conflict.case_id
                ),
            };
            audit(
                deps,
                &schedule.id,
                AuditOutcome::Skipped,
                AuditLevel::Warn,
                message,
                serde_json::to_value(&conflict).ok(),
            )
            .await;
        }
        RunOutcome::Error { run_id, message } => {
            audit(
                deps,
                &schedule.id,
                AuditOutcome::Executed,
                AuditLevel::Error,
                "failed",
                Some(json!({ "runId": run_id, "error": message })),
            )
            .await;
            let _ = deps
                .notifier
                .notify(RunNotification {
                    run_id: run_id.unwrap_or_default(),
                    level: AuditLevel::Error,
                    message,
                })
                .await;
        }
    }
}
