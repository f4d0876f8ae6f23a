//! Cron Dispatcher (C8) — spec.md §4.6. Validates schedules, fires at
//! wall-clock time in a schedule's timezone, and competes for the same
//! admission gate as interactive runs.
//!
//! Grounded on `mqk-daemon::state::spawn_heartbeat`: a free function that
//! spawns one `tokio::spawn`ed loop per concern. Generalised from a fixed
//! `tokio::time::interval` heartbeat into a per-schedule loop that recomputes
//! its next fire instant (in the schedule's own timezone) after every tick,
//! since no general cron-scheduling crate exists anywhere in the retrieved
//! pack (SPEC_FULL.md §4.6).

mod schedule_time;
mod tick;
mod validate;

pub use schedule_time::next_fire_after;
pub use tick::tick;
pub use validate::{parse_daily, validate, ValidationError, TIMEZONE_ALLOWLIST};

use conveyor_admission::AdmissionController;
use conveyor_config::Config;
use conveyor_core::traits::{ExtractionApiClient, NotificationSink, ObjectStoreClient};
use conveyor_core::{CancelRegistry, Schedule};
use conveyor_store::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// The collaborators every schedule tick needs. Cheap to clone — every field
/// is an `Arc` (or, for `Store`, an internally-`Arc`-backed pool handle) so
/// each spawned schedule loop owns its own copy.
#[derive(Clone)]
pub struct CronDeps {
    pub store: Store,
    pub admission: Arc<AdmissionController>,
    pub config: Arc<Config>,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub extraction_client: Arc<dyn ExtractionApiClient>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Shared with `conveyor-daemon` so `stopRun` reaches scheduled runs
    /// too (spec.md §5 "`stopRun`... for `caseId:scheduled`").
    pub cancel_registry: CancelRegistry,
}

struct Job {
    cancel: CancellationToken,
}

/// Owns one background loop per registered schedule.
pub struct CronDispatcher {
    deps: CronDeps,
    jobs: Mutex<HashMap<String, Job>>,
}

impl CronDispatcher {
    pub fn new(deps: CronDeps) -> Self {
        Self { deps, jobs: Mutex::new(HashMap::new()) }
    }

    /// Loads every schedule from the store and starts its loop. Call once at
    /// startup after the dispatcher is constructed.
    pub async fn load_all(&self) -> Result<(), conveyor_store::StoreError> {
        for schedule in self.deps.store.list_schedules().await? {
            if let Err(e) = self.register(schedule.clone()) {
                tracing::warn!(schedule_id = %schedule.id, error = %e, "dropping invalid persisted schedule");
            }
        }
        Ok(())
    }

    /// Validates and starts a schedule's loop, replacing any prior loop
    /// registered under the same id (spec.md §4.6 "Jobs re-registered for
    /// the same id stop and replace the prior schedule").
    pub fn register(&self, schedule: Schedule) -> Result<(), ValidationError> {
        let (minute, hour) = validate(&schedule.cron, &schedule.timezone)?;
        let tz: chrono_tz::Tz = schedule
            .timezone
            .parse()
            .expect("timezone already checked against the allow-list");

        self.stop(&schedule.id);

        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let deps = self.deps.clone();
        let id = schedule.id.clone();

        tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now();
                let next = next_fire_after(now, minute, hour, tz);
                let sleep_for = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);

                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(sleep_for) => {}
                }

                tick(&deps, &schedule).await;
            }
        });

        self.jobs.lock().expect("cron job table poisoned").insert(id, Job { cancel });
        Ok(())
    }

    /// Stops and forgets a schedule's loop without touching the store.
    pub fn unregister(&self, id: &str) {
        self.stop(id);
    }

    fn stop(&self, id: &str) {
        if let Some(job) = self.jobs.lock().expect("cron job table poisoned").remove(id) {
            job.cancel.cancel();
        }
    }

    /// Stops every running loop, e.g. during graceful shutdown.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().expect("cron job table poisoned");
        for (_, job) in jobs.drain() {
            job.cancel.cancel();
        }
    }

    pub fn active_schedule_ids(&self) -> Vec<String> {
        self.jobs.lock().expect("cron job table poisoned").keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_config::{ApiConfig, BucketConfig, RunConfig, S3Config};
    use conveyor_core::traits::{
        ExtractionApiError, ExtractionResponse, NotifyError, ObjectListing, ObjectStoreError,
        RunNotification,
    };
    use conveyor_core::{AuditLevel as CoreAuditLevel, AuditOutcome, RunState, RunStateStatus};

    struct DeadObjectStore;

    #[async_trait]
    impl ObjectStoreClient for DeadObjectStore {
        async fn list(&self, _: &str, _: &str) -> Result<Vec<ObjectListing>, ObjectStoreError> {
            Ok(Vec::new())
        }
        async fn get(
            &self,
            _: &str,
            _: &str,
        ) -> Result<
            futures_util::stream::BoxStream<'static, Result<bytes::Bytes, ObjectStoreError>>,
            ObjectStoreError,
        > {
            Err(ObjectStoreError::Get("unused in these tests".into()))
        }
    }

    struct DeadExtractionClient;

    #[async_trait]
    impl ExtractionApiClient for DeadExtractionClient {
        async fn submit(
            &self,
            _: &str,
            _: &str,
        ) -> Result<ExtractionResponse, ExtractionApiError> {
            Err(ExtractionApiError("unused in these tests".into()))
        }
    }

    struct RecordingNotifier {
        calls: tokio::sync::Mutex<Vec<RunNotification>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn notify(&self, event: RunNotification) -> Result<(), NotifyError> {
            self.calls.lock().await.push(event);
            Ok(())
        }
    }

    fn schedule(id: &str) -> Schedule {
        Schedule {
            id: id.into(),
            created_at: chrono::Utc::now(),
            brands: vec!["acme".into()],
            purchasers: vec!["p1".into()],
            cron: "0 9 * * *".into(),
            timezone: "UTC".into(),
        }
    }

    async fn test_deps(staging_dir: &str) -> CronDeps {
        let store = Store::open_in_memory().await.unwrap();
        let config = Config {
            api: ApiConfig { base_url: "http://localhost".into(), timeout_ms: 1000 },
            s3: S3Config {
                buckets: vec![BucketConfig {
                    name: "acme-bucket".into(),
                    bucket: "acme-bucket".into(),
                    prefix: "raw/".into(),
                    tenant: "acme".into(),
                    purchaser: "p1".into(),
                }],
                staging_dir: staging_dir.into(),
                region: "us-east-1".into(),
                sync_limit: None,
            },
            run: RunConfig {
                concurrency: 1,
                requests_per_second: 0,
                max_retries: 1,
                retry_backoff_ms: 1,
                checkpoint_path: "memory".into(),
                skip_completed: true,
            },
        };
        CronDeps {
            store,
            admission: Arc::new(AdmissionController::new()),
            config: Arc::new(config),
            object_store: Arc::new(DeadObjectStore),
            extraction_client: Arc::new(DeadExtractionClient),
            notifier: Arc::new(RecordingNotifier { calls: tokio::sync::Mutex::new(Vec::new()) }),
            cancel_registry: conveyor_core::CancelRegistry::new(),
        }
    }

    #[test]
    fn rejects_bad_cron_at_registration() {
        // Synchronous-only: registration validates before spawning anything,
        // so this doesn't need a runtime.
        let result = validate::validate("7 9 * * *", "UTC");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn paused_resume_capable_case_id_skips_the_tick() {
        let deps = test_deps("/tmp").await;
        deps.store
            .set_run_state(
                conveyor_core::CaseId::Extract,
                &RunState { status: RunStateStatus::Stopped, run_id: "RUN1".into() },
            )
            .await
            .unwrap();

        tick::tick(&deps, &schedule("s1")).await;

        let page = deps.store.list_audit(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].outcome, AuditOutcome::Skipped);
        assert_eq!(page[0].level, CoreAuditLevel::Warn);
        assert!(page[0].message.contains("paused"));
    }

    #[tokio::test]
    async fn schedule_matching_no_buckets_is_skipped() {
        let deps = test_deps("/tmp").await;
        let mut no_match = schedule("s1");
        no_match.brands = vec!["nonexistent".into()];

        tick::tick(&deps, &no_match).await;

        let page = deps.store.list_audit(1, 10).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].outcome, AuditOutcome::Skipped);
    }

    #[tokio::test]
    async fn scope_overlap_is_audited_as_skipped_without_invoking_the_run() {
        let deps = test_deps("/tmp").await;
        deps.admission.try_admit(conveyor_admission::ActiveRun {
            run_id: "RUN1".into(),
            case_id: conveyor_core::CaseId::Extract,
            scope: conveyor_core::Scope::from_tenant("acme"),
            origin: conveyor_core::RunOrigin::Manual,
            schedule_id: None,
            started_at: chrono::Utc::now(),
        });

        tick::tick(&deps, &schedule("s1")).await;

        let page = deps.store.list_audit(1, 10).await.unwrap();
        assert_eq!(page.len(), 2); // "Scheduled job started" then the overlap skip
        assert_eq!(page[0].outcome, AuditOutcome::Skipped);
        assert!(page[0].message.contains("overlap"));
        assert_eq!(page[1].outcome, AuditOutcome::Executed);
    }

    #[tokio::test]
    async fn register_then_reregister_replaces_the_prior_job() {
        let deps = test_deps("/tmp").await;
        let dispatcher = CronDispatcher::new(deps);
        dispatcher.register(schedule("s1")).unwrap();
        assert_eq!(dispatcher.active_schedule_ids(), vec!["s1".to_string()]);

        dispatcher.register(schedule("s1")).unwrap();
        assert_eq!(dispatcher.active_schedule_ids(), vec!["s1".to_string()]);

        dispatcher.shutdown();
        assert!(dispatcher.active_schedule_ids().is_empty());
    }
}
