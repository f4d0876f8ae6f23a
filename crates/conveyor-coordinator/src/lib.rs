//! Run Coordinator (C6) — spec.md §4.3. Owns one run's lifecycle end to
//! end: admission, run-id/skip-id resolution, the SYNC → EXTRACT phases,
//! finalisation, and admission release.

mod events;
mod summary;

pub use events::{LogLevel, Phase, RunEvent};

use conveyor_admission::{ActiveRun, ActiveRunRef, AdmissionController, AdmissionDecision, DenialReason};
use conveyor_config::Config;
use conveyor_core::traits::{ExtractionApiClient, ObjectStoreClient};
use conveyor_core::{
    derive_skip_id, entropy_byte, CaseId, FileRegistryEntry, RunOrigin, RunParams, RunState,
    RunStateStatus, Scope,
};
use conveyor_extract::ExtractEvents as _;
use conveyor_store::{FileFilter, RegisterFileInput, Store};
use events::{ExtractEventForwarder, SyncEventForwarder};
use std::collections::HashSet;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// The collaborators a run needs, bundled so `run` doesn't take six
/// separate reference parameters.
pub struct CoordinatorDeps<'a> {
    pub store: &'a Store,
    pub admission: &'a AdmissionController,
    pub config: &'a Config,
    pub object_store: &'a dyn ObjectStoreClient,
    pub extraction_client: &'a dyn ExtractionApiClient,
}

#[derive(Debug)]
pub enum RunOutcome {
    Denied {
        conflict: ActiveRunRef,
        reason: DenialReason,
    },
    Completed {
        run_id: String,
    },
    Stopped {
        run_id: String,
    },
    Error {
        run_id: Option<String>,
        message: String,
    },
}

/// Runs `caseId` end to end (spec.md §4.3 lifecycle steps 1–7), emitting
/// `RunEvent`s onto `events` as it goes. Always frees the admission slot
/// before returning, regardless of outcome.
pub async fn run(
    deps: &CoordinatorDeps<'_>,
    case_id: CaseId,
    params: RunParams,
    origin: RunOrigin,
    schedule_id: Option<String>,
    events: UnboundedSender<RunEvent>,
    cancel: CancellationToken,
) -> RunOutcome {
    let scope = scope_from_params(&params);
    let candidate = ActiveRun {
        run_id: String::new(),
        case_id,
        scope,
        origin,
        schedule_id,
        started_at: chrono::Utc::now(),
    };

    let token = match deps.admission.try_admit(candidate) {
        AdmissionDecision::Denied { conflict, reason } => {
            return RunOutcome::Denied { conflict, reason }
        }
        AdmissionDecision::Admitted(token) => token,
    };

    let outcome = run_admitted(deps, case_id, &params, &events, &cancel).await;
    deps.admission.release(token);
    outcome
}

fn scope_from_params(params: &RunParams) -> Scope {
    if let Some(pairs) = &params.pairs {
        if !pairs.is_empty() {
            return Scope::from_pairs(pairs.clone());
        }
    }
    match (&params.tenant, &params.purchaser) {
        (Some(tenant), Some(purchaser)) => Scope::from_tenant_purchaser(tenant, purchaser),
        (Some(tenant), None) => Scope::from_tenant(tenant),
        _ => Scope::new(),
    }
}

async fn run_admitted(
    deps: &CoordinatorDeps<'_>,
    case_id: CaseId,
    params: &RunParams,
    events: &UnboundedSender<RunEvent>,
    cancel: &CancellationToken,
) -> RunOutcome {
    // Step 3 (partial): a stopped resume-capable run always reuses its
    // prior run id, never a skip id — it already consumed a sequence
    // number the first time around.
    let resumed_run_id = if case_id.is_resume_capable() {
        match deps.store.get_run_state(case_id).await {
            Ok(Some(state)) if state.status == RunStateStatus::Stopped => Some(state.run_id),
            Ok(_) => None,
            Err(e) => return RunOutcome::Error { run_id: None, message: e.to_string() },
        }
    } else {
        None
    };

    // Step 4 — SYNC phase. Runs before run-id resolution: FileRegistry
    // writes are not keyed by run id, so nothing here depends on it.
    let (sync_synced, sync_skipped) = if case_id.runs_sync() {
        match run_sync_phase(deps, params, events, cancel).await {
            Ok(counts) => counts,
            Err(e) => return RunOutcome::Error { run_id: None, message: e.to_string() },
        }
    } else {
        (0, 0)
    };

    // Step 5 (candidate resolution only; C5 invocation happens after run-id
    // resolution below, since extraction records are keyed by run id).
    let candidates = if case_id.runs_extract() {
        match resolve_candidates(deps.store, params).await {
            Ok(files) => files,
            Err(e) => return RunOutcome::Error { run_id: None, message: e.to_string() },
        }
    } else {
        Vec::new()
    };

    // Step 3 (remainder) — resolve the concrete run id. A fresh run that
    // would touch no persisted state at all (nothing synced or skipped,
    // nothing to extract) gets a skip id instead of a sequenced one
    // (spec.md §4.3 "Issued when a run is allocated but performs no
    // persisted work, so as not to steal a sequenced id").
    let run_id = match &resumed_run_id {
        Some(id) => id.clone(),
        None => {
            let no_persisted_work = (!case_id.runs_sync() || (sync_synced == 0 && sync_skipped == 0))
                && (!case_id.runs_extract() || candidates.is_empty());
            if no_persisted_work {
                derive_skip_id(chrono::Utc::now(), entropy_byte())
            } else {
                match deps.store.start_new_run("RUN").await {
                    Ok(id) => id,
                    Err(e) => return RunOutcome::Error { run_id: None, message: e.to_string() },
                }
            }
        }
    };
    deps.admission.set_run_id(case_id, &run_id);
    let _ = events.send(RunEvent::RunId { run_id: run_id.clone() });

    if run_id.starts_with("SKIP-") {
        let _ = events.send(RunEvent::Report {
            run_id: run_id.clone(),
            summary: Default::default(),
        });
        return RunOutcome::Completed { run_id };
    }

    // Step 5 — EXTRACT phase.
    if case_id.runs_extract() && !candidates.is_empty() {
        let options = conveyor_extract::ExtractOptions::from_run_config(&deps.config.run);
        let forwarder = ExtractEventForwarder { sender: events };

        // A resumed run already carried some files to a terminal status
        // before it was killed; surface that count once before the pool
        // starts on the remainder (spec.md Scenario S4 "resume_skip extract
        // 4/10").
        if resumed_run_id.is_some() {
            match deps.store.get_processed_paths(&run_id).await {
                Ok(processed) => {
                    let skipped = processed.len() as i64;
                    let total = skipped + candidates.len() as i64;
                    forwarder.on_resume_skip(skipped, total);
                }
                Err(e) => return RunOutcome::Error { run_id: Some(run_id), message: e.to_string() },
            }
        }

        match conveyor_extract::run(
            &candidates,
            &run_id,
            deps.extraction_client,
            deps.store,
            &options,
            &forwarder,
            cancel,
        )
        .await
        {
            Ok(_summary) => {}
            Err(e) => return finalise_extract_error(deps, case_id, &run_id, events, e).await,
        }
    }

    // Step 6 — finalise.
    if cancel.is_cancelled() {
        if case_id.is_resume_capable() {
            let _ = deps
                .store
                .set_run_state(
                    case_id,
                    &RunState { status: RunStateStatus::Stopped, run_id: run_id.clone() },
                )
                .await;
        }
        let _ = events.send(RunEvent::Log {
            message: "run cancelled".into(),
            level: LogLevel::Warn,
        });
        return RunOutcome::Stopped { run_id };
    }

    finalise_success(deps, case_id, &run_id, events).await
}

async fn run_sync_phase(
    deps: &CoordinatorDeps<'_>,
    params: &RunParams,
    events: &UnboundedSender<RunEvent>,
    cancel: &CancellationToken,
) -> Result<(i64, i64), conveyor_store::StoreError> {
    let pairs = params.pairs.clone().unwrap_or_default();
    let buckets = deps
        .config
        .buckets_for(params.tenant.as_deref(), params.purchaser.as_deref(), &pairs);

    let configured_limit = params.sync_limit.or(deps.config.s3.sync_limit).filter(|n| *n > 0);
    let limit_remaining = configured_limit.map(|n| Arc::new(AtomicI64::new(n)));
    let initial_limit = configured_limit.unwrap_or(0);

    let mut synced_total = 0i64;
    let mut skipped_total = 0i64;

    for bucket in buckets {
        if cancel.is_cancelled() {
            break;
        }
        let options = conveyor_sync::SyncOptions {
            limit_remaining: limit_remaining.clone(),
            initial_limit,
            already_extracted_paths: Arc::new(HashSet::new()),
        };
        let forwarder = SyncEventForwarder { sender: events };
        match conveyor_sync::sync_bucket(
            deps.object_store,
            deps.store,
            bucket,
            &deps.config.s3.staging_dir,
            &options,
            &forwarder,
        )
        .await
        {
            Ok(result) => {
                synced_total += result.synced;
                skipped_total += result.skipped;
                register_synced_files(deps.store, &result.files).await?;
            }
            Err(e) => {
                let _ = events.send(RunEvent::Log {
                    message: format!(
                        "sync failed for {}/{}: {e}",
                        bucket.tenant, bucket.purchaser
                    ),
                    level: LogLevel::Error,
                });
            }
        }
    }

    Ok((synced_total, skipped_total))
}

async fn register_synced_files(
    store: &Store,
    files: &[conveyor_sync::SyncedFile],
) -> Result<(), conveyor_store::StoreError> {
    if files.is_empty() {
        return Ok(());
    }
    let inputs: Vec<RegisterFileInput> = files
        .iter()
        .map(|f| RegisterFileInput {
            relative_path: f.relative_path.clone(),
            full_path: f.full_path.clone(),
            brand: f.brand.clone(),
            purchaser: f.purchaser.clone(),
            size: f.size,
            etag: f.etag.clone(),
            sha256: f.sha256.clone(),
            synced_at: f.synced_at,
        })
        .collect();
    store.register_files(&inputs).await
}

/// Candidate set for the EXTRACT phase: `GetUnextractedFiles(filter)`
/// already includes files just synced, since the SYNC phase registers them
/// before this runs (spec.md §4.3 step 5's "files just synced ∪
/// GetUnextractedFiles(filter)" is therefore a single query, not a union of
/// two separate result sets).
async fn resolve_candidates(
    store: &Store,
    params: &RunParams,
) -> Result<Vec<FileRegistryEntry>, conveyor_store::StoreError> {
    let filter = FileFilter {
        brand: params.tenant.clone(),
        purchaser: params.purchaser.clone(),
        pairs: params.pairs.clone().unwrap_or_default(),
    };
    let mut files = store.get_unextracted_files(&filter).await?;

    if params.retry_failed {
        let failed: HashSet<String> = store.get_failed_files(&filter).await?.into_iter().collect();
        files.retain(|f| failed.contains(&f.relative_path));
    }

    if let Some(limit) = params.extract_limit {
        if limit > 0 {
            files.truncate(limit as usize);
        }
    }

    Ok(files)
}

async fn finalise_extract_error(
    deps: &CoordinatorDeps<'_>,
    case_id: CaseId,
    run_id: &str,
    events: &UnboundedSender<RunEvent>,
    error: conveyor_extract::ExtractError,
) -> RunOutcome {
    let message = error.to_string();
    let _ = deps.store.mark_run_errored(run_id).await;
    if case_id.is_resume_capable() {
        let _ = deps
            .store
            .set_run_state(
                case_id,
                &RunState { status: RunStateStatus::Stopped, run_id: run_id.to_string() },
            )
            .await;
    }
    let _ = events.send(RunEvent::Error { message: message.clone() });
    RunOutcome::Error { run_id: Some(run_id.to_string()), message }
}

async fn finalise_success(
    deps: &CoordinatorDeps<'_>,
    case_id: CaseId,
    run_id: &str,
    events: &UnboundedSender<RunEvent>,
) -> RunOutcome {
    let records = match deps.store.get_records_for_run(run_id).await {
        Ok(records) => records,
        Err(e) => return RunOutcome::Error { run_id: Some(run_id.to_string()), message: e.to_string() },
    };

    let duration_ms = records
        .iter()
        .filter_map(|r| match (r.started_at, r.finished_at) {
            (Some(start), Some(finish)) => Some((start, finish)),
            _ => None,
        })
        .fold(None, |acc: Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>, (start, finish)| {
            match acc {
                None => Some((start, finish)),
                Some((min_start, max_finish)) => {
                    Some((min_start.min(start), max_finish.max(finish)))
                }
            }
        })
        .map(|(start, finish)| (finish - start).num_milliseconds().max(0))
        .unwrap_or(0);

    let summary = summary::build(&records, duration_ms);
    let summary_json = match serde_json::to_value(&summary) {
        Ok(v) => v,
        Err(e) => return RunOutcome::Error { run_id: Some(run_id.to_string()), message: e.to_string() },
    };

    if let Err(e) = deps.store.save_run_summary(run_id, &summary_json).await {
        return RunOutcome::Error { run_id: Some(run_id.to_string()), message: e.to_string() };
    }
    if let Err(e) = deps.store.mark_run_completed(run_id).await {
        return RunOutcome::Error { run_id: Some(run_id.to_string()), message: e.to_string() };
    }
    if case_id.is_resume_capable() {
        // No interrupted state to clear is not an error here.
        let _ = deps.store.clear_run_state(case_id).await;
    }

    let _ = events.send(RunEvent::Report {
        run_id: run_id.to_string(),
        summary,
    });
    RunOutcome::Completed { run_id: run_id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_config::{ApiConfig, BucketConfig, Config, RunConfig, S3Config};
    use conveyor_core::traits::{
        ExtractionApiError, ExtractionResponse, ObjectListing, ObjectStoreError,
    };
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex as TokioMutex;

    struct MockObjectStore {
        objects: StdHashMap<String, (String, Vec<u8>)>,
    }

    #[async_trait]
    impl ObjectStoreClient for MockObjectStore {
        async fn list(
            &self,
            _bucket: &str,
            prefix: &str,
        ) -> Result<Vec<ObjectListing>, ObjectStoreError> {
            Ok(self
                .objects
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, (etag, body))| ObjectListing {
                    key: k.clone(),
                    etag: etag.clone(),
                    size: body.len() as i64,
                })
                .collect())
        }

        async fn get(
            &self,
            _bucket: &str,
            key: &str,
        ) -> Result<futures_util::stream::BoxStream<'static, Result<bytes::Bytes, ObjectStoreError>>, ObjectStoreError>
        {
            let (_, body) = self
                .objects
                .get(key)
                .ok_or_else(|| ObjectStoreError::Get(format!("no such key {key}")))?;
            let body = bytes::Bytes::from(body.clone());
            Ok(Box::pin(futures_util::stream::once(async move { Ok(body) })))
        }
    }

    struct ScriptedExtractionClient {
        responses: TokioMutex<std::collections::VecDeque<Result<ExtractionResponse, ExtractionApiError>>>,
    }

    #[async_trait]
    impl ExtractionApiClient for ScriptedExtractionClient {
        async fn submit(
            &self,
            _relative_path: &str,
            _body_base64: &str,
        ) -> Result<ExtractionResponse, ExtractionApiError> {
            self.responses
                .lock()
                .await
                .pop_front()
                .expect("no more scripted responses")
        }
    }

    fn ok_response(status: u16) -> Result<ExtractionResponse, ExtractionApiError> {
        Ok(ExtractionResponse {
            http_status: status,
            latency_ms: 1,
            body_bytes: bytes::Bytes::from_static(b"{}"),
        })
    }

    fn test_config(staging_dir: &str) -> Config {
        Config {
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
                concurrency: 2,
                requests_per_second: 0,
                max_retries: 2,
                retry_backoff_ms: 1,
                checkpoint_path: "memory".into(),
                skip_completed: true,
            },
        }
    }

    #[tokio::test]
    async fn pipe_run_syncs_and_extracts_then_completes() {
        let store = Store::open_in_memory().await.unwrap();
        let admission = AdmissionController::new();
        let staging = tempfile::tempdir().unwrap();
        let config = test_config(staging.path().to_str().unwrap());

        let object_store = MockObjectStore {
            objects: StdHashMap::from([(
                "raw/a.csv".to_string(),
                ("e1".to_string(), b"hello".to_vec()),
            )]),
        };
        let extraction_client = ScriptedExtractionClient {
            responses: TokioMutex::new(std::collections::VecDeque::from([ok_response(200)])),
        };

        let deps = CoordinatorDeps {
            store: &store,
            admission: &admission,
            config: &config,
            object_store: &object_store,
            extraction_client: &extraction_client,
        };

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = run(
            &deps,
            CaseId::Pipe,
            RunParams::default(),
            RunOrigin::Manual,
            None,
            tx,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            RunOutcome::Completed { run_id } => assert_eq!(run_id, "RUN1"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(admission.active_run(CaseId::Pipe).is_none());

        let mut saw_report = false;
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Report { summary, .. } = event {
                assert_eq!(summary.total_files, 1);
                assert_eq!(summary.success, 1);
                saw_report = true;
            }
        }
        assert!(saw_report);
    }

    #[tokio::test]
    async fn empty_run_is_allocated_a_skip_id() {
        let store = Store::open_in_memory().await.unwrap();
        let admission = AdmissionController::new();
        let staging = tempfile::tempdir().unwrap();
        let mut config = test_config(staging.path().to_str().unwrap());
        config.s3.buckets.clear();

        let object_store = MockObjectStore { objects: StdHashMap::new() };
        let extraction_client = ScriptedExtractionClient {
            responses: TokioMutex::new(std::collections::VecDeque::new()),
        };
        let deps = CoordinatorDeps {
            store: &store,
            admission: &admission,
            config: &config,
            object_store: &object_store,
            extraction_client: &extraction_client,
        };

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = run(
            &deps,
            CaseId::Pipe,
            RunParams::default(),
            RunOrigin::Manual,
            None,
            tx,
            CancellationToken::new(),
        )
        .await;

        match outcome {
            RunOutcome::Completed { run_id } => assert!(run_id.starts_with("SKIP-")),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(store.current_run_id().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlapping_scope_is_denied_before_any_allocation() {
        let store = Store::open_in_memory().await.unwrap();
        let admission = AdmissionController::new();
        admission.try_admit(ActiveRun {
            run_id: "RUN1".into(),
            case_id: CaseId::Sync,
            scope: Scope::from_tenant("acme"),
            origin: RunOrigin::Manual,
            schedule_id: None,
            started_at: chrono::Utc::now(),
        });

        let staging = tempfile::tempdir().unwrap();
        let config = test_config(staging.path().to_str().unwrap());
        let object_store = MockObjectStore { objects: StdHashMap::new() };
        let extraction_client = ScriptedExtractionClient {
            responses: TokioMutex::new(std::collections::VecDeque::new()),
        };
        let deps = CoordinatorDeps {
            store: &store,
            admission: &admission,
            config: &config,
            object_store: &object_store,
            extraction_client: &extraction_client,
        };

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut params = RunParams::default();
        params.tenant = Some("acme".into());
        let outcome = run(
            &deps,
            CaseId::Extract,
            params,
            RunOrigin::Manual,
            None,
            tx,
            CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            outcome,
            RunOutcome::Denied { reason: DenialReason::ScopeOverlap, .. }
        ));
        assert_eq!(store.current_run_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn network_abort_during_extract_marks_run_stopped_for_resume() {
        let store = Store::open_in_memory().await.unwrap();
        let admission = AdmissionController::new();
        let staging = tempfile::tempdir().unwrap();
        let mut config = test_config(staging.path().to_str().unwrap());
        config.s3.buckets.clear();

        store
            .register_files(&[conveyor_store::RegisterFileInput {
                relative_path: "a.csv".into(),
                full_path: format!("{}/a.csv", staging.path().to_str().unwrap()),
                brand: "acme".into(),
                purchaser: "p1".into(),
                size: 5,
                etag: None,
                sha256: None,
                synced_at: chrono::Utc::now(),
            }])
            .await
            .unwrap();
        tokio::fs::write(format!("{}/a.csv", staging.path().to_str().unwrap()), b"hello")
            .await
            .unwrap();

        let object_store = MockObjectStore { objects: StdHashMap::new() };
        let extraction_client = ScriptedExtractionClient {
            responses: TokioMutex::new(
                std::iter::repeat_with(|| Err(ExtractionApiError("boom".into())))
                    .take(5)
                    .collect(),
            ),
        };
        let deps = CoordinatorDeps {
            store: &store,
            admission: &admission,
            config: &config,
            object_store: &object_store,
            extraction_client: &extraction_client,
        };

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = run(
            &deps,
            CaseId::Extract,
            RunParams::default(),
            RunOrigin::Manual,
            None,
            tx,
            CancellationToken::new(),
        )
        .await;

        let run_id = match outcome {
            RunOutcome::Error { run_id: Some(run_id), .. } => run_id,
            other => panic!("expected error outcome, got {other:?}"),
        };

        let state = store.get_run_state(CaseId::Extract).await.unwrap().unwrap();
        assert_eq!(state.status, RunStateStatus::Stopped);
        assert_eq!(state.run_id, run_id);
        assert!(admission.active_run(CaseId::Extract).is_none());
    }
}
