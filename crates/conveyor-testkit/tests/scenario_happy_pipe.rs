//! S1 — Happy PIPE (spec.md §8). Two files synced from one bucket, both
//! extracted successfully, run finalised as done.

use conveyor_admission::AdmissionController;
use conveyor_coordinator::{CoordinatorDeps, RunEvent, RunOutcome};
use conveyor_core::{CaseId, ExtractStatus, RunOrigin, RunParams, RunStatus};
use conveyor_store::Store;
use conveyor_testkit::{ok_response, single_bucket_config, ScriptedExtractionClient, ScriptedObjectStore};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn happy_pipe_syncs_and_extracts_both_files_then_completes() {
    let store = Store::open_in_memory().await.unwrap();
    let admission = AdmissionController::new();
    let staging = tempfile::tempdir().unwrap();
    let config = single_bucket_config(staging.path().to_str().unwrap(), "acme", "purchaser1");

    let object_store = ScriptedObjectStore::new([
        ("acme/purchaser1/a.csv".to_string(), "etag-a".to_string(), b"hello a".to_vec()),
        ("acme/purchaser1/b.csv".to_string(), "etag-b".to_string(), b"hello b".to_vec()),
    ]);
    let extraction_client = ScriptedExtractionClient::new([
        ok_response(200, r#"{"success":true,"pattern":{"pattern_key":"P1"}}"#),
        ok_response(200, r#"{"success":true,"pattern":{"pattern_key":"P1"}}"#),
    ]);

    let deps = CoordinatorDeps {
        store: &store,
        admission: &admission,
        config: &config,
        object_store: &object_store,
        extraction_client: &extraction_client,
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RunEvent>();
    let params = RunParams { tenant: Some("acme".into()), purchaser: Some("purchaser1".into()), ..Default::default() };

    let outcome =
        conveyor_coordinator::run(&deps, CaseId::Pipe, params, RunOrigin::Manual, None, tx, CancellationToken::new())
            .await;

    let run_id = match outcome {
        RunOutcome::Completed { run_id } => run_id,
        other => panic!("expected Completed, got {other:?}"),
    };

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(RunEvent::RunId { run_id: id }) if *id == run_id));
    assert!(matches!(events.last(), Some(RunEvent::Report { .. })));

    let records = store.get_records_for_run(&run_id).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == ExtractStatus::Done));

    let mut completed = store.get_completed_paths(&run_id).await.unwrap();
    completed.sort();
    assert_eq!(completed, vec!["acme/purchaser1/a.csv".to_string(), "acme/purchaser1/b.csv".to_string()]);

    let run = store.get_run(&run_id).await.unwrap().expect("run row persisted");
    assert_eq!(run.status, RunStatus::Done);
}
