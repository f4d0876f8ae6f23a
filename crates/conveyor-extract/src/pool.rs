//! Bounded-concurrency, rate-limited extraction worker pool (spec.md §4.4).
//!
//! Grounded on `mqk-execution::order_router`'s `BrokerAdapter` boundary
//! (a trait-object call site wrapped by retries), generalised from a single
//! submit call into the full pool/rate-limit/retry loop the spec describes.

use crate::limiter::RateLimiter;
use crate::retry::{format_error_message, submit_with_retries, NetworkAbort};
use crate::ExtractEvents;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use conveyor_core::traits::ExtractionApiClient;
use conveyor_core::{ExtractStatus, ExtractionRecord, FileRegistryEntry};
use conveyor_store::Store;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    pub concurrency: usize,
    pub requests_per_second: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl ExtractOptions {
    pub fn from_run_config(cfg: &conveyor_config::RunConfig) -> Self {
        Self {
            concurrency: cfg.concurrency,
            requests_per_second: cfg.requests_per_second,
            max_retries: cfg.max_retries,
            retry_backoff_ms: cfg.retry_backoff_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractSummary {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// Exceeded `NETWORK_MAX_RETRIES` transport failures on one file;
    /// cascades out of the pool and fails the run (spec.md §4.4.1).
    #[error("network abort on {relative_path} after {attempts} attempts")]
    NetworkAbort {
        relative_path: String,
        attempts: u32,
    },
    #[error(transparent)]
    Store(#[from] conveyor_store::StoreError),
}

struct FileOutcome {
    success: bool,
    record: ExtractionRecord,
}

/// `Run(files[], runId, concurrency, requestsPerSecond, onProgress,
/// cancelHandle) -> void` (spec.md §4.4 contract). `options.concurrency`
/// bounds files in flight; `options.requests_per_second == 0` disables
/// the rolling-window start gate.
pub async fn run(
    files: &[FileRegistryEntry],
    run_id: &str,
    client: &dyn ExtractionApiClient,
    store: &Store,
    options: &ExtractOptions,
    events: &dyn ExtractEvents,
    cancel: &CancellationToken,
) -> Result<ExtractSummary, ExtractError> {
    let total = files.len() as i64;
    if total == 0 {
        return Ok(ExtractSummary::default());
    }

    let limiter = RateLimiter::new(options.requests_per_second);
    let concurrency = options.concurrency.max(1);

    let mut done: i64 = 0;
    let mut success: i64 = 0;
    let mut failed: i64 = 0;
    let mut cancelled = false;

    let mut iter = files.iter();
    let mut in_flight = FuturesUnordered::new();

    for _ in 0..concurrency {
        match iter.next() {
            Some(file) if !cancel.is_cancelled() => {
                limiter.acquire().await;
                in_flight.push(process_file(file, run_id, client, store, options));
            }
            _ => {
                cancelled = cancel.is_cancelled();
                break;
            }
        }
    }

    while let Some(outcome) = in_flight.next().await {
        let outcome = outcome?;
        done += 1;
        if outcome.success {
            success += 1;
        } else {
            failed += 1;
        }
        events.on_progress(done, total);
        events.on_file_extracted(&outcome.record);

        if cancel.is_cancelled() {
            cancelled = true;
            continue;
        }
        if let Some(file) = iter.next() {
            limiter.acquire().await;
            in_flight.push(process_file(file, run_id, client, store, options));
        }
    }

    Ok(ExtractSummary {
        total,
        success,
        failed,
        cancelled,
    })
}

async fn process_file(
    file: &FileRegistryEntry,
    run_id: &str,
    client: &dyn ExtractionApiClient,
    store: &Store,
    options: &ExtractOptions,
) -> Result<FileOutcome, ExtractError> {
    let started_at = Utc::now();
    let base = ExtractionRecord {
        run_id: run_id.to_string(),
        relative_path: file.relative_path.clone(),
        file_path: file.full_path.clone(),
        brand: file.brand.clone(),
        purchaser: file.purchaser.clone(),
        status: ExtractStatus::Running,
        started_at: Some(started_at),
        finished_at: None,
        latency_ms: None,
        status_code: None,
        error_message: None,
        pattern_key: None,
        full_response: None,
    };
    store.upsert_record(&base).await?;

    let bytes = match tokio::fs::read(&file.full_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let record = terminal_record(
                &base,
                started_at,
                None,
                0,
                Some(format!("Read file: {err}")),
                None,
                None,
            );
            store.upsert_record(&record).await?;
            return Ok(FileOutcome {
                success: false,
                record,
            });
        }
    };

    let body_base64 = STANDARD.encode(&bytes);

    let attempt = submit_with_retries(
        client,
        &file.relative_path,
        &body_base64,
        options.max_retries,
        options.retry_backoff_ms,
    )
    .await
    .map_err(|NetworkAbort { attempts }| ExtractError::NetworkAbort {
        relative_path: file.relative_path.clone(),
        attempts,
    })?;

    let response = attempt.response;
    let body_text = String::from_utf8_lossy(&response.body_bytes).into_owned();
    let parsed: Option<Value> = serde_json::from_str(&body_text).ok();

    let pattern_key = parsed
        .as_ref()
        .and_then(|v| v.get("pattern"))
        .and_then(|p| p.get("pattern_key"))
        .and_then(|k| k.as_str())
        .map(str::to_string);

    let app_failure = parsed
        .as_ref()
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool)
        .map(|ok| !ok)
        .unwrap_or(false);

    let http_success = (200..300).contains(&response.http_status);
    let success = http_success && !app_failure;

    let error_message = if success {
        None
    } else {
        let raw = if app_failure {
            parsed
                .as_ref()
                .and_then(|v| v.get("error").or_else(|| v.get("message")))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body_text.clone())
        } else {
            body_text.clone()
        };
        Some(format_error_message(&raw, attempt.attempts))
    };

    let full_response = parsed
        .clone()
        .or_else(|| Some(serde_json::json!({ "raw": body_text })));

    let record = terminal_record(
        &base,
        started_at,
        Some(response.latency_ms as i64),
        response.http_status as i32,
        error_message,
        pattern_key,
        full_response,
    );
    store.upsert_record(&record).await?;

    Ok(FileOutcome { success, record })
}

fn terminal_record(
    base: &ExtractionRecord,
    started_at: DateTime<Utc>,
    latency_ms: Option<i64>,
    status_code: i32,
    error_message: Option<String>,
    pattern_key: Option<String>,
    full_response: Option<Value>,
) -> ExtractionRecord {
    ExtractionRecord {
        status: if error_message.is_none() {
            ExtractStatus::Done
        } else {
            ExtractStatus::Error
        },
        started_at: Some(started_at),
        finished_at: Some(Utc::now()),
        latency_ms,
        status_code: Some(status_code),
        error_message,
        pattern_key,
        full_response,
        ..base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopExtractEvents;
    use async_trait::async_trait;
    use conveyor_core::traits::{ExtractionApiError, ExtractionResponse};
    use conveyor_store::RegisterFileInput;
    use std::collections::{HashMap, VecDeque};
    use tokio::sync::Mutex as TokioMutex;

    type Scripted = Result<ExtractionResponse, ExtractionApiError>;

    struct ScriptedClient {
        by_path: TokioMutex<HashMap<String, VecDeque<Scripted>>>,
    }

    impl ScriptedClient {
        fn new(scripts: Vec<(&str, Vec<Scripted>)>) -> Self {
            let by_path = scripts
                .into_iter()
                .map(|(path, responses)| (path.to_string(), responses.into_iter().collect()))
                .collect();
            Self {
                by_path: TokioMutex::new(by_path),
            }
        }
    }

    #[async_trait]
    impl ExtractionApiClient for ScriptedClient {
        async fn submit(
            &self,
            relative_path: &str,
            _body_base64: &str,
        ) -> Result<ExtractionResponse, ExtractionApiError> {
            self.by_path
                .lock()
                .await
                .get_mut(relative_path)
                .and_then(VecDeque::pop_front)
                .expect("no more scripted responses for this path")
        }
    }

    fn ok_json(status: u16, body: &str) -> Scripted {
        Ok(ExtractionResponse {
            http_status: status,
            latency_ms: 5,
            body_bytes: bytes::Bytes::copy_from_slice(body.as_bytes()),
        })
    }

    async fn staged_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> FileRegistryEntry {
        let path = dir.path().join(name);
        tokio::fs::write(&path, contents).await.unwrap();
        FileRegistryEntry {
            relative_path: name.to_string(),
            full_path: path.to_string_lossy().into_owned(),
            brand: "acme".into(),
            purchaser: "p1".into(),
            size: contents.len() as i64,
            etag: None,
            sha256: None,
            synced_at: Utc::now(),
            registered_at: Utc::now(),
            extract_status: ExtractStatus::Pending,
            extracted_at: None,
            last_run_id: None,
        }
    }

    async fn register(store: &Store, file: &FileRegistryEntry) {
        store
            .register_files(&[RegisterFileInput {
                relative_path: file.relative_path.clone(),
                full_path: file.full_path.clone(),
                brand: file.brand.clone(),
                purchaser: file.purchaser.clone(),
                size: file.size,
                etag: file.etag.clone(),
                sha256: file.sha256.clone(),
                synced_at: file.synced_at,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn two_files_succeed_sequentially() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let a = staged_file(&dir, "a.csv", b"hello").await;
        let b = staged_file(&dir, "b.csv", b"world").await;
        register(&store, &a).await;
        register(&store, &b).await;

        let client = ScriptedClient::new(vec![
            ("a.csv", vec![ok_json(200, r#"{"success":true,"pattern":{"pattern_key":"P1"}}"#)]),
            ("b.csv", vec![ok_json(200, r#"{"success":true,"pattern":{"pattern_key":"P1"}}"#)]),
        ]);

        let options = ExtractOptions {
            concurrency: 1,
            requests_per_second: 0,
            max_retries: 2,
            retry_backoff_ms: 10,
        };

        let summary = run(
            &[a, b],
            "RUN1",
            &client,
            &store,
            &options,
            &NoopExtractEvents,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary, ExtractSummary { total: 2, success: 2, failed: 0, cancelled: false });
        let records = store.get_records_for_run("RUN1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == ExtractStatus::Done));
    }

    #[tokio::test]
    async fn network_abort_cascades_out_of_the_run() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let a = staged_file(&dir, "a.csv", b"hello").await;
        register(&store, &a).await;

        let client = ScriptedClient::new(vec![(
            "a.csv",
            std::iter::repeat_with(|| Err(ExtractionApiError("connection reset".into())))
                .take(5)
                .collect(),
        )]);

        let options = ExtractOptions {
            concurrency: 1,
            requests_per_second: 0,
            max_retries: 2,
            retry_backoff_ms: 1,
        };

        let err = run(
            &[a],
            "RUN1",
            &client,
            &store,
            &options,
            &NoopExtractEvents,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            ExtractError::NetworkAbort { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("expected NetworkAbort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn application_retry_then_success_writes_done_record() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let a = staged_file(&dir, "a.csv", b"hello").await;
        register(&store, &a).await;

        let client = ScriptedClient::new(vec![(
            "a.csv",
            vec![ok_json(503, "oops"), ok_json(503, "oops"), ok_json(200, r#"{"success":true}"#)],
        )]);

        let options = ExtractOptions {
            concurrency: 1,
            requests_per_second: 0,
            max_retries: 2,
            retry_backoff_ms: 1,
        };

        let summary = run(
            &[a],
            "RUN1",
            &client,
            &store,
            &options,
            &NoopExtractEvents,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.success, 1);
        let records = store.get_records_for_run("RUN1").await.unwrap();
        assert_eq!(records[0].status, ExtractStatus::Done);
        assert_eq!(records[0].status_code, Some(200));
    }

    #[tokio::test]
    async fn exhausted_application_retries_writes_error_with_attempt_suffix() {
        let store = Store::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let a = staged_file(&dir, "a.csv", b"hello").await;
        register(&store, &a).await;

        let client = ScriptedClient::new(vec![(
            "a.csv",
            vec![ok_json(503, "server is down"), ok_json(503, "server is down")],
        )]);

        let options = ExtractOptions {
            concurrency: 1,
            requests_per_second: 0,
            max_retries: 1,
            retry_backoff_ms: 1,
        };

        let summary = run(
            &[a],
            "RUN1",
            &client,
            &store,
            &options,
            &NoopExtractEvents,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        let records = store.get_records_for_run("RUN1").await.unwrap();
        assert_eq!(records[0].status, ExtractStatus::Error);
        assert_eq!(
            records[0].error_message.as_deref(),
            Some("server is down (after 2 attempts)")
        );
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let store = Store::open_in_memory().await.unwrap();
        let a = FileRegistryEntry {
            relative_path: "gone.csv".into(),
            full_path: "/nonexistent/gone.csv".into(),
            brand: "acme".into(),
            purchaser: "p1".into(),
            size: 0,
            etag: None,
            sha256: None,
            synced_at: Utc::now(),
            registered_at: Utc::now(),
            extract_status: ExtractStatus::Pending,
            extracted_at: None,
            last_run_id: None,
        };
        register(&store, &a).await;

        let client = ScriptedClient::new(vec![]);
        let options = ExtractOptions {
            concurrency: 1,
            requests_per_second: 0,
            max_retries: 1,
            retry_backoff_ms: 1,
        };

        let summary = run(
            &[a],
            "RUN1",
            &client,
            &store,
            &options,
            &NoopExtractEvents,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.failed, 1);
        let records = store.get_records_for_run("RUN1").await.unwrap();
        assert_eq!(records[0].status_code, Some(0));
        assert!(records[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Read file:"));
    }
}
