//! Shared fakes and scenario helpers for cross-crate integration tests
//! (spec.md §8 "End-to-end scenarios"). Grounded on `mqk-testkit`'s role:
//! one crate every other crate's `tests/` directory can depend on for
//! fakes, kept out of `[dependencies]` so it never ships in the daemon
//! binary.

use async_trait::async_trait;
use bytes::Bytes;
use conveyor_config::{ApiConfig, BucketConfig, Config, RunConfig, S3Config};
use conveyor_core::traits::{
    ExtractionApiClient, ExtractionApiError, ExtractionResponse, ObjectListing, ObjectStoreClient,
    ObjectStoreError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// An in-memory blob store scripted with a fixed object set. `list` filters
/// by key prefix only — callers scope buckets themselves via `Config`.
#[derive(Default)]
pub struct ScriptedObjectStore {
    objects: HashMap<String, (String, Vec<u8>)>,
}

impl ScriptedObjectStore {
    pub fn new(objects: impl IntoIterator<Item = (String, String, Vec<u8>)>) -> Self {
        Self {
            objects: objects.into_iter().map(|(key, etag, body)| (key, (etag, body))).collect(),
        }
    }
}

#[async_trait]
impl ObjectStoreClient for ScriptedObjectStore {
    async fn list(&self, _bucket: &str, prefix: &str) -> Result<Vec<ObjectListing>, ObjectStoreError> {
        Ok(self
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (etag, body))| ObjectListing { key: k.clone(), etag: etag.clone(), size: body.len() as i64 })
            .collect())
    }

    async fn get(
        &self,
        _bucket: &str,
        key: &str,
    ) -> Result<futures_util::stream::BoxStream<'static, Result<Bytes, ObjectStoreError>>, ObjectStoreError> {
        let (_, body) =
            self.objects.get(key).ok_or_else(|| ObjectStoreError::Get(format!("no such key {key}")))?;
        let body = Bytes::from(body.clone());
        Ok(Box::pin(futures_util::stream::once(async move { Ok(body) })))
    }
}

/// An extraction-API client that replays a fixed queue of responses in
/// call order, irrespective of which file is being submitted — enough for
/// scenarios that script "fails twice then succeeds" without caring which
/// path triggered which response.
#[derive(Default)]
pub struct ScriptedExtractionClient {
    responses: Mutex<VecDeque<Result<ExtractionResponse, ExtractionApiError>>>,
}

impl ScriptedExtractionClient {
    pub fn new(responses: impl IntoIterator<Item = Result<ExtractionResponse, ExtractionApiError>>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().collect()) }
    }
}

#[async_trait]
impl ExtractionApiClient for ScriptedExtractionClient {
    async fn submit(&self, _relative_path: &str, _body_base64: &str) -> Result<ExtractionResponse, ExtractionApiError> {
        self.responses
            .lock()
            .expect("scripted extraction client mutex poisoned")
            .pop_front()
            .expect("scenario ran out of scripted extraction responses")
    }
}

pub fn ok_response(status: u16, body: &str) -> Result<ExtractionResponse, ExtractionApiError> {
    Ok(ExtractionResponse { http_status: status, latency_ms: 1, body_bytes: Bytes::from(body.to_string()) })
}

/// A minimal single-bucket config, the shape every scenario test starts
/// from and narrows (`concurrency`, `max_retries`, ...) as the scenario
/// needs.
pub fn single_bucket_config(staging_dir: &str, tenant: &str, purchaser: &str) -> Config {
    Config {
        api: ApiConfig { base_url: "http://localhost".into(), timeout_ms: 1000 },
        s3: S3Config {
            buckets: vec![BucketConfig {
                name: format!("{tenant}-bucket"),
                bucket: format!("{tenant}-bucket"),
                prefix: format!("{tenant}/{purchaser}/"),
                tenant: tenant.into(),
                purchaser: purchaser.into(),
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
