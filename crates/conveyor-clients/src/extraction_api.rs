//! HTTP `ExtractionApiClient` (C3) — a single POST per file, body as
//! base64-encoded JSON. Transport failures (no HTTP response at all) map to
//! `ExtractionApiError`; any HTTP status, including 5xx, is returned as an
//! `Ok(ExtractionResponse)` so the worker pool's retry/classification logic
//! (spec.md §4.4) sees the real status code.

use async_trait::async_trait;
use conveyor_core::traits::{ExtractionApiClient, ExtractionApiError, ExtractionResponse};
use serde::Serialize;
use std::time::{Duration, Instant};

pub struct HttpExtractionApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    #[serde(rename = "relativePath")]
    relative_path: &'a str,
    body: &'a str,
}

impl HttpExtractionApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExtractionApiClient for HttpExtractionApiClient {
    async fn submit(
        &self,
        relative_path: &str,
        body_base64: &str,
    ) -> Result<ExtractionResponse, ExtractionApiError> {
        let started = Instant::now();
        let response = self
            .http
            .post(&self.base_url)
            .json(&SubmitBody {
                relative_path,
                body: body_base64,
            })
            .send()
            .await
            .map_err(|e| ExtractionApiError(e.to_string()))?;

        let http_status = response.status().as_u16();
        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractionApiError(e.to_string()))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        Ok(ExtractionResponse {
            http_status,
            latency_ms,
            body_bytes,
        })
    }
}
