//! Interfaces for the three external collaborators the core consumes
//! (spec.md §1): the blob-store client, the extraction-API client, and the
//! notification sink. Concrete HTTP implementations live in
//! `conveyor-clients`; mocks for tests live in `conveyor-testkit`.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// One listed object from the remote blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectListing {
    pub key: String,
    pub etag: String,
    pub size: i64,
}

/// C2 — lists and retrieves remote objects (spec.md §4.2).
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// List every object under `bucket`/`prefix`. Implementations page
    /// internally; the returned vec is the full listing for this bucket.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectListing>, ObjectStoreError>;

    /// Stream the body of one object.
    async fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ObjectStoreError>>, ObjectStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("object store list failed: {0}")]
    List(String),
    #[error("object store get failed: {0}")]
    Get(String),
}

/// Response from one extraction-API invocation.
#[derive(Debug, Clone)]
pub struct ExtractionResponse {
    pub http_status: u16,
    pub latency_ms: u64,
    pub body_bytes: Bytes,
}

/// C3 — submits a file body, returns `(httpStatus, latencyMs, bodyBytes)`
/// (spec.md §2). Errors here are reserved for transport failures that never
/// reached the server (surfaced by callers as `statusCode = 0`); an HTTP
/// response of any status, including 5xx, is an `Ok` result.
#[async_trait]
pub trait ExtractionApiClient: Send + Sync {
    async fn submit(
        &self,
        relative_path: &str,
        body_base64: &str,
    ) -> Result<ExtractionResponse, ExtractionApiError>;
}

#[derive(Debug, thiserror::Error)]
#[error("extraction api transport error: {0}")]
pub struct ExtractionApiError(pub String);

/// A terminal run event worth notifying an operator about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunNotification {
    pub run_id: String,
    pub level: crate::model::AuditLevel,
    pub message: String,
}

/// Notification-sink interface (spec.md §1). The real email/templating
/// backend is out of scope; `conveyor-core` ships only the trait plus a
/// logging default so the core is runnable standalone.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: RunNotification) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
#[error("notification sink error: {0}")]
pub struct NotifyError(pub String);

/// Default sink: logs via `tracing` and never fails. Mirrors the teacher's
/// `BusMsg::LogLine` broadcast (`mqk-daemon::state`), repurposed as a
/// runnable default rather than requiring a real backend to be wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, event: RunNotification) -> Result<(), NotifyError> {
        match event.level {
            crate::model::AuditLevel::Error => {
                tracing::error!(run_id = %event.run_id, "{}", event.message)
            }
            crate::model::AuditLevel::Warn => {
                tracing::warn!(run_id = %event.run_id, "{}", event.message)
            }
            crate::model::AuditLevel::Info => {
                tracing::info!(run_id = %event.run_id, "{}", event.message)
            }
        }
        Ok(())
    }
}
