//! The error taxonomy (spec.md §7), shared across crates so `conveyor-daemon`
//! can map every variant to an HTTP status in one place — grounded on the
//! teacher's `GateRefusal` → `403` mapping (`mqk-daemon::routes::run_start`),
//! generalised here from one fixed status to a full taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad input: cron format, timezone, unknown caseId, empty required
    /// field. Surfaced as HTTP 400.
    #[error("validation error: {0}")]
    Validation(String),

    /// Already running / scope conflict. HTTP 409.
    #[error("admission error: {0}")]
    Admission(String),

    /// Unknown schedule id, missing resume state. HTTP 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network/5xx/429 from an external collaborator. Retried per the
    /// caller's own retry policy; this variant is what remains once retries
    /// are exhausted without becoming a `FatalRunError`.
    #[error("transient external error: {0}")]
    TransientExternal(String),

    /// `NetworkAbort` (retry limit exceeded) or a store write failure.
    /// Aborts the current run.
    #[error("fatal run error: {0}")]
    FatalRun(String),

    /// Error writing an audit log entry. Must never propagate to the
    /// caller — `conveyor-store` logs and swallows these itself, but the
    /// variant exists so call sites that *do* see one (e.g. a test harness)
    /// can assert on it without reaching for a bare string.
    #[error("audit failure: {0}")]
    Audit(String),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn admission(msg: impl Into<String>) -> Self {
        CoreError::Admission(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }
}
