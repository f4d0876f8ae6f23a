//! Request and response bodies for every conveyor-daemon HTTP endpoint
//! (spec.md §6). No business logic lives here — only the wire shapes.

use conveyor_admission::{ActiveRunRef, DenialReason};
use conveyor_core::{CaseId, RunOrigin, RunParams, Schedule, ScheduleAuditEntry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub const OK: Self = Self { success: true };
}

/// `POST /api/run` body.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub case_id: CaseId,
    #[serde(flatten)]
    pub params: RunParams,
}

/// `409` body when admission refuses a run (spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct ConflictResponse {
    pub error: String,
    pub reason: DenialReason,
    pub conflict: ActiveRunRef,
}

/// `POST /api/stop` body.
#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub case_id: CaseId,
    #[serde(default)]
    pub origin: Option<RunOrigin>,
}

/// `GET /api/run-status?caseId=` response.
#[derive(Debug, Clone, Serialize)]
pub struct CaseStatusResponse {
    pub case_id: CaseId,
    pub is_running: bool,
    pub can_resume: bool,
    /// "running" | "stopped" | "idle"
    pub state: String,
}

/// `GET /api/run-status` (no query) response — pipeline (`PIPE`) status.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatusResponse {
    pub can_resume: bool,
    pub run_id: Option<String>,
    pub done: i64,
    pub failed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRunsResponse {
    pub active_runs: Vec<ActiveRunRef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulesResponse {
    pub schedules: Vec<Schedule>,
    pub timezones: &'static [&'static str],
}

/// `POST /api/schedules` and `PUT /api/schedules/:id` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub brands: Vec<String>,
    pub purchasers: Vec<String>,
    pub cron: String,
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScheduleLogQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleLogResponse {
    pub entries: Vec<ScheduleAuditEntry>,
    pub page: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatusQuery {
    #[serde(rename = "caseId")]
    pub case_id: Option<String>,
}

/// `POST /api/clear-run-state` body.
#[derive(Debug, Clone, Deserialize)]
pub struct ClearRunStateRequest {
    pub case_id: CaseId,
}
