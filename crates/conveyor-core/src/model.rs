//! Data model — §3 of the spec. Every row type doubles as the wire type that
//! crosses the HTTP boundary and the event stream, matching the teacher's own
//! `StatusSnapshot`/`BusMsg` types (`mqk-daemon::state`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The run mode. The pipeline has exactly these three stages — no general
/// workflow DSL (spec.md §1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseId {
    Sync,
    Extract,
    Pipe,
}

impl CaseId {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseId::Sync => "SYNC",
            CaseId::Extract => "EXTRACT",
            CaseId::Pipe => "PIPE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SYNC" => Some(CaseId::Sync),
            "EXTRACT" => Some(CaseId::Extract),
            "PIPE" => Some(CaseId::Pipe),
            _ => None,
        }
    }

    /// `caseId`s for which interrupted state is persisted and reusable.
    /// Configured here (see SPEC_FULL.md §4.3): SYNC is idempotent via the
    /// sync manifest on its own, so it is deliberately excluded.
    pub fn is_resume_capable(self) -> bool {
        matches!(self, CaseId::Extract | CaseId::Pipe)
    }

    pub fn runs_sync(self) -> bool {
        matches!(self, CaseId::Sync | CaseId::Pipe)
    }

    pub fn runs_extract(self) -> bool {
        matches!(self, CaseId::Extract | CaseId::Pipe)
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file extraction status, shared by `FileRegistryEntry` and
/// `ExtractionRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Pending,
    Running,
    Done,
    Error,
    Skipped,
}

impl ExtractStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractStatus::Pending => "pending",
            ExtractStatus::Running => "running",
            ExtractStatus::Done => "done",
            ExtractStatus::Error => "error",
            ExtractStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExtractStatus::Pending),
            "running" => Some(ExtractStatus::Running),
            "done" => Some(ExtractStatus::Done),
            "error" => Some(ExtractStatus::Error),
            "skipped" => Some(ExtractStatus::Skipped),
            _ => None,
        }
    }

    /// `GetProcessedPaths` = union of `{done, skipped, error}`.
    pub fn is_processed(self) -> bool {
        matches!(
            self,
            ExtractStatus::Done | ExtractStatus::Skipped | ExtractStatus::Error
        )
    }

    /// `GetCompletedPaths` = `{done, skipped}`.
    pub fn is_completed(self) -> bool {
        matches!(self, ExtractStatus::Done | ExtractStatus::Skipped)
    }
}

/// One row per unique staged object (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRegistryEntry {
    pub relative_path: String,
    pub full_path: String,
    pub brand: String,
    pub purchaser: String,
    pub size: i64,
    pub etag: Option<String>,
    pub sha256: Option<String>,
    pub synced_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub extract_status: ExtractStatus,
    pub extracted_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
}

/// One row per `(runId, relativePath)` attempt result (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub run_id: String,
    pub relative_path: String,
    pub file_path: String,
    pub brand: String,
    pub purchaser: String,
    pub status: ExtractStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
    pub pattern_key: Option<String>,
    /// Opaque JSON-shaped blob of the full API response body; never
    /// interpreted beyond `pattern.pattern_key` / `success` (spec.md §9).
    pub full_response: Option<Value>,
}

/// Run lifecycle status (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "done" => Some(RunStatus::Done),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// One row per run (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub summary: Option<Value>,
}

/// User-defined recurring trigger (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub brands: Vec<String>,
    pub purchasers: Vec<String>,
    /// Restricted `"M H * * *"` form — see `conveyor_cron::validate`.
    pub cron: String,
    pub timezone: String,
}

/// One row per sync invocation (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub synced: i64,
    pub skipped: i64,
    pub errors: i64,
    pub brands: Vec<String>,
    pub purchasers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Executed,
    Skipped,
}

impl AuditOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Executed => "executed",
            AuditOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executed" => Some(AuditOutcome::Executed),
            "skipped" => Some(AuditOutcome::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

impl AuditLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AuditLevel::Info),
            "warn" => Some(AuditLevel::Warn),
            "error" => Some(AuditLevel::Error),
            _ => None,
        }
    }
}

/// One row per schedule tick attempt (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub schedule_id: Option<String>,
    pub outcome: AuditOutcome,
    pub level: AuditLevel,
    pub message: String,
    pub data: Option<Value>,
}

/// Transient resume record, stored under `last_run_state` KV keyed by
/// `caseId` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStateStatus,
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStateStatus {
    Running,
    Stopped,
}

/// Origin of a run admission — manual (HTTP) or scheduled (cron).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOrigin {
    Manual,
    Scheduled,
}

impl RunOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOrigin::Manual => "manual",
            RunOrigin::Scheduled => "scheduled",
        }
    }
}

/// Parameters a run is invoked with (`POST /api/run` body, spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    #[serde(default)]
    pub sync_limit: Option<i64>,
    #[serde(default)]
    pub extract_limit: Option<i64>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub purchaser: Option<String>,
    #[serde(default)]
    pub pairs: Option<Vec<crate::scope::Pair>>,
    #[serde(default)]
    pub retry_failed: bool,
}

/// Computed run summary written by `SaveRunSummary` (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_files: i64,
    pub success: i64,
    pub failed: i64,
    pub skipped: i64,
    pub duration_ms: i64,
    pub throughput_per_second: f64,
    pub throughput_per_minute: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
    pub failure_breakdown: BTreeMap<String, i64>,
    pub top_slowest_files: Vec<SlowFile>,
    pub failure_count_by_brand: BTreeMap<String, i64>,
    pub failure_details: Vec<FailureDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowFile {
    pub relative_path: String,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub relative_path: String,
    /// Truncated to 300 chars per spec.md §6.
    pub error_message: String,
}
