//! Event callbacks a caller (the Run Coordinator) observes during one
//! `sync_bucket` call (spec.md §4.2). Default no-op bodies, matching
//! `conveyor_core::traits::NotificationSink`'s "runnable with nothing wired
//! in" philosophy.

use crate::engine::SyncedFile;

pub trait SyncEvents: Send + Sync {
    fn on_progress(&self, _done: i64, _total: i64) {}
    fn on_sync_skip_progress(&self, _skipped: i64, _processed: i64) {}
    fn on_file_synced(&self, _job: &SyncedFile) {}
    /// Fired right before a download starts; the Run Coordinator persists
    /// an in-progress resume marker here.
    fn on_start_download(&self, _dest_path: &str, _manifest_key: &str) {}
}

/// No-op implementation for callers (tests, one-off tools) that don't need
/// progress reporting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncEvents;

impl SyncEvents for NoopSyncEvents {}
