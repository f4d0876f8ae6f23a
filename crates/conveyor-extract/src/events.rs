//! Event callbacks a caller (the Run Coordinator) observes during one
//! `run` call. Mirrors `conveyor_sync::SyncEvents`'s default-no-op shape.

use conveyor_core::ExtractionRecord;

pub trait ExtractEvents: Send + Sync {
    fn on_progress(&self, _done: i64, _total: i64) {}
    fn on_file_extracted(&self, _record: &ExtractionRecord) {}
    /// Fired once, before the pool starts, for files a resumed run already
    /// carried to a terminal status last time (mirrors
    /// `SyncEvents::on_sync_skip_progress`).
    fn on_resume_skip(&self, _skipped: i64, _total: i64) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractEvents;

impl ExtractEvents for NoopExtractEvents {}
