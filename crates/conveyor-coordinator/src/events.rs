//! Progress-channel event shapes (spec.md §4.3 "Progress channel", §6
//! NDJSON stream shapes). Grounded on `mqk-daemon::state::BusMsg` — a tagged
//! enum broadcast over the daemon's status stream — adapted from a broadcast
//! bus to a per-run `mpsc` channel since a run has exactly one consumer.

use conveyor_core::RunSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Sync,
    Extract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunId {
        run_id: String,
    },
    Log {
        message: String,
        level: LogLevel,
    },
    Progress {
        phase: Phase,
        done: i64,
        total: i64,
    },
    ResumeSkip {
        phase: Phase,
        skipped: i64,
        total: i64,
    },
    Report {
        run_id: String,
        summary: RunSummary,
    },
    Error {
        message: String,
    },
}

/// Forwards `conveyor_sync::SyncEvents` callbacks onto the run's event
/// channel, tagged with `Phase::Sync`.
pub(crate) struct SyncEventForwarder<'a> {
    pub sender: &'a tokio::sync::mpsc::UnboundedSender<RunEvent>,
}

impl conveyor_sync::SyncEvents for SyncEventForwarder<'_> {
    fn on_progress(&self, done: i64, total: i64) {
        let _ = self.sender.send(RunEvent::Progress {
            phase: Phase::Sync,
            done,
            total,
        });
    }

    fn on_sync_skip_progress(&self, skipped: i64, processed: i64) {
        let _ = self.sender.send(RunEvent::ResumeSkip {
            phase: Phase::Sync,
            skipped,
            total: processed,
        });
    }
}

/// Forwards `conveyor_extract::ExtractEvents` callbacks, tagged with
/// `Phase::Extract`.
pub(crate) struct ExtractEventForwarder<'a> {
    pub sender: &'a tokio::sync::mpsc::UnboundedSender<RunEvent>,
}

impl conveyor_extract::ExtractEvents for ExtractEventForwarder<'_> {
    fn on_progress(&self, done: i64, total: i64) {
        let _ = self.sender.send(RunEvent::Progress {
            phase: Phase::Extract,
            done,
            total,
        });
    }

    fn on_resume_skip(&self, skipped: i64, total: i64) {
        let _ = self.sender.send(RunEvent::ResumeSkip {
            phase: Phase::Extract,
            skipped,
            total,
        });
    }
}
