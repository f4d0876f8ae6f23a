//! Sync Engine (C4) — spec.md §4.2. Downloads (or skips) every object under
//! one bucket/prefix into the staging tree, using the checkpoint store's
//! `sync_manifest` table for content-addressed dedup.
//!
//! Grounded on `decision-gate-mcp::runpack_object_store`'s write-to-temp +
//! rename + `Sha256` hashing pattern, generalised from a single artifact
//! write to the full listing/skip/download loop the spec describes.

mod engine;
mod events;

pub use engine::{sync_bucket, SyncBucketResult, SyncError, SyncOptions, SyncedFile};
pub use events::SyncEvents;
