//! Shared types, traits, and small pure-logic helpers for the extraction
//! pipeline orchestrator.
//!
//! Every other `conveyor-*` crate depends on this one; it owns nothing
//! stateful itself — no IO, no clock reads, no locks. Runtime state lives in
//! `conveyor-store` (persisted) and `conveyor-admission` (in-memory).

pub mod classify;
pub mod clock;
pub mod error;
pub mod ids;
pub mod model;
pub mod registry;
pub mod scope;
pub mod traits;

pub use classify::{classify_error, ErrorClass};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::CoreError;
pub use ids::{derive_skip_id, entropy_byte, format_run_id, normalize_relative_path};
pub use model::*;
pub use registry::{run_key, CancelRegistry};
pub use scope::{Pair, Scope};
pub use traits::{ExtractionApiClient, NotificationSink, ObjectStoreClient};
