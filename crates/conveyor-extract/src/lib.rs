//! Extraction Worker Pool (C5) — spec.md §4.4. Drains a batch of staged
//! files through the extraction API with a bounded concurrent pool, a
//! rolling-window start-rate limiter, and the two independent retry loops
//! (transport vs. application-level failures).

mod events;
mod limiter;
mod pool;
mod retry;

pub use events::{ExtractEvents, NoopExtractEvents};
pub use pool::{run, ExtractError, ExtractOptions, ExtractSummary};
