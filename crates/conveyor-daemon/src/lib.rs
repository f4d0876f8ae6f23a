//! HTTP control plane (C9) — spec.md §6. Exposes the Run Coordinator, Cron
//! Dispatcher, and Checkpoint Store over a small JSON/NDJSON API, grounded
//! on `mqk-daemon`'s module split (`routes` / `state` / `api_types`).

pub mod api_types;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
