//! Shared runtime state for conveyor-daemon.
//!
//! Grounded on `mqk-daemon::state::AppState`: a `Clone`-able (via `Arc`)
//! handle threaded through every Axum handler via `State<Arc<AppState>>`.
//! Unlike the teacher's `AppState`, which owns a broadcast bus every
//! handler can publish to, this one owns the collaborators the Run
//! Coordinator and Cron Dispatcher both need — there is no fan-out bus here
//! since every run has exactly one HTTP consumer (its own NDJSON stream).

use std::sync::Arc;
use std::time::Instant;

use conveyor_admission::AdmissionController;
use conveyor_config::Config;
use conveyor_coordinator::CoordinatorDeps;
use conveyor_core::traits::{ExtractionApiClient, NotificationSink, ObjectStoreClient};
use conveyor_core::CancelRegistry;
use conveyor_cron::CronDispatcher;
use conveyor_store::Store;

pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub store: Store,
    pub admission: Arc<AdmissionController>,
    pub config: Arc<Config>,
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub extraction_client: Arc<dyn ExtractionApiClient>,
    pub notifier: Arc<dyn NotificationSink>,
    pub cron: Arc<CronDispatcher>,
    pub cancel_registry: CancelRegistry,
    pub build: BuildInfo,
    started_at: Instant,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        admission: Arc<AdmissionController>,
        config: Arc<Config>,
        object_store: Arc<dyn ObjectStoreClient>,
        extraction_client: Arc<dyn ExtractionApiClient>,
        notifier: Arc<dyn NotificationSink>,
        cron: Arc<CronDispatcher>,
        cancel_registry: CancelRegistry,
    ) -> Self {
        Self {
            store,
            admission,
            config,
            object_store,
            extraction_client,
            notifier,
            cron,
            cancel_registry,
            build: BuildInfo { service: "conveyor-daemon", version: env!("CARGO_PKG_VERSION") },
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Borrows this state's collaborators into the shape the Run
    /// Coordinator expects. Only valid for the duration of one coordinator
    /// call — see `conveyor-cron::tick` for the same pattern.
    pub fn coordinator_deps(&self) -> CoordinatorDeps<'_> {
        CoordinatorDeps {
            store: &self.store,
            admission: &self.admission,
            config: &self.config,
            object_store: self.object_store.as_ref(),
            extraction_client: self.extraction_client.as_ref(),
        }
    }
}
