//! conveyor-daemon entry point.
//!
//! Thin by design: load config, build the shared state, wire middleware,
//! serve. All route handlers live in `routes.rs`; all shared state lives in
//! `state.rs`. Grounded on `mqk-daemon::main`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use conveyor_admission::AdmissionController;
use conveyor_clients::{HttpExtractionApiClient, S3ObjectStore};
use conveyor_config::Config;
use conveyor_core::traits::LoggingSink;
use conveyor_core::CancelRegistry;
use conveyor_cron::CronDispatcher;
use conveyor_daemon::{routes, state::AppState};
use conveyor_store::Store;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly. Silent if absent.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = Arc::new(load_config().context("loading configuration")?);
    let db_path = std::env::var("CONVEYOR_DB_PATH").unwrap_or_else(|_| "conveyor.db".into());
    let store = Store::open(&db_path).await.context("opening checkpoint store")?;

    let admission = Arc::new(AdmissionController::new());
    let object_store: Arc<dyn conveyor_core::traits::ObjectStoreClient> =
        Arc::new(S3ObjectStore::new(Some(config.s3.region.clone())).await);
    let extraction_client: Arc<dyn conveyor_core::traits::ExtractionApiClient> = Arc::new(
        HttpExtractionApiClient::new(config.api.base_url.clone(), Duration::from_millis(config.api.timeout_ms)),
    );
    let notifier: Arc<dyn conveyor_core::traits::NotificationSink> = Arc::new(LoggingSink);
    let cancel_registry = CancelRegistry::new();

    let cron = Arc::new(CronDispatcher::new(conveyor_cron::CronDeps {
        store: store.clone(),
        admission: Arc::clone(&admission),
        config: Arc::clone(&config),
        object_store: Arc::clone(&object_store),
        extraction_client: Arc::clone(&extraction_client),
        notifier: Arc::clone(&notifier),
        cancel_registry: cancel_registry.clone(),
    }));
    if let Err(e) = cron.load_all().await {
        error!(error = %e, "failed to load persisted schedules at startup");
    }

    let shared = Arc::new(AppState::new(
        store,
        admission,
        config,
        object_store,
        extraction_client,
        notifier,
        Arc::clone(&cron),
        cancel_registry,
    ));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("conveyor-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config() -> anyhow::Result<Config> {
    let path = std::env::var("CONVEYOR_CONFIG").unwrap_or_else(|_| "conveyor.json".into());
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("CONVEYOR_DAEMON_ADDR").ok()?.parse().ok()
}

/// Waits for `ctrl_c` or `SIGTERM`. `axum::serve`'s graceful shutdown then
/// stops accepting new connections and waits for in-flight requests (each
/// NDJSON stream's underlying run observes the same cancellation via
/// `AppState::cancel_registry`, not this signal directly).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight requests");
}

/// CORS: allow only localhost origins (the daemon is a local control plane,
/// not a public API).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> =
        allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
