//! Axum router and all HTTP handlers for conveyor-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so tests can compose the
//! router directly, matching `mqk-daemon::routes`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::api_types::{
    ActiveRunsResponse, CaseStatusResponse, ClearRunStateRequest, ConflictResponse,
    ErrorResponse, HealthResponse, PipelineStatusResponse, RunRequest, RunStatusQuery,
    ScheduleLogQuery, ScheduleLogResponse, ScheduleRequest, SchedulesResponse, StopRequest,
    SuccessResponse,
};
use crate::state::AppState;
use conveyor_coordinator::RunEvent;
use conveyor_core::{run_key, CaseId, RunOrigin, RunStateStatus, Schedule};

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/healthz", get(healthz))
        .route("/api/run", post(run_start))
        .route("/api/stop", post(stop_run))
        .route("/api/run-status", get(run_status))
        .route("/api/active-runs", get(active_runs))
        .route("/api/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/schedules/:id",
            put(update_schedule).delete(delete_schedule),
        )
        .route("/api/schedule-log", get(schedule_log))
        .route(
            "/api/email-config",
            get(email_config_get).post(email_config_set),
        )
        .route("/api/clear-run-state", post(clear_run_state))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /api/healthz
// ---------------------------------------------------------------------------

pub(crate) async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse { ok: true, service: st.build.service, version: st.build.version }),
    )
}

// ---------------------------------------------------------------------------
// POST /api/run
// ---------------------------------------------------------------------------

/// Streams `RunEvent`s as NDJSON. Admission is decided inside
/// `conveyor_coordinator::run` before any event is emitted (spec.md §4.5
/// "admission decisions are made before any state is mutated"), so a
/// `Denied` outcome always completes without sending anything on `events` —
/// racing the coordinator task against its own event channel distinguishes
/// "admitted, stream starting" from "refused, respond synchronously" without
/// duplicating the admission check here.
pub(crate) async fn run_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunRequest>,
) -> Response {
    let RunRequest { case_id, params } = body;
    let key = run_key(case_id, RunOrigin::Manual);
    let cancel = state.cancel_registry.register(&key);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RunEvent>();

    let task_state = Arc::clone(&state);
    let task_cancel = cancel.clone();
    let mut handle = tokio::spawn(async move {
        let deps = task_state.coordinator_deps();
        conveyor_coordinator::run(&deps, case_id, params, RunOrigin::Manual, None, tx, task_cancel)
            .await
    });

    let first = tokio::select! {
        outcome = &mut handle => {
            state.cancel_registry.remove(&key);
            match outcome {
                Ok(conveyor_coordinator::RunOutcome::Denied { conflict, reason }) => {
                    return (
                        StatusCode::CONFLICT,
                        Json(ConflictResponse {
                            error: "run refused: conflicts with an active run".into(),
                            reason,
                            conflict,
                        }),
                    )
                        .into_response();
                }
                Ok(_) => None,
                Err(e) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(ErrorResponse::new(format!("run task failed: {e}"))),
                    )
                        .into_response();
                }
            }
        }
        event = rx.recv() => event,
    };

    let cleanup_key = key;
    let cleanup_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = handle.await;
        cleanup_state.cancel_registry.remove(&cleanup_key);
    });

    let body = Body::from_stream(ndjson_stream(first, rx));
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

fn ndjson_stream(
    first: Option<RunEvent>,
    rx: tokio::sync::mpsc::UnboundedReceiver<RunEvent>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    stream::iter(first).chain(UnboundedReceiverStream::new(rx)).map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_default();
        line.push(b'\n');
        Ok(Bytes::from(line))
    })
}

// ---------------------------------------------------------------------------
// POST /api/stop
// ---------------------------------------------------------------------------

pub(crate) async fn stop_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StopRequest>,
) -> Response {
    let key = run_key(body.case_id, body.origin.unwrap_or(RunOrigin::Manual));
    if state.cancel_registry.cancel(&key) {
        (StatusCode::OK, Json(SuccessResponse::OK)).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new(format!("no active run for {key}"))))
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// GET /api/run-status[?caseId=]
// ---------------------------------------------------------------------------

pub(crate) async fn run_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunStatusQuery>,
) -> Response {
    match query.case_id {
        Some(raw) => match CaseId::parse(&raw) {
            Some(case_id) => case_status(&state, case_id).await,
            None => (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(format!("unknown caseId {raw}"))))
                .into_response(),
        },
        None => pipeline_status(&state).await,
    }
}

async fn case_status(state: &AppState, case_id: CaseId) -> Response {
    let is_running = state.admission.active_run(case_id).is_some();
    let run_state = match state.store.get_run_state(case_id).await {
        Ok(s) => s,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string())))
                .into_response()
        }
    };
    let can_resume = case_id.is_resume_capable()
        && run_state.as_ref().is_some_and(|s| s.status == RunStateStatus::Stopped);
    let state_label = if is_running {
        "running"
    } else if can_resume {
        "stopped"
    } else {
        "idle"
    };

    (
        StatusCode::OK,
        Json(CaseStatusResponse {
            case_id,
            is_running,
            can_resume,
            state: state_label.to_string(),
        }),
    )
        .into_response()
}

async fn pipeline_status(state: &AppState) -> Response {
    let run_id = match state.store.current_run_id().await {
        Ok(id) => id,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string())))
                .into_response()
        }
    };
    let run_state = match state.store.get_run_state(CaseId::Pipe).await {
        Ok(s) => s,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string())))
                .into_response()
        }
    };
    let can_resume = run_state.as_ref().is_some_and(|s| s.status == RunStateStatus::Stopped);

    let (done, failed, total) = match &run_id {
        Some(id) => match state.store.get_records_for_run(id).await {
            Ok(records) => {
                let done = records.iter().filter(|r| r.status.is_completed()).count() as i64;
                let failed = records
                    .iter()
                    .filter(|r| r.status == conveyor_core::ExtractStatus::Error)
                    .count() as i64;
                (done, failed, records.len() as i64)
            }
            Err(e) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string())))
                    .into_response()
            }
        },
        None => (0, 0, 0),
    };

    (StatusCode::OK, Json(PipelineStatusResponse { can_resume, run_id, done, failed, total }))
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /api/active-runs
// ---------------------------------------------------------------------------

pub(crate) async fn active_runs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(ActiveRunsResponse { active_runs: state.admission.active_runs() }))
}

// ---------------------------------------------------------------------------
// /api/schedules, /api/schedules/:id
// ---------------------------------------------------------------------------

pub(crate) async fn list_schedules(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_schedules().await {
        Ok(schedules) => (
            StatusCode::OK,
            Json(SchedulesResponse { schedules, timezones: conveyor_cron::TIMEZONE_ALLOWLIST }),
        )
            .into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

pub(crate) async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleRequest>,
) -> Response {
    if let Err(e) = conveyor_cron::validate(&body.cron, &body.timezone) {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response();
    }

    let schedule = Schedule {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: chrono::Utc::now(),
        brands: body.brands,
        purchasers: body.purchasers,
        cron: body.cron,
        timezone: body.timezone,
    };

    if let Err(e) = state.store.create_schedule(&schedule).await {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response();
    }

    if let Err(e) = state.cron.register(schedule.clone()) {
        tracing::error!(error = %e, schedule_id = %schedule.id, "validated schedule rejected at registration");
    }

    (StatusCode::OK, Json(schedule)).into_response()
}

pub(crate) async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ScheduleRequest>,
) -> Response {
    if let Err(e) = conveyor_cron::validate(&body.cron, &body.timezone) {
        return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response();
    }

    let result = state
        .store
        .update_schedule(&id, &body.brands, &body.purchasers, &body.cron, &body.timezone)
        .await;
    match result {
        Ok(()) => {}
        Err(conveyor_store::StoreError::NotFound(msg)) => {
            return (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg))).into_response()
        }
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response(),
    }

    let schedule = match state.store.get_schedule(&id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(ErrorResponse::new(format!("schedule {id}"))))
                .into_response()
        }
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string())))
                .into_response()
        }
    };

    if let Err(e) = state.cron.register(schedule.clone()) {
        tracing::error!(error = %e, schedule_id = %schedule.id, "validated schedule rejected at re-registration");
    }

    (StatusCode::OK, Json(schedule)).into_response()
}

pub(crate) async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_schedule(&id).await {
        Ok(()) => {
            state.cron.unregister(&id);
            (StatusCode::OK, Json(SuccessResponse::OK)).into_response()
        }
        Err(conveyor_store::StoreError::NotFound(msg)) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg))).into_response()
        }
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// GET /api/schedule-log
// ---------------------------------------------------------------------------

pub(crate) async fn schedule_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScheduleLogQuery>,
) -> Response {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(50);
    match state.store.list_audit(page, limit).await {
        Ok(entries) => (StatusCode::OK, Json(ScheduleLogResponse { entries, page, limit })).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// /api/email-config  (KV pass-through, spec.md §6)
// ---------------------------------------------------------------------------

const EMAIL_CONFIG_KEY: &str = "email_config";

pub(crate) async fn email_config_get(State(state): State<Arc<AppState>>) -> Response {
    match state.store.get_kv(EMAIL_CONFIG_KEY).await {
        Ok(Some(raw)) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
            }
        },
        Ok(None) => (StatusCode::OK, Json(serde_json::Value::Null)).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

pub(crate) async fn email_config_set(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let raw = match serde_json::to_string(&body) {
        Ok(raw) => raw,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    };
    match state.store.set_kv(EMAIL_CONFIG_KEY, &raw).await {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse::OK)).into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /api/clear-run-state
// ---------------------------------------------------------------------------

pub(crate) async fn clear_run_state(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ClearRunStateRequest>,
) -> Response {
    match state.store.clear_run_state(body.case_id).await {
        Ok(()) => (StatusCode::OK, Json(SuccessResponse::OK)).into_response(),
        Err(conveyor_store::StoreError::NotFound(msg)) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(msg))).into_response()
        }
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(e.to_string()))).into_response()
        }
    }
}
