//! Axum router and all HTTP handlers for mlq-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Tests compose the bare router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use mlq_config::ReconciliationConfig;
use mlq_runtime::{EngineError, ReconciliationResponse};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    api_types::{ErrorResponse, HealthResponse, StopResponse},
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/reconcile/run", post(reconcile_all))
        .route(
            "/v1/reconcile/organizations/:org_id",
            post(reconcile_organization),
        )
        .route("/v1/reconcile/accounts/:account_id", post(reconcile_account))
        .route(
            "/v1/reconcile/questions/:question_id",
            post(reconcile_question),
        )
        .route("/v1/reconcile/stop", post(reconcile_stop))
        .route("/v1/reconcile/stats", get(reconcile_stats))
        .route(
            "/v1/reconcile/config",
            get(get_reconcile_config).put(put_reconcile_config),
        )
        .with_state(state)
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

fn parse_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error(StatusCode::BAD_REQUEST, format!("invalid id '{raw}'")))
}

fn engine_error(e: EngineError) -> Response {
    match e {
        EngineError::QuestionNotFound(_) => error(StatusCode::NOT_FOUND, e.to_string()),
        EngineError::InvalidConfig(_) => error(StatusCode::BAD_REQUEST, e.to_string()),
        EngineError::Storage(_) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn run_response(st: &AppState, res: Result<ReconciliationResponse, EngineError>) -> Response {
    match res {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => {
            if matches!(e, EngineError::Storage(_)) {
                st.log("ERROR", format!("reconciliation aborted: {e}"));
            }
            engine_error(e)
        }
    }
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile/...
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile_all(State(st): State<Arc<AppState>>) -> Response {
    info!("reconcile/run");
    let res = st.engine.reconcile_all().await;
    run_response(&st, res)
}

pub(crate) async fn reconcile_organization(
    State(st): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    let org_id = match parse_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    info!(organization_id = %org_id, "reconcile/organization");
    let res = st.engine.reconcile_organization(org_id).await;
    run_response(&st, res)
}

pub(crate) async fn reconcile_account(
    State(st): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    let account_id = match parse_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    info!(account_id = %account_id, "reconcile/account");
    let res = st.engine.reconcile_account(account_id).await;
    run_response(&st, res)
}

pub(crate) async fn reconcile_question(
    State(st): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Response {
    let question_id = match parse_id(&raw) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    info!(question_id = %question_id, "reconcile/question");
    let res = st.engine.reconcile_question(question_id).await;
    run_response(&st, res)
}

// ---------------------------------------------------------------------------
// POST /v1/reconcile/stop
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile_stop(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let active_runs = st.engine.stats().snapshot().await.active_runs.len();
    st.engine.stop().await;

    info!(active_runs, "reconcile/stop");
    st.log("WARN", format!("reconciliation stop requested ({active_runs} active)"));

    (
        StatusCode::OK,
        Json(StopResponse {
            stopped: true,
            active_runs,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/reconcile/stats
// ---------------------------------------------------------------------------

pub(crate) async fn reconcile_stats(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(st.engine.get_reconciliation_system_stats().await),
    )
}

// ---------------------------------------------------------------------------
// GET / PUT /v1/reconcile/config
// ---------------------------------------------------------------------------

pub(crate) async fn get_reconcile_config(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.engine.reconciliation_config().await))
}

pub(crate) async fn put_reconcile_config(
    State(st): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let cfg: ReconciliationConfig = match serde_json::from_value(body) {
        Ok(c) => c,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("CONFIG_INVALID: {e}")),
    };

    if let Err(e) = st.engine.set_reconciliation_config(cfg).await {
        warn!(error = %e, "reconcile/config rejected");
        return engine_error(e);
    }

    info!("reconcile/config replaced");
    st.log("INFO", "reconciliation config replaced");
    (StatusCode::OK, Json(st.engine.reconciliation_config().await)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::QuestionUpdate(_) => "question_update",
                    BusMsg::RunFinished(_) => "run_finished",
                    BusMsg::LogLine { .. } => "log",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
