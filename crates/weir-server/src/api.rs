pub mod alerts;
pub mod configs;
pub mod recordings;
pub mod replays;
pub mod tasks;
pub mod templates;

use crate::ingress::{parse_points, Precision};
use crate::state::{version, AppState, BASE_PATH};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Error body shared by every endpoint: `{"error": "..."}`.
pub fn error_response(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "error": msg }))).into_response()
}

pub fn link(href: impl Into<String>) -> serde_json::Value {
    serde_json::json!({"rel": "self", "href": href.into()})
}

pub fn task_error_response(e: crate::task_manager::TaskError) -> Response {
    use crate::task_manager::TaskError;
    match &e {
        TaskError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        TaskError::NotFound(msg) => error_response(StatusCode::NOT_FOUND, msg),
        TaskError::Conflict(msg) => error_response(StatusCode::CONFLICT, msg),
        TaskError::Internal(msg) => error_response(StatusCode::INTERNAL_SERVER_ERROR, msg),
    }
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/weir/v1/ping",
    tag = "Server",
    responses((status = 204, description = "server is alive"))
)]
async fn ping() -> Response {
    (
        StatusCode::NO_CONTENT,
        [("X-Weir-Version", version().to_string())],
    )
        .into_response()
}

/// Runtime statistics: task counts, uptime, version.
#[utoipa::path(
    get,
    path = "/weir/v1/debug/vars",
    tag = "Server",
    responses((status = 200, description = "runtime statistics"))
)]
async fn debug_vars(State(state): State<AppState>) -> Response {
    let uptime = (chrono::Utc::now() - state.start_time).num_seconds();
    Json(serde_json::json!({
        "version": version(),
        "uptime": uptime,
        "num_tasks": state.tasks.num_tasks(),
        "num_enabled_tasks": state.tasks.num_enabled_tasks(),
        "num_subscriptions": state.runtime.executing_count(),
    }))
    .into_response()
}

/// Profiling index. Profiling itself is delegated to external tooling.
#[utoipa::path(
    get,
    path = "/weir/v1/debug/pprof",
    tag = "Server",
    responses((status = 200, description = "profile index"))
)]
async fn debug_pprof() -> Response {
    (
        StatusCode::OK,
        "profiles are collected with external tooling; see the operations guide\n",
    )
        .into_response()
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub(crate) struct WriteParams {
    /// Target database (required).
    #[param(required = true)]
    db: Option<String>,
    /// Target retention policy; the configured default applies when unset.
    #[param(required = false)]
    rp: Option<String>,
    /// Timestamp precision: s, ms, us, or ns (default).
    #[param(required = false)]
    precision: Option<String>,
}

/// Write line-format points into the subscription fan-out.
#[utoipa::path(
    post,
    path = "/weir/v1/write",
    tag = "Write",
    params(WriteParams),
    responses(
        (status = 204, description = "points accepted"),
        (status = 400, description = "invalid request")
    )
)]
async fn write(
    State(state): State<AppState>,
    Query(params): Query<WriteParams>,
    body: String,
) -> Response {
    let Some(db) = params.db.filter(|d| !d.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "database is required");
    };
    let rp = params
        .rp
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| state.config.default_retention_policy.clone());
    if rp.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "retention policy is required (no default retention policy is configured)",
        );
    }
    let Some(precision) = Precision::parse(params.precision.as_deref().unwrap_or("")) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid precision");
    };
    let points = match parse_points(&body, precision, chrono::Utc::now()) {
        Ok(points) => points,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state.runtime.write_points(&db, &rp, &points).await;
    StatusCode::NO_CONTENT.into_response()
}

/// Routes that stay reachable without credentials.
pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(ping))
}

/// Operational routes, guarded by auth when it is enabled.
pub fn server_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(debug_vars))
        .routes(routes!(debug_pprof))
        .routes(routes!(write))
}

/// Compatibility alias for clients writing to the bare `/write` path.
pub(crate) async fn write_alias(
    state: State<AppState>,
    params: Query<WriteParams>,
    body: String,
) -> Response {
    write(state, params, body).await
}

pub fn href(path: &str) -> String {
    format!("{BASE_PATH}{path}")
}
