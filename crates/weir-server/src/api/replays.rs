use crate::api::{error_response, href, link, task_error_response};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};
use weir_replay::service::{Clock, ReplaySpec};
use weir_storage::{RecordingRow, ReplayRow, StorageError};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateReplayBody {
    #[serde(default)]
    pub id: Option<String>,
    pub task: String,
    pub recording: String,
    #[serde(default = "default_clock")]
    pub clock: String,
    #[serde(rename = "recording-time", default)]
    pub recording_time: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReplayBatchBody {
    #[serde(default)]
    pub id: Option<String>,
    pub task: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    #[serde(default = "default_clock")]
    pub clock: String,
    #[serde(rename = "recording-time", default)]
    pub recording_time: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ReplayQueryBody {
    #[serde(default)]
    pub id: Option<String>,
    pub task: String,
    pub query: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default = "default_clock")]
    pub clock: String,
    #[serde(rename = "recording-time", default)]
    pub recording_time: bool,
}

fn default_clock() -> String {
    "fast".to_string()
}

fn replay_json(replay: &ReplayRow) -> serde_json::Value {
    serde_json::json!({
        "link": link(href(&format!("/replays/{}", replay.id))),
        "id": replay.id,
        "task": replay.task_id,
        "recording": replay.recording_id,
        "clock": replay.clock,
        "recording-time": replay.recording_time,
        "status": replay.status,
        "progress": if replay.status == "running" { 0 } else { 1 },
        "error": replay.error,
        "date": replay.date,
    })
}

fn resolve_id(id: Option<String>) -> Result<String, Response> {
    let id = match id {
        Some(id) if !id.is_empty() => id,
        _ => weir_common::id::next_id(),
    };
    weir_common::id::validate_id("replay", &id)
        .map_err(|msg| error_response(StatusCode::BAD_REQUEST, &msg))?;
    Ok(id)
}

async fn start_replay(
    state: &AppState,
    replay_id: &str,
    recording_id: &str,
    task: &str,
    clock: &str,
    recording_time: bool,
) -> Result<ReplayRow, Response> {
    let Some(clock_policy) = Clock::parse(clock) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            &format!("invalid clock {clock:?}"),
        ));
    };
    let (row, graph) = state
        .tasks
        .compiled_graph(task)
        .map_err(task_error_response)?;
    match state.store.get_recording(recording_id) {
        Ok(rec) if rec.status == "finished" => {}
        Ok(_) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                &format!("recording {recording_id:?} is not finished"),
            ))
        }
        Err(StorageError::NotFound { .. }) => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                &format!("no recording exists with ID {recording_id:?}"),
            ))
        }
        Err(e) => return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())),
    }
    let replay = ReplayRow {
        id: replay_id.to_string(),
        task_id: row.id.clone(),
        recording_id: recording_id.to_string(),
        clock: clock.to_string(),
        recording_time,
        status: "running".to_string(),
        error: String::new(),
        date: Utc::now(),
    };
    state.store.create_replay(&replay).map_err(|e| match e {
        StorageError::AlreadyExists { .. } => error_response(
            StatusCode::BAD_REQUEST,
            &format!("replay ID already exists: {replay_id:?}"),
        ),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
    })?;
    if let Err(e) = state
        .replays
        .replay(
            replay_id,
            recording_id,
            ReplaySpec {
                task_id: row.id.clone(),
                task_type: row.task_type,
                dbrps: row.dbrps.clone(),
                graph,
            },
            clock_policy,
            recording_time,
        )
        .await
    {
        let _ = state.store.finish_replay(replay_id, "failed", &e.to_string());
        return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()));
    }
    Ok(replay)
}

/// Replay a finished recording against a task.
#[utoipa::path(
    post,
    path = "/weir/v1/replays",
    tag = "Replays",
    request_body = CreateReplayBody,
    responses(
        (status = 201, description = "replay started"),
        (status = 400, description = "invalid request"),
        (status = 404, description = "no such task or recording")
    )
)]
async fn create_replay(
    State(state): State<AppState>,
    Json(body): Json<CreateReplayBody>,
) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match start_replay(
        &state,
        &id,
        &body.recording,
        &body.task,
        &body.clock,
        body.recording_time,
    )
    .await
    {
        Ok(replay) => (StatusCode::CREATED, Json(replay_json(&replay))).into_response(),
        Err(resp) => resp,
    }
}

async fn wait_for_recording(state: &AppState, id: &str) -> Result<(), Response> {
    for _ in 0..600 {
        match state.store.get_recording(id) {
            Ok(rec) if rec.status == "finished" => return Ok(()),
            Ok(rec) if rec.status == "failed" => {
                return Err(error_response(StatusCode::BAD_REQUEST, &rec.error))
            }
            Ok(_) => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
            Err(e) => {
                return Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &e.to_string(),
                ))
            }
        }
    }
    Err(error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "timed out capturing data for replay",
    ))
}

/// Record a batch window and immediately replay it, without keeping a
/// recording record.
#[utoipa::path(
    post,
    path = "/weir/v1/replays/batch",
    tag = "Replays",
    request_body = ReplayBatchBody,
    responses(
        (status = 201, description = "replay started"),
        (status = 400, description = "invalid request")
    )
)]
async fn replay_batch(State(state): State<AppState>, Json(body): Json<ReplayBatchBody>) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (task, graph) = match state.tasks.compiled_graph(&body.task) {
        Ok(v) => v,
        Err(e) => return task_error_response(e),
    };
    let recording_id = format!("replay-{id}");
    if let Err(e) = state.store.create_recording(&RecordingRow {
        id: recording_id.clone(),
        rec_type: "batch".to_string(),
        task_id: task.id.clone(),
        status: "running".to_string(),
        error: String::new(),
        size: 0,
        path: format!("{recording_id}.rec"),
        date: Utc::now(),
    }) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    if let Err(e) = state
        .replays
        .record_batch(&recording_id, &task.id, graph, body.start, body.stop)
    {
        let _ = state.store.delete_recording(&recording_id);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    if let Err(resp) = wait_for_recording(&state, &recording_id).await {
        let _ = state.store.delete_recording(&recording_id);
        return resp;
    }
    let result = start_replay(
        &state,
        &id,
        &recording_id,
        &body.task,
        &body.clock,
        body.recording_time,
    )
    .await;
    let _ = state.store.delete_recording(&recording_id);
    match result {
        Ok(replay) => (StatusCode::CREATED, Json(replay_json(&replay))).into_response(),
        Err(resp) => resp,
    }
}

/// Run a query and immediately replay its result against a task.
#[utoipa::path(
    post,
    path = "/weir/v1/replays/query",
    tag = "Replays",
    request_body = ReplayQueryBody,
    responses(
        (status = 201, description = "replay started"),
        (status = 400, description = "invalid request")
    )
)]
async fn replay_query(State(state): State<AppState>, Json(body): Json<ReplayQueryBody>) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (task, graph) = match state.tasks.compiled_graph(&body.task) {
        Ok(v) => v,
        Err(e) => return task_error_response(e),
    };
    let rec_type = match graph.task_type {
        weir_common::types::TaskType::Stream => "stream",
        weir_common::types::TaskType::Batch => "batch",
    };
    let recording_id = format!("replay-{id}");
    if let Err(e) = state.store.create_recording(&RecordingRow {
        id: recording_id.clone(),
        rec_type: rec_type.to_string(),
        task_id: task.id.clone(),
        status: "running".to_string(),
        error: String::new(),
        size: 0,
        path: format!("{recording_id}.rec"),
        date: Utc::now(),
    }) {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    if let Err(e) = state
        .replays
        .record_query(&recording_id, &body.query, rec_type, body.cluster)
    {
        let _ = state.store.delete_recording(&recording_id);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    if let Err(resp) = wait_for_recording(&state, &recording_id).await {
        let _ = state.store.delete_recording(&recording_id);
        return resp;
    }
    let result = start_replay(
        &state,
        &id,
        &recording_id,
        &body.task,
        &body.clock,
        body.recording_time,
    )
    .await;
    let _ = state.store.delete_recording(&recording_id);
    match result {
        Ok(replay) => (StatusCode::CREATED, Json(replay_json(&replay))).into_response(),
        Err(resp) => resp,
    }
}

/// List replays.
#[utoipa::path(
    get,
    path = "/weir/v1/replays",
    tag = "Replays",
    responses((status = 200, description = "replay list"))
)]
async fn list_replays(State(state): State<AppState>) -> Response {
    match state.store.list_replays() {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows.iter().map(replay_json).collect();
            Json(serde_json::json!({
                "link": link(href("/replays")),
                "replays": items,
            }))
            .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Fetch one replay.
#[utoipa::path(
    get,
    path = "/weir/v1/replays/{id}",
    tag = "Replays",
    params(("id" = String, Path, description = "replay ID")),
    responses(
        (status = 200, description = "replay"),
        (status = 404, description = "no such replay")
    )
)]
async fn get_replay(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_replay(&id) {
        Ok(replay) => Json(replay_json(&replay)).into_response(),
        Err(StorageError::NotFound { .. }) => error_response(
            StatusCode::NOT_FOUND,
            &format!("no replay exists with ID {id:?}"),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Delete a replay, stopping it if still running.
#[utoipa::path(
    delete,
    path = "/weir/v1/replays/{id}",
    tag = "Replays",
    params(("id" = String, Path, description = "replay ID")),
    responses((status = 204, description = "replay deleted"))
)]
async fn delete_replay(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.replays.abort(&id);
    match state.store.delete_replay(&id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_replay, list_replays))
        .routes(routes!(replay_batch))
        .routes(routes!(replay_query))
        .routes(routes!(get_replay, delete_replay))
}
