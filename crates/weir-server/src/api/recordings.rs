use crate::api::{error_response, href, link, task_error_response};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};
use weir_storage::{RecordingRow, StorageError};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecordStreamBody {
    #[serde(default)]
    pub id: Option<String>,
    pub task: String,
    pub stop: DateTime<Utc>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecordBatchBody {
    #[serde(default)]
    pub id: Option<String>,
    pub task: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RecordQueryBody {
    #[serde(default)]
    pub id: Option<String>,
    pub query: String,
    /// stream | batch
    #[serde(rename = "type")]
    pub rec_type: String,
    #[serde(default)]
    pub cluster: Option<String>,
}

pub(crate) fn recording_json(rec: &RecordingRow) -> serde_json::Value {
    serde_json::json!({
        "link": link(href(&format!("/recordings/{}", rec.id))),
        "id": rec.id,
        "type": rec.rec_type,
        "size": rec.size,
        "date": rec.date,
        "error": rec.error,
        "status": rec.status,
        "progress": if rec.status == "running" { 0 } else { 1 },
    })
}

fn resolve_id(id: Option<String>) -> Result<String, Response> {
    let id = match id {
        Some(id) if !id.is_empty() => id,
        _ => weir_common::id::next_id(),
    };
    weir_common::id::validate_id("recording", &id)
        .map_err(|msg| error_response(StatusCode::BAD_REQUEST, &msg))?;
    Ok(id)
}

fn create_row(state: &AppState, id: &str, rec_type: &str, task_id: &str) -> Result<RecordingRow, Response> {
    let row = RecordingRow {
        id: id.to_string(),
        rec_type: rec_type.to_string(),
        task_id: task_id.to_string(),
        status: "running".to_string(),
        error: String::new(),
        size: 0,
        path: format!("{id}.rec"),
        date: Utc::now(),
    };
    state.store.create_recording(&row).map_err(|e| match e {
        StorageError::AlreadyExists { .. } => error_response(
            StatusCode::BAD_REQUEST,
            &format!("recording ID already exists: {id:?}"),
        ),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
    })?;
    Ok(row)
}

/// Start recording the live stream data of a task's dbrps.
#[utoipa::path(
    post,
    path = "/weir/v1/recordings/stream",
    tag = "Recordings",
    request_body = RecordStreamBody,
    responses(
        (status = 201, description = "recording started"),
        (status = 400, description = "invalid request"),
        (status = 404, description = "no such task")
    )
)]
async fn record_stream(
    State(state): State<AppState>,
    Json(body): Json<RecordStreamBody>,
) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (task, _graph) = match state.tasks.compiled_graph(&body.task) {
        Ok(v) => v,
        Err(e) => return task_error_response(e),
    };
    let row = match create_row(&state, &id, "stream", &task.id) {
        Ok(row) => row,
        Err(resp) => return resp,
    };
    if let Err(e) = state
        .replays
        .record_stream(&id, &task.id, task.dbrps.clone(), body.stop)
    {
        let _ = state.store.finish_recording(&id, "failed", &e.to_string(), 0);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    (StatusCode::CREATED, Json(recording_json(&row))).into_response()
}

/// Record the results of a batch task's queries over a historical window.
#[utoipa::path(
    post,
    path = "/weir/v1/recordings/batch",
    tag = "Recordings",
    request_body = RecordBatchBody,
    responses(
        (status = 201, description = "recording started"),
        (status = 400, description = "invalid request"),
        (status = 404, description = "no such task")
    )
)]
async fn record_batch(
    State(state): State<AppState>,
    Json(body): Json<RecordBatchBody>,
) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let (task, graph) = match state.tasks.compiled_graph(&body.task) {
        Ok(v) => v,
        Err(e) => return task_error_response(e),
    };
    let row = match create_row(&state, &id, "batch", &task.id) {
        Ok(row) => row,
        Err(resp) => return resp,
    };
    if let Err(e) = state
        .replays
        .record_batch(&id, &task.id, graph, body.start, body.stop)
    {
        let _ = state.store.finish_recording(&id, "failed", &e.to_string(), 0);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    (StatusCode::CREATED, Json(recording_json(&row))).into_response()
}

/// Record the result of an arbitrary query.
#[utoipa::path(
    post,
    path = "/weir/v1/recordings/query",
    tag = "Recordings",
    request_body = RecordQueryBody,
    responses(
        (status = 201, description = "recording started"),
        (status = 400, description = "invalid request")
    )
)]
async fn record_query(
    State(state): State<AppState>,
    Json(body): Json<RecordQueryBody>,
) -> Response {
    let id = match resolve_id(body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.rec_type != "stream" && body.rec_type != "batch" {
        return error_response(
            StatusCode::BAD_REQUEST,
            "recording type must be \"stream\" or \"batch\"",
        );
    }
    let row = match create_row(&state, &id, &body.rec_type, "") {
        Ok(row) => row,
        Err(resp) => return resp,
    };
    if let Err(e) = state
        .replays
        .record_query(&id, &body.query, &body.rec_type, body.cluster)
    {
        let _ = state.store.finish_recording(&id, "failed", &e.to_string(), 0);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
    }
    (StatusCode::CREATED, Json(recording_json(&row))).into_response()
}

/// List recordings.
#[utoipa::path(
    get,
    path = "/weir/v1/recordings",
    tag = "Recordings",
    responses((status = 200, description = "recording list"))
)]
async fn list_recordings(State(state): State<AppState>) -> Response {
    match state.store.list_recordings() {
        Ok(rows) => {
            let items: Vec<serde_json::Value> = rows.iter().map(recording_json).collect();
            Json(serde_json::json!({
                "link": link(href("/recordings")),
                "recordings": items,
            }))
            .into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Fetch one recording.
#[utoipa::path(
    get,
    path = "/weir/v1/recordings/{id}",
    tag = "Recordings",
    params(("id" = String, Path, description = "recording ID")),
    responses(
        (status = 200, description = "recording"),
        (status = 404, description = "no such recording")
    )
)]
async fn get_recording(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.get_recording(&id) {
        Ok(rec) => Json(recording_json(&rec)).into_response(),
        Err(StorageError::NotFound { .. }) => error_response(
            StatusCode::NOT_FOUND,
            &format!("no recording exists with ID {id:?}"),
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Delete a recording and its artifact, aborting it if still running.
#[utoipa::path(
    delete,
    path = "/weir/v1/recordings/{id}",
    tag = "Recordings",
    params(("id" = String, Path, description = "recording ID")),
    responses((status = 204, description = "recording deleted"))
)]
async fn delete_recording(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.replays.abort(&id);
    let _ = std::fs::remove_file(state.replays.artifact_path(&id));
    match state.store.delete_recording(&id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(record_stream))
        .routes(routes!(record_batch))
        .routes(routes!(record_query))
        .routes(routes!(list_recordings))
        .routes(routes!(get_recording, delete_recording))
}
