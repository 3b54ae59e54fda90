use crate::api::{error_response, href, link, task_error_response};
use crate::state::AppState;
use crate::task_manager::{CreateTaskOptions, TaskDetails, UpdateTaskOptions};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};
use weir_common::types::{Dbrp, TaskStatus, TaskType};
use weir_dsl::vars::Vars;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateTaskBody {
    pub id: String,
    #[serde(rename = "type", default)]
    #[schema(value_type = Option<String>)]
    pub task_type: Option<TaskType>,
    #[serde(rename = "template-id", default)]
    pub template_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub dbrps: Vec<Dbrp>,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub vars: Vars,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateTaskBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    #[schema(value_type = Option<String>)]
    pub task_type: Option<TaskType>,
    #[serde(rename = "template-id", default)]
    pub template_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Vec<Object>>)]
    pub dbrps: Option<Vec<Dbrp>>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub vars: Option<Vars>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub status: Option<TaskStatus>,
}

pub(crate) fn task_json(details: &TaskDetails, fields: Option<&[String]>) -> serde_json::Value {
    let row = &details.row;
    let vars: serde_json::Value =
        serde_json::from_str(&row.vars).unwrap_or(serde_json::json!({}));
    let full = serde_json::json!({
        "link": link(href(&format!("/tasks/{}", row.id))),
        "id": row.id,
        "type": row.task_type,
        "dbrps": row.dbrps,
        "template-id": row.template_id.clone().unwrap_or_default(),
        "script": row.script,
        "vars": vars,
        "dot": details.dot,
        "status": row.status,
        "executing": details.executing,
        "error": details.error,
        "created": row.created_at,
        "modified": row.updated_at,
    });
    let Some(fields) = fields else {
        return full;
    };
    let mut out = serde_json::Map::new();
    out.insert("link".to_string(), full["link"].clone());
    out.insert("id".to_string(), full["id"].clone());
    for field in fields {
        if let Some(value) = full.get(field.as_str()) {
            out.insert(field.clone(), value.clone());
        }
    }
    serde_json::Value::Object(out)
}

/// Define a new task.
#[utoipa::path(
    post,
    path = "/weir/v1/tasks",
    tag = "Tasks",
    request_body = CreateTaskBody,
    responses(
        (status = 200, description = "task created"),
        (status = 400, description = "invalid task definition")
    )
)]
async fn create_task(State(state): State<AppState>, Json(body): Json<CreateTaskBody>) -> Response {
    let opts = CreateTaskOptions {
        id: body.id,
        task_type: body.task_type,
        template_id: body.template_id,
        dbrps: body.dbrps,
        script: body.script,
        vars: body.vars,
        status: body.status,
    };
    match state.tasks.create_task(opts).await {
        Ok(details) => Json(task_json(&details, None)).into_response(),
        Err(e) => task_error_response(e),
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListTasksParams {
    /// Glob pattern over task IDs.
    #[param(required = false)]
    pattern: Option<String>,
    /// Comma-separated projection of task fields.
    #[param(required = false)]
    fields: Option<String>,
    #[param(required = false)]
    offset: Option<usize>,
    #[param(required = false)]
    limit: Option<usize>,
}

/// List tasks in ID order.
#[utoipa::path(
    get,
    path = "/weir/v1/tasks",
    tag = "Tasks",
    params(ListTasksParams),
    responses((status = 200, description = "task list"))
)]
async fn list_tasks(State(state): State<AppState>, Query(params): Query<ListTasksParams>) -> Response {
    let pattern = params.pattern.unwrap_or_default();
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(100);
    let fields: Option<Vec<String>> = params.fields.map(|f| {
        f.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    });
    match state.tasks.list_tasks(&pattern, offset, limit) {
        Ok(tasks) => {
            let items: Vec<serde_json::Value> = tasks
                .iter()
                .map(|t| task_json(t, fields.as_deref()))
                .collect();
            Json(serde_json::json!({
                "link": link(href("/tasks")),
                "tasks": items,
            }))
            .into_response()
        }
        Err(e) => task_error_response(e),
    }
}

/// Fetch one task.
#[utoipa::path(
    get,
    path = "/weir/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "task ID")),
    responses(
        (status = 200, description = "task"),
        (status = 404, description = "no such task")
    )
)]
async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.get_task(&id) {
        Ok(details) => Json(task_json(&details, None)).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// Update a task: definition fields, rename, or status transition.
#[utoipa::path(
    patch,
    path = "/weir/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "task ID")),
    request_body = UpdateTaskBody,
    responses(
        (status = 200, description = "updated task"),
        (status = 400, description = "invalid update"),
        (status = 404, description = "no such task")
    )
)]
async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTaskBody>,
) -> Response {
    let opts = UpdateTaskOptions {
        new_id: body.id,
        task_type: body.task_type,
        template_id: body.template_id,
        dbrps: body.dbrps,
        script: body.script,
        vars: body.vars,
        status: body.status,
    };
    match state.tasks.update_task(&id, opts).await {
        Ok(details) => Json(task_json(&details, None)).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// Delete a task, releasing its runtime resources and anonymous topics.
#[utoipa::path(
    delete,
    path = "/weir/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "task ID")),
    responses((status = 204, description = "task deleted"))
)]
async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.delete_task(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => task_error_response(e),
    }
}

/// Latest document of a task's httpOut endpoint. The empty document before
/// the first emission.
#[utoipa::path(
    get,
    path = "/weir/v1/tasks/{id}/{endpoint}",
    tag = "Tasks",
    params(
        ("id" = String, Path, description = "task ID"),
        ("endpoint" = String, Path, description = "httpOut endpoint name")
    ),
    responses(
        (status = 200, description = "latest snapshot"),
        (status = 404, description = "unknown endpoint")
    )
)]
async fn task_http_out(
    State(state): State<AppState>,
    Path((id, endpoint)): Path<(String, String)>,
) -> Response {
    match state.runtime.http_out.get(&id, &endpoint) {
        Some(doc) => Json(doc).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("no endpoint {endpoint:?} for task {id:?}"),
        ),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_task, list_tasks))
        .routes(routes!(get_task, update_task, delete_task))
        .routes(routes!(task_http_out))
}
