use crate::api::{href, link, task_error_response};
use crate::state::AppState;
use crate::task_manager::TemplateDetails;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};
use weir_common::types::TaskType;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateTemplateBody {
    pub id: String,
    #[serde(rename = "type")]
    #[schema(value_type = String)]
    pub task_type: TaskType,
    pub script: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateTemplateBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    #[schema(value_type = Option<String>)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub script: Option<String>,
}

fn template_json(details: &TemplateDetails) -> serde_json::Value {
    let row = &details.row;
    serde_json::json!({
        "link": link(href(&format!("/templates/{}", row.id))),
        "id": row.id,
        "type": row.task_type,
        "script": row.script,
        "vars": details.vars,
        "dot": details.dot,
        "error": "",
        "created": row.created_at,
        "modified": row.updated_at,
    })
}

/// Define a new template.
#[utoipa::path(
    post,
    path = "/weir/v1/templates",
    tag = "Templates",
    request_body = CreateTemplateBody,
    responses(
        (status = 200, description = "template created"),
        (status = 400, description = "invalid template")
    )
)]
async fn create_template(
    State(state): State<AppState>,
    Json(body): Json<CreateTemplateBody>,
) -> Response {
    match state
        .tasks
        .create_template(&body.id, body.task_type, &body.script)
    {
        Ok(details) => Json(template_json(&details)).into_response(),
        Err(e) => task_error_response(e),
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListTemplatesParams {
    #[param(required = false)]
    pattern: Option<String>,
    #[param(required = false)]
    offset: Option<usize>,
    #[param(required = false)]
    limit: Option<usize>,
}

/// List templates in ID order.
#[utoipa::path(
    get,
    path = "/weir/v1/templates",
    tag = "Templates",
    params(ListTemplatesParams),
    responses((status = 200, description = "template list"))
)]
async fn list_templates(
    State(state): State<AppState>,
    Query(params): Query<ListTemplatesParams>,
) -> Response {
    let pattern = params.pattern.unwrap_or_default();
    match state.tasks.list_templates(
        &pattern,
        params.offset.unwrap_or(0),
        params.limit.unwrap_or(100),
    ) {
        Ok(templates) => {
            let items: Vec<serde_json::Value> = templates.iter().map(template_json).collect();
            Json(serde_json::json!({
                "link": link(href("/templates")),
                "templates": items,
            }))
            .into_response()
        }
        Err(e) => task_error_response(e),
    }
}

/// Fetch one template.
#[utoipa::path(
    get,
    path = "/weir/v1/templates/{id}",
    tag = "Templates",
    params(("id" = String, Path, description = "template ID")),
    responses(
        (status = 200, description = "template"),
        (status = 404, description = "no such template")
    )
)]
async fn get_template(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.get_template(&id) {
        Ok(details) => Json(template_json(&details)).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// Update a template. A script change re-materializes every linked task or
/// fails atomically, leaving all records untouched.
#[utoipa::path(
    patch,
    path = "/weir/v1/templates/{id}",
    tag = "Templates",
    params(("id" = String, Path, description = "template ID")),
    request_body = UpdateTemplateBody,
    responses(
        (status = 200, description = "updated template"),
        (status = 400, description = "invalid update"),
        (status = 404, description = "no such template")
    )
)]
async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTemplateBody>,
) -> Response {
    match state
        .tasks
        .update_template(&id, body.id.as_deref(), body.task_type, body.script.as_deref())
        .await
    {
        Ok(details) => Json(template_json(&details)).into_response(),
        Err(e) => task_error_response(e),
    }
}

/// Delete a template. Fails while tasks still reference it.
#[utoipa::path(
    delete,
    path = "/weir/v1/templates/{id}",
    tag = "Templates",
    params(("id" = String, Path, description = "template ID")),
    responses((status = 204, description = "template deleted"))
)]
async fn delete_template(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.delete_template(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => task_error_response(e),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(create_template, list_templates))
        .routes(routes!(get_template, update_template, delete_template))
}
