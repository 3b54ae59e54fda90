use crate::api::error_response;
use crate::state::{AppState, BASE_PREVIEW_PATH};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use utoipa_axum::{router::OpenApiRouter, routes};
use weir_alert::actions::redact_options;
use weir_alert::patch::{apply, PatchOp};
use weir_alert::{HandlerDef, HandlerRegistry};
use weir_common::types::{EventState, Level};
use weir_storage::HandlerRow;

fn preview_link(path: &str) -> serde_json::Value {
    serde_json::json!({"rel": "self", "href": format!("{BASE_PREVIEW_PATH}{path}")})
}

fn topic_missing(topic: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        &format!("topic {topic:?} does not exist"),
    )
}

fn event_json(topic: &str, id: &str, state: &EventState) -> serde_json::Value {
    serde_json::json!({
        "link": preview_link(&format!("/alerts/topics/{topic}/events/{id}")),
        "id": id,
        "state": {
            "message": state.message,
            "details": state.details,
            "time": state.time,
            "duration": state.duration,
            "level": state.level,
        },
    })
}

fn handler_json(def: &HandlerDef) -> serde_json::Value {
    let actions: Vec<serde_json::Value> = def
        .actions
        .iter()
        .map(|a| {
            let (options, redacted) = redact_options(&a.kind, &a.options);
            if redacted.is_empty() {
                serde_json::json!({"kind": a.kind, "options": options})
            } else {
                serde_json::json!({"kind": a.kind, "options": options, "redacted": redacted})
            }
        })
        .collect();
    serde_json::json!({
        "link": preview_link(&format!("/alerts/handlers/{}", def.id)),
        "id": def.id,
        "topics": def.topics,
        "actions": actions,
    })
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct TopicsParams {
    #[param(required = false)]
    pattern: Option<String>,
    /// Only topics at or above this level.
    #[param(required = false, rename = "min-level")]
    #[serde(rename = "min-level")]
    min_level: Option<String>,
}

fn parse_min_level(raw: &Option<String>) -> Result<Level, Response> {
    match raw {
        None => Ok(Level::Ok),
        Some(s) => s
            .parse()
            .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, &e)),
    }
}

/// List alert topics.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/topics",
    tag = "Alerts",
    params(TopicsParams),
    responses((status = 200, description = "topic list"))
)]
async fn list_topics(State(state): State<AppState>, Query(params): Query<TopicsParams>) -> Response {
    let min_level = match parse_min_level(&params.min_level) {
        Ok(l) => l,
        Err(resp) => return resp,
    };
    let pattern = params.pattern.unwrap_or_default();
    let topics: Vec<serde_json::Value> = state
        .topics
        .list(&pattern)
        .into_iter()
        .filter_map(|id| {
            let level = state.topics.highest_level(&id)?;
            if level < min_level {
                return None;
            }
            Some(serde_json::json!({
                "link": preview_link(&format!("/alerts/topics/{id}")),
                "id": id,
                "level": level,
            }))
        })
        .collect();
    Json(serde_json::json!({
        "link": preview_link("/alerts/topics"),
        "topics": topics,
    }))
    .into_response()
}

/// Fetch one topic.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/topics/{topic}",
    tag = "Alerts",
    params(("topic" = String, Path, description = "topic name")),
    responses(
        (status = 200, description = "topic"),
        (status = 404, description = "no such topic")
    )
)]
async fn get_topic(State(state): State<AppState>, Path(topic): Path<String>) -> Response {
    let Some(level) = state.topics.highest_level(&topic) else {
        return topic_missing(&topic);
    };
    Json(serde_json::json!({
        "link": preview_link(&format!("/alerts/topics/{topic}")),
        "id": topic,
        "level": level,
        "events-link": preview_link(&format!("/alerts/topics/{topic}/events")),
        "handlers-link": preview_link(&format!("/alerts/topics/{topic}/handlers")),
    }))
    .into_response()
}

/// Delete a topic, purging its persisted event state.
#[utoipa::path(
    delete,
    path = "/weir/v1preview/alerts/topics/{topic}",
    tag = "Alerts",
    params(("topic" = String, Path, description = "topic name")),
    responses((status = 204, description = "topic deleted"))
)]
async fn delete_topic(State(state): State<AppState>, Path(topic): Path<String>) -> Response {
    match state.topics.delete(&topic) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct EventsParams {
    #[param(required = false, rename = "min-level")]
    #[serde(rename = "min-level")]
    min_level: Option<String>,
}

/// List the current events of a topic.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/topics/{topic}/events",
    tag = "Alerts",
    params(
        ("topic" = String, Path, description = "topic name"),
        EventsParams
    ),
    responses(
        (status = 200, description = "event list"),
        (status = 404, description = "no such topic")
    )
)]
async fn list_topic_events(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(params): Query<EventsParams>,
) -> Response {
    let min_level = match parse_min_level(&params.min_level) {
        Ok(l) => l,
        Err(resp) => return resp,
    };
    let Some(events) = state.topics.events(&topic, min_level) else {
        return topic_missing(&topic);
    };
    let items: Vec<serde_json::Value> = events
        .iter()
        .map(|(id, state)| event_json(&topic, id, state))
        .collect();
    Json(serde_json::json!({
        "link": preview_link(&format!("/alerts/topics/{topic}/events")),
        "topic": topic,
        "events": items,
    }))
    .into_response()
}

/// Fetch one event of a topic.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/topics/{topic}/events/{event}",
    tag = "Alerts",
    params(
        ("topic" = String, Path, description = "topic name"),
        ("event" = String, Path, description = "event ID")
    ),
    responses(
        (status = 200, description = "event"),
        (status = 404, description = "no such topic or event")
    )
)]
async fn get_topic_event(
    State(state): State<AppState>,
    Path((topic, event)): Path<(String, String)>,
) -> Response {
    if !state.topics.exists(&topic) {
        return topic_missing(&topic);
    }
    match state.topics.event(&topic, &event) {
        Some(event_state) => Json(event_json(&topic, &event, &event_state)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("event {event:?} does not exist in topic {topic:?}"),
        ),
    }
}

/// List the handlers subscribed to a topic.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/topics/{topic}/handlers",
    tag = "Alerts",
    params(("topic" = String, Path, description = "topic name")),
    responses(
        (status = 200, description = "handler list"),
        (status = 404, description = "no such topic")
    )
)]
async fn list_topic_handlers(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Response {
    if !state.topics.exists(&topic) {
        return topic_missing(&topic);
    }
    let handlers: Vec<serde_json::Value> = state
        .handlers
        .for_topic(&topic)
        .iter()
        .map(handler_json)
        .collect();
    Json(serde_json::json!({
        "link": preview_link(&format!("/alerts/topics/{topic}/handlers")),
        "topic": topic,
        "handlers": handlers,
    }))
    .into_response()
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct HandlerBody {
    pub id: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub actions: Vec<weir_alert::HandlerAction>,
}

fn persist_handler(
    state: &AppState,
    old_id: Option<&str>,
    def: &HandlerDef,
) -> Result<(), Response> {
    def.validate()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e.to_string()))?;
    let row = HandlerRow {
        id: def.id.clone(),
        topics: serde_json::to_string(&def.topics).unwrap_or_else(|_| "[]".to_string()),
        actions: serde_json::to_string(&def.actions).unwrap_or_else(|_| "[]".to_string()),
    };
    let result = match old_id {
        None => state.store.create_handler(&row),
        Some(old) => state.store.replace_handler(old, &row),
    };
    result.map_err(|e| match e {
        weir_storage::StorageError::AlreadyExists { .. } => error_response(
            StatusCode::BAD_REQUEST,
            &format!("handler {:?} already exists", def.id),
        ),
        weir_storage::StorageError::NotFound { .. } => error_response(
            StatusCode::NOT_FOUND,
            &format!("no handler exists with ID {:?}", old_id.unwrap_or_default()),
        ),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
    })?;
    if let Some(old) = old_id {
        state.handlers.remove(old);
    }
    state.handlers.upsert(def.clone());
    // Topics are created on first reference.
    for topic in &def.topics {
        if let Err(e) = state.topics.register(topic) {
            tracing::error!(topic = %topic, error = %e, "failed to register handler topic");
        }
    }
    Ok(())
}

/// Create a handler.
#[utoipa::path(
    post,
    path = "/weir/v1preview/alerts/handlers",
    tag = "Alerts",
    request_body = HandlerBody,
    responses(
        (status = 200, description = "handler created"),
        (status = 400, description = "invalid handler")
    )
)]
async fn create_handler(State(state): State<AppState>, Json(body): Json<HandlerBody>) -> Response {
    if let Err(msg) = weir_common::id::validate_id("handler", &body.id) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let def = HandlerDef {
        id: body.id,
        topics: body.topics,
        actions: body.actions,
    };
    if let Err(resp) = persist_handler(&state, None, &def) {
        return resp;
    }
    Json(handler_json(&def)).into_response()
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ListHandlersParams {
    #[param(required = false)]
    pattern: Option<String>,
}

/// List handlers.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/handlers",
    tag = "Alerts",
    params(ListHandlersParams),
    responses((status = 200, description = "handler list"))
)]
async fn list_handlers(
    State(state): State<AppState>,
    Query(params): Query<ListHandlersParams>,
) -> Response {
    let pattern = params.pattern.unwrap_or_default();
    let handlers: Vec<serde_json::Value> = state
        .handlers
        .list(&pattern)
        .iter()
        .map(handler_json)
        .collect();
    Json(serde_json::json!({
        "link": preview_link("/alerts/handlers"),
        "handlers": handlers,
    }))
    .into_response()
}

/// Fetch one handler.
#[utoipa::path(
    get,
    path = "/weir/v1preview/alerts/handlers/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "handler ID")),
    responses(
        (status = 200, description = "handler"),
        (status = 404, description = "no such handler")
    )
)]
async fn get_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.handlers.get(&id) {
        Some(def) => Json(handler_json(&def)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("no handler exists with ID {id:?}"),
        ),
    }
}

/// Patch a handler with JSON-Patch operations.
#[utoipa::path(
    patch,
    path = "/weir/v1preview/alerts/handlers/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "handler ID")),
    responses(
        (status = 200, description = "patched handler"),
        (status = 400, description = "invalid patch"),
        (status = 404, description = "no such handler")
    )
)]
async fn patch_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<Vec<PatchOp>>,
) -> Response {
    let Some(def) = state.handlers.get(&id) else {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("no handler exists with ID {id:?}"),
        );
    };
    let mut doc = match serde_json::to_value(&def) {
        Ok(doc) => doc,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };
    if let Err(e) = apply(&mut doc, &patch) {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }
    let patched: HandlerDef = match serde_json::from_value(doc) {
        Ok(def) => def,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("patch produced an invalid handler: {e}"),
            )
        }
    };
    if let Err(resp) = persist_handler(&state, Some(&id), &patched) {
        return resp;
    }
    Json(handler_json(&patched)).into_response()
}

/// Replace a handler, possibly moving it to a new ID.
#[utoipa::path(
    put,
    path = "/weir/v1preview/alerts/handlers/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "handler ID")),
    request_body = HandlerBody,
    responses(
        (status = 200, description = "replaced handler"),
        (status = 400, description = "invalid handler"),
        (status = 404, description = "no such handler")
    )
)]
async fn put_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<HandlerBody>,
) -> Response {
    if let Err(msg) = weir_common::id::validate_id("handler", &body.id) {
        return error_response(StatusCode::BAD_REQUEST, &msg);
    }
    let def = HandlerDef {
        id: body.id,
        topics: body.topics,
        actions: body.actions,
    };
    if let Err(resp) = persist_handler(&state, Some(&id), &def) {
        return resp;
    }
    Json(handler_json(&def)).into_response()
}

/// Delete a handler.
#[utoipa::path(
    delete,
    path = "/weir/v1preview/alerts/handlers/{id}",
    tag = "Alerts",
    params(("id" = String, Path, description = "handler ID")),
    responses((status = 204, description = "handler deleted"))
)]
async fn delete_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.handlers.remove(&id);
    match state.store.delete_handler(&id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Loads persisted handlers into the live registry at startup.
pub fn load_handlers(
    store: &weir_storage::WeirStore,
    registry: &HandlerRegistry,
) -> anyhow::Result<()> {
    let mut defs = Vec::new();
    for row in store.list_handlers()? {
        let topics: Vec<String> = serde_json::from_str(&row.topics)?;
        let actions: Vec<weir_alert::HandlerAction> = serde_json::from_str(&row.actions)?;
        defs.push(HandlerDef {
            id: row.id,
            topics,
            actions,
        });
    }
    registry.load(defs);
    Ok(())
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_topics))
        .routes(routes!(get_topic, delete_topic))
        .routes(routes!(list_topic_events))
        .routes(routes!(get_topic_event))
        .routes(routes!(list_topic_handlers))
        .routes(routes!(create_handler, list_handlers))
        .routes(routes!(get_handler, patch_handler, put_handler, delete_handler))
}
