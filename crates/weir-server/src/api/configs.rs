use crate::api::{error_response, href, link};
use crate::config_service::{ConfigError, Element};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};
use utoipa_axum::{router::OpenApiRouter, routes};

fn element_json(section: &str, element: &Element, redacted: &[&str]) -> Value {
    let mut options = Map::new();
    let mut redacted_present = Vec::new();
    for (key, value) in &element.options {
        if redacted.contains(&key.as_str()) {
            let set = !value.is_null()
                && value.as_str().map(|s| !s.is_empty()).unwrap_or(true);
            options.insert(key.clone(), Value::Bool(set));
            redacted_present.push(key.clone());
        } else {
            options.insert(key.clone(), value.clone());
        }
    }
    serde_json::json!({
        "link": link(href(&format!("/config/{section}/{}", element.name))),
        "options": options,
        "redacted": redacted_present,
    })
}

fn section_json(state: &AppState, section: &str, elements: &[Element]) -> Value {
    let redacted = state.configs.redacted_manifest(section);
    let items: Vec<Value> = elements
        .iter()
        .map(|e| element_json(section, e, redacted))
        .collect();
    serde_json::json!({
        "link": link(href(&format!("/config/{section}"))),
        "elements": items,
    })
}

/// The full dynamic configuration, with sensitive options redacted.
#[utoipa::path(
    get,
    path = "/weir/v1/config",
    tag = "Config",
    responses((status = 200, description = "all config sections"))
)]
async fn get_config(State(state): State<AppState>) -> Response {
    let snapshot = state.configs.snapshot();
    let mut sections = Map::new();
    for (name, elements) in &snapshot.sections {
        sections.insert(name.clone(), section_json(&state, name, elements));
    }
    Json(serde_json::json!({
        "link": link(href("/config")),
        "sections": sections,
    }))
    .into_response()
}

/// One config section.
#[utoipa::path(
    get,
    path = "/weir/v1/config/{section}",
    tag = "Config",
    params(("section" = String, Path, description = "section name")),
    responses(
        (status = 200, description = "section"),
        (status = 404, description = "no such section")
    )
)]
async fn get_section(State(state): State<AppState>, Path(section): Path<String>) -> Response {
    let snapshot = state.configs.snapshot();
    match snapshot.sections.get(&section) {
        Some(elements) => Json(section_json(&state, &section, elements)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("unknown section {section:?}"),
        ),
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ConfigUpdateBody {
    /// Merge option overrides into the element.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub set: Option<Map<String, Value>>,
    /// Revert option keys to their compiled defaults.
    #[serde(default)]
    pub delete: Option<Vec<String>>,
    /// Create a new element in a multi-element section.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub add: Option<Map<String, Value>>,
    /// Remove added elements from a multi-element section.
    #[serde(default)]
    pub remove: Option<Vec<String>>,
}

fn config_error_response(e: ConfigError) -> Response {
    match &e {
        ConfigError::UnknownSection(_) | ConfigError::UnknownElement { .. } => {
            error_response(StatusCode::NOT_FOUND, &e.to_string())
        }
        ConfigError::Invalid(_) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        ConfigError::Storage(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn apply_update(
    state: &AppState,
    section: &str,
    element: &str,
    body: ConfigUpdateBody,
) -> Response {
    if let Some(add) = &body.add {
        if let Err(e) = state.configs.add(section, add) {
            return config_error_response(e);
        }
    }
    if let Some(remove) = &body.remove {
        for name in remove {
            if let Err(e) = state.configs.remove_element(section, name) {
                return config_error_response(e);
            }
        }
    }
    if let Some(set) = &body.set {
        if let Err(e) = state.configs.set(section, element, set) {
            return config_error_response(e);
        }
    }
    if let Some(delete) = &body.delete {
        if let Err(e) = state.configs.delete_keys(section, element, delete) {
            return config_error_response(e);
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Mutate a section: `add`/`remove` elements, or `set`/`delete` options of
/// the section's single element.
#[utoipa::path(
    post,
    path = "/weir/v1/config/{section}",
    tag = "Config",
    params(("section" = String, Path, description = "section name")),
    request_body = ConfigUpdateBody,
    responses(
        (status = 204, description = "section updated"),
        (status = 400, description = "invalid update"),
        (status = 404, description = "no such section")
    )
)]
async fn update_section(
    State(state): State<AppState>,
    Path(section): Path<String>,
    Json(body): Json<ConfigUpdateBody>,
) -> Response {
    apply_update(&state, &section, "", body).await
}

/// One element of a section.
#[utoipa::path(
    get,
    path = "/weir/v1/config/{section}/{element}",
    tag = "Config",
    params(
        ("section" = String, Path, description = "section name"),
        ("element" = String, Path, description = "element name")
    ),
    responses(
        (status = 200, description = "element"),
        (status = 404, description = "no such element")
    )
)]
async fn get_element(
    State(state): State<AppState>,
    Path((section, element)): Path<(String, String)>,
) -> Response {
    let snapshot = state.configs.snapshot();
    let found = snapshot
        .sections
        .get(&section)
        .and_then(|elements| elements.iter().find(|e| e.name == element));
    match found {
        Some(e) => Json(element_json(
            &section,
            e,
            state.configs.redacted_manifest(&section),
        ))
        .into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &format!("unknown element {element:?} in section {section:?}"),
        ),
    }
}

/// Mutate one element's options.
#[utoipa::path(
    post,
    path = "/weir/v1/config/{section}/{element}",
    tag = "Config",
    params(
        ("section" = String, Path, description = "section name"),
        ("element" = String, Path, description = "element name")
    ),
    request_body = ConfigUpdateBody,
    responses(
        (status = 204, description = "element updated"),
        (status = 400, description = "invalid update"),
        (status = 404, description = "no such element")
    )
)]
async fn update_element(
    State(state): State<AppState>,
    Path((section, element)): Path<(String, String)>,
    Json(body): Json<ConfigUpdateBody>,
) -> Response {
    apply_update(&state, &section, &element, body).await
}

/// Remove an added element.
#[utoipa::path(
    delete,
    path = "/weir/v1/config/{section}/{element}",
    tag = "Config",
    params(
        ("section" = String, Path, description = "section name"),
        ("element" = String, Path, description = "element name")
    ),
    responses((status = 204, description = "element removed"))
)]
async fn delete_element(
    State(state): State<AppState>,
    Path((section, element)): Path<(String, String)>,
) -> Response {
    match state.configs.remove_element(&section, &element) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => config_error_response(e),
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_config))
        .routes(routes!(get_section, update_section))
        .routes(routes!(get_element, update_element, delete_element))
}
