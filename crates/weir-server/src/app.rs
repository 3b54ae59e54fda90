use crate::api;
use crate::state::AppState;
use crate::{auth, logging};
use axum::middleware;
use axum::routing::post;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "weir API",
        description = "Streaming and batch data-processing control plane",
    ),
    tags(
        (name = "Server", description = "Liveness and runtime statistics"),
        (name = "Write", description = "Line-format point ingress"),
        (name = "Tasks", description = "Task lifecycle"),
        (name = "Templates", description = "Task templates with typed vars"),
        (name = "Recordings", description = "Data capture"),
        (name = "Replays", description = "Deterministic re-execution"),
        (name = "Alerts", description = "Topics, events, and handlers (preview)"),
        (name = "Config", description = "Dynamic configuration"),
        (name = "ServiceTests", description = "Notification transport checks")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (ping_router, ping_spec) = api::public_routes().split_for_parts();
    let (api_router, api_spec) = api::server_routes()
        .merge(api::tasks::routes())
        .merge(api::templates::routes())
        .merge(api::recordings::routes())
        .merge(api::replays::routes())
        .merge(api::alerts::routes())
        .merge(api::configs::routes())
        .merge(api::service_tests::routes())
        .split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(ping_spec);
    spec.merge(api_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    ping_router
        .merge(api_router.layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        )))
        .route(
            "/write",
            post(api::write_alias).route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth::auth_middleware,
            )),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/weir/v1/openapi.json", spec))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
