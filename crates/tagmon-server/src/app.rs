use crate::state::AppState;
use crate::{api, logging};
use axum::routing::get;
use axum::{middleware, Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "tagmon API",
        description = "Industrial tag-polling fleet REST API",
    ),
    tags(
        (name = "Health", description = "Service health checks"),
        (name = "Fleet", description = "Fleet-wide overview"),
        (name = "Clients", description = "Per-device client lifecycle and status"),
        (name = "Telemetry", description = "Windowed read/quality/latency telemetry"),
        (name = "Alerts", description = "Per-tag alert statistics")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (router, api_spec) = api::routes().split_for_parts();

    let mut spec = ApiDoc::openapi();
    spec.merge(api_spec);
    let spec = Arc::new(spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .with_state(state)
        .merge(Router::new().route(
            "/v1/openapi.json",
            get(move || {
                let spec = spec.clone();
                async move { Json(spec.as_ref().clone()) }
            }),
        ))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
