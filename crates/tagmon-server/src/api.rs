use crate::logging::TraceId;
use crate::registry::FleetOverview;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tagmon_client::TelemetrySnapshot;
use tagmon_common::types::{AlertStatSnapshot, ClientStatus};
use tagmon_protocol::BrowseItem;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// API error payload.
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
}

/// Uniform response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "not_connected" => 1101,
        "protocol_error" => 1102,
        "internal_error" => 1500,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn client_not_found(trace_id: &str, id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        trace_id,
        "not_found",
        &format!("client '{id}' is not registered"),
    )
}

#[derive(Serialize, ToSchema)]
struct HealthInfo {
    status: String,
    version: String,
    uptime_secs: i64,
}

/// Service health probe.
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses((status = 200, description = "Service is up", body = HealthInfo))
)]
async fn health(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthInfo {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        },
    )
}

/// Fleet-wide rollup for the dashboard landing view.
#[utoipa::path(
    get,
    path = "/v1/overview",
    tag = "Fleet",
    responses((status = 200, description = "Fleet overview", body = FleetOverview))
)]
async fn overview(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let overview = state.registry.overview().await;
    success_response(StatusCode::OK, &trace_id, overview)
}

/// Status snapshots for every registered client.
#[utoipa::path(
    get,
    path = "/v1/clients",
    tag = "Clients",
    responses((status = 200, description = "Client statuses", body = Vec<ClientStatus>))
)]
async fn list_clients(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let statuses = state.registry.status_all().await;
    success_response(StatusCode::OK, &trace_id, statuses)
}

/// Status snapshot for one client. Always answers from the last known
/// state, even mid-reconnect.
#[utoipa::path(
    get,
    path = "/v1/clients/{id}",
    tag = "Clients",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client status", body = ClientStatus),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn get_client(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.status(&id).await {
        Some(status) => success_response(StatusCode::OK, &trace_id, status),
        None => client_not_found(&trace_id, &id),
    }
}

/// Removes a client from the fleet, disconnecting it first.
#[utoipa::path(
    delete,
    path = "/v1/clients/{id}",
    tag = "Clients",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client removed"),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn delete_client(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.registry.remove(&id).await {
        success_empty_response(StatusCode::OK, &trace_id, "client removed")
    } else {
        client_not_found(&trace_id, &id)
    }
}

/// Compact telemetry snapshot: rates, quality, latency percentiles, short
/// time series, recent reconnect events.
#[utoipa::path(
    get,
    path = "/v1/clients/{id}/telemetry",
    tag = "Telemetry",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Telemetry snapshot", body = TelemetrySnapshot),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn client_telemetry(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.telemetry(&id, Utc::now()).await {
        Some(snapshot) => success_response(StatusCode::OK, &trace_id, snapshot),
        None => client_not_found(&trace_id, &id),
    }
}

/// Per-tag alert statistics for one client.
#[utoipa::path(
    get,
    path = "/v1/clients/{id}/alerts",
    tag = "Alerts",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Alert statistics", body = Vec<AlertStatSnapshot>),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn client_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.alert_stats(&id).await {
        Some(stats) => success_response(StatusCode::OK, &trace_id, stats),
        None => client_not_found(&trace_id, &id),
    }
}

#[derive(Deserialize, utoipa::IntoParams)]
struct BrowseParams {
    /// Node to browse under; defaults to the objects folder.
    node: Option<String>,
}

/// Browses the device address space through the client's session.
#[utoipa::path(
    get,
    path = "/v1/clients/{id}/browse",
    tag = "Clients",
    params(("id" = String, Path, description = "Client id"), BrowseParams),
    responses(
        (status = 200, description = "Browse results", body = Vec<BrowseItem>),
        (status = 404, description = "Unknown client", body = ApiError),
        (status = 409, description = "Client not connected", body = ApiError)
    )
)]
async fn client_browse(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<BrowseParams>,
) -> Response {
    let node = params.node.unwrap_or_else(|| "85".to_string());
    match state.registry.browse(&id, &node).await {
        Some(Ok(items)) => success_response(StatusCode::OK, &trace_id, items),
        Some(Err(e)) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "not_connected",
            &e.to_string(),
        ),
        None => client_not_found(&trace_id, &id),
    }
}

/// Starts a connection attempt for one client. The attempt itself runs in
/// the background and absorbs its own failures.
#[utoipa::path(
    post,
    path = "/v1/clients/{id}/connect",
    tag = "Clients",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 202, description = "Connection attempt started"),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn client_connect(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.registry.connect_one(&id).await {
        success_empty_response(StatusCode::ACCEPTED, &trace_id, "connect started")
    } else {
        client_not_found(&trace_id, &id)
    }
}

/// Disconnects one client, stopping its scheduler first.
#[utoipa::path(
    post,
    path = "/v1/clients/{id}/disconnect",
    tag = "Clients",
    params(("id" = String, Path, description = "Client id")),
    responses(
        (status = 200, description = "Client disconnected"),
        (status = 404, description = "Unknown client", body = ApiError)
    )
)]
async fn client_disconnect(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.registry.disconnect_one(&id).await {
        success_empty_response(StatusCode::OK, &trace_id, "client disconnected")
    } else {
        client_not_found(&trace_id, &id)
    }
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(overview))
        .routes(routes!(list_clients))
        .routes(routes!(get_client, delete_client))
        .routes(routes!(client_telemetry))
        .routes(routes!(client_alerts))
        .routes(routes!(client_browse))
        .routes(routes!(client_connect))
        .routes(routes!(client_disconnect))
}
