//! System endpoints: health check, server status, file roots and
//! temperature history.


use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::dto::{ResultEnvelope, ServerInfoResponse};
use crate::app_state::AppState;
use crate::plugins::file_manager::FileRoots;
use crate::plugins::temperature_store::SensorHistory;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and current timestamp. Does not depend on the backend connection.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /server/info`: Backend connection and handshake status.
#[utoipa::path(
    get,
    path = "/server/info",
    tag = "System",
    summary = "Server status",
    description = "Returns the backend connection state, handshake milestones, loaded plugins and registered endpoints, wrapped in `result`.",
    responses(
        (status = 200, description = "Current server status", body = ServerInfoResponse),
    )
)]
pub async fn server_info_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    let status = gateway.status();
    let info = ServerInfoResponse {
        connection_state: status.connection,
        klippy_state: status.klippy_state,
        milestones: status.checklist.milestones(),
        initialized: status.checklist.is_complete(),
        plugins: gateway.plugins().names(),
        registered_endpoints: gateway.endpoints().list(),
        pending_requests: gateway.pending_requests(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    Json(ResultEnvelope::new(info))
}

/// `GET /server/files/roots`: Paths known to the file manager.
#[utoipa::path(
    get,
    path = "/server/files/roots",
    tag = "System",
    summary = "File roots",
    description = "Returns the fixed paths reported by the backend and the registered directory roots, wrapped in `result`.",
    responses(
        (status = 200, description = "Known file locations", body = FileRoots),
    )
)]
pub async fn file_roots_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ResultEnvelope::new(state.gateway.file_manager().roots()))
}

/// `GET /server/temperature_store`: Recorded heater history.
#[utoipa::path(
    get,
    path = "/server/temperature_store",
    tag = "System",
    summary = "Temperature history",
    description = "Returns the last twenty minutes of temperatures and targets per sensor, oldest first, wrapped in `result`.",
    responses(
        (status = 200, description = "History by sensor name", body = BTreeMap<String, SensorHistory>),
    )
)]
pub async fn temperature_store_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(ResultEnvelope::new(state.gateway.temperature_store().snapshot()))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/server/info", get(server_info_handler))
        .route("/server/files/roots", get(file_roots_handler))
        .route("/server/temperature_store", get(temperature_store_handler))
}
