//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Routes mirror the backend's own layout: `/server/*` is answered by the
//! gateway, `/printer/*` reaches the backend, and `/websocket` streams
//! events.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI document for the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "klippy-gateway", description = "HTTP and WebSocket gateway for the Klippy host"),
    paths(
        handlers::system::health_handler,
        handlers::system::server_info_handler,
        handlers::system::file_roots_handler,
        handlers::system::temperature_store_handler,
        handlers::printer::pause_print,
        handlers::printer::resume_print,
        handlers::printer::cancel_print,
        handlers::printer::start_print,
        handlers::printer::restart,
        handlers::printer::firmware_restart,
        handlers::printer::forward_endpoint,
    ),
    tags(
        (name = "System", description = "Gateway status"),
        (name = "Printer", description = "Backend control and forwarding"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    handlers::routes()
}

/// Builds the full application: REST routes, the WebSocket endpoint and
/// the HTTP middleware stack.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(build_router())
        .route("/websocket", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
