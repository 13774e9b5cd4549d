//! Printer handlers: print control shortcuts and remote endpoint
//! forwarding.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Map, Value};

use crate::api::dto::{BackendResult, ResultEnvelope, StartPrintParams};
use crate::app_state::AppState;
use crate::backend::request::OK_MARKER;
use crate::error::{ErrorResponse, GatewayError, KLIPPY_DISCONNECTED};

/// `POST /printer/print/pause`: Pause the active print.
///
/// # Errors
///
/// Returns [`GatewayError`] if the backend is unavailable or rejects the
/// script.
#[utoipa::path(
    post,
    path = "/printer/print/pause",
    tag = "Printer",
    summary = "Pause print",
    responses(
        (status = 200, description = "Print paused", body = BackendResult),
        (status = 400, description = "Backend rejected the command", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn pause_print(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_script(&state, "PAUSE").await
}

/// `POST /printer/print/resume`: Resume a paused print.
///
/// # Errors
///
/// Returns [`GatewayError`] if the backend is unavailable or rejects the
/// script.
#[utoipa::path(
    post,
    path = "/printer/print/resume",
    tag = "Printer",
    summary = "Resume print",
    responses(
        (status = 200, description = "Print resumed", body = BackendResult),
        (status = 400, description = "Backend rejected the command", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn resume_print(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    run_script(&state, "RESUME").await
}

/// `POST /printer/print/cancel`: Cancel the active print.
///
/// # Errors
///
/// Returns [`GatewayError`] if the backend is unavailable or rejects the
/// script.
#[utoipa::path(
    post,
    path = "/printer/print/cancel",
    tag = "Printer",
    summary = "Cancel print",
    responses(
        (status = 200, description = "Print cancelled", body = BackendResult),
        (status = 400, description = "Backend rejected the command", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn cancel_print(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    run_script(&state, "CANCEL_PRINT").await
}

/// `POST /printer/print/start?filename=`: Start printing a file from the
/// virtual SD card.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for an empty filename, or the
/// backend error.
#[utoipa::path(
    post,
    path = "/printer/print/start",
    tag = "Printer",
    summary = "Start print",
    params(StartPrintParams),
    responses(
        (status = 200, description = "Print started", body = BackendResult),
        (status = 400, description = "Invalid filename or backend error", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn start_print(
    State(state): State<AppState>,
    Query(params): Query<StartPrintParams>,
) -> Result<impl IntoResponse, GatewayError> {
    let filename = params.filename.strip_prefix('/').unwrap_or(&params.filename);
    if filename.is_empty() {
        return Err(GatewayError::InvalidRequest("filename is required".to_string()));
    }
    run_script(&state, &format!("SDCARD_PRINT_FILE FILENAME={filename}")).await
}

/// `POST /printer/restart`: Restart the host software.
///
/// # Errors
///
/// Returns the backend error; losing the connection during the restart is
/// reported as success.
#[utoipa::path(
    post,
    path = "/printer/restart",
    tag = "Printer",
    summary = "Restart host",
    responses(
        (status = 200, description = "Restart issued", body = BackendResult),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn restart(State(state): State<AppState>) -> Result<impl IntoResponse, GatewayError> {
    run_restart(&state, "RESTART").await
}

/// `POST /printer/firmware_restart`: Restart the host and the MCUs.
///
/// # Errors
///
/// Returns the backend error; losing the connection during the restart is
/// reported as success.
#[utoipa::path(
    post,
    path = "/printer/firmware_restart",
    tag = "Printer",
    summary = "Firmware restart",
    responses(
        (status = 200, description = "Restart issued", body = BackendResult),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn firmware_restart(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    run_restart(&state, "FIRMWARE_RESTART").await
}

/// `GET|POST /printer/{endpoint}`: Forward a call to a remote endpoint
/// the backend advertised.
///
/// Query arguments become request params; a JSON object body is merged
/// over them.
///
/// # Errors
///
/// Returns [`GatewayError::EndpointNotFound`] for endpoints the backend
/// never advertised, [`GatewayError::InvalidRequest`] for a body that is
/// not a JSON object, or the backend error.
#[utoipa::path(
    post,
    path = "/printer/{endpoint}",
    tag = "Printer",
    summary = "Forward to backend endpoint",
    params(("endpoint" = String, Path, description = "Endpoint advertised by the backend, e.g. `objects/query`")),
    request_body(content = Option<Object>, description = "Optional JSON object of arguments", content_type = "application/json"),
    responses(
        (status = 200, description = "Backend result", body = BackendResult),
        (status = 400, description = "Invalid arguments or backend error", body = ErrorResponse),
        (status = 404, description = "Endpoint not registered", body = ErrorResponse),
        (status = 503, description = "Backend unavailable", body = ErrorResponse),
    )
)]
pub async fn forward_endpoint(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Query(args): Query<Vec<(String, String)>>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let endpoint = endpoint.trim_start_matches('/');
    if !state.gateway.endpoints().contains(endpoint) {
        return Err(GatewayError::EndpointNotFound(format!("/printer/{endpoint}")));
    }

    let mut params = query_params(endpoint, args);
    if !body.is_empty() {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(fields)) => params.extend(fields),
            Ok(_) => {
                return Err(GatewayError::InvalidRequest(
                    "body must be a JSON object".to_string(),
                ));
            }
            Err(err) => return Err(GatewayError::InvalidRequest(err.to_string())),
        }
    }

    tracing::debug!(endpoint, "forwarding request");
    let result = state.gateway.make_request(endpoint, params).await?;
    Ok(Json(ResultEnvelope::new(result)))
}

/// Converts query arguments into backend params.
///
/// `objects/*` endpoints take an `objects` mapping: each key names a
/// printer object and its value is a comma separated field list, with an
/// empty value meaning every field. Other endpoints receive the arguments
/// as plain strings.
#[must_use]
pub fn query_params(endpoint: &str, args: Vec<(String, String)>) -> Map<String, Value> {
    if !endpoint.starts_with("objects/") {
        return args
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();
    }

    let objects: Map<String, Value> = args
        .into_iter()
        .map(|(name, fields)| {
            let fields: Vec<Value> = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(|f| Value::String(f.to_string()))
                .collect();
            let selection = if fields.is_empty() {
                Value::Null
            } else {
                Value::Array(fields)
            };
            (name, selection)
        })
        .collect();

    let mut params = Map::new();
    if !objects.is_empty() {
        params.insert("objects".to_string(), Value::Object(objects));
    }
    params
}

async fn run_script(state: &AppState, script: &str) -> Result<Json<ResultEnvelope<Value>>, GatewayError> {
    let result = state.gateway.run_gcode(script).await?;
    Ok(Json(ResultEnvelope::new(result)))
}

async fn run_restart(
    state: &AppState,
    script: &str,
) -> Result<Json<ResultEnvelope<Value>>, GatewayError> {
    match state.gateway.run_gcode(script).await {
        Ok(result) => Ok(Json(ResultEnvelope::new(result))),
        Err(GatewayError::BackendUnavailable(message)) if message == KLIPPY_DISCONNECTED => {
            Ok(Json(ResultEnvelope::new(Value::String(OK_MARKER.to_string()))))
        }
        Err(err) => Err(err),
    }
}

/// Printer routes. Fixed routes take priority over forwarding.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/printer/print/pause", post(pause_print))
        .route("/printer/print/resume", post(resume_print))
        .route("/printer/print/cancel", post(cancel_print))
        .route("/printer/print/start", post(start_print))
        .route("/printer/restart", post(restart))
        .route("/printer/firmware_restart", post(firmware_restart))
        .route("/printer/{*endpoint}", get(forward_endpoint).post(forward_endpoint))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn object_queries_become_field_selections() {
        let params = query_params(
            "objects/query",
            args(&[("gcode_move", ""), ("toolhead", "position, status")]),
        );
        assert_eq!(
            Value::Object(params),
            json!({"objects": {"gcode_move": null, "toolhead": ["position", "status"]}})
        );
    }

    #[test]
    fn object_endpoint_without_args_sends_no_objects() {
        assert!(query_params("objects/list", Vec::new()).is_empty());
    }

    #[test]
    fn other_endpoints_pass_strings_through() {
        let params = query_params("gcode/script", args(&[("script", "G28 X")]));
        assert_eq!(Value::Object(params), json!({"script": "G28 X"}));
    }
}
