//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Message carried by every request failed because the backend went away.
pub const KLIPPY_DISCONNECTED: &str = "Klippy Disconnected";

/// Message returned when a request is issued with no active connection.
pub const KLIPPY_NOT_CONNECTED: &str = "Klippy Host not connected";

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 503,
///     "message": "Klippy Disconnected",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code, equal to the HTTP status.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// | Variant              | Class                  | HTTP Status |
/// |----------------------|------------------------|-------------|
/// | `BackendUnavailable` | transport              | 503         |
/// | `BadRequest`         | backend application    | 400         |
/// | `InvalidRequest`     | client input           | 400         |
/// | `EndpointNotFound`   | routing                | 404         |
/// | `PluginNotFound`     | plugin lookup          | 404         |
/// | `Serialization`      | encoding               | 500         |
/// | `Internal`           | server                 | 500         |
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The backend socket is not connected, or was lost while the request
    /// was outstanding.
    #[error("{0}")]
    BackendUnavailable(String),

    /// The backend answered the request with an `error` field.
    #[error("{0}")]
    BadRequest(String),

    /// Client supplied arguments could not be turned into a request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend has not advertised the requested endpoint.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),

    /// No plugin is loaded under the given name.
    #[error("plugin ({0}) not found")]
    PluginNotFound(String),

    /// A message could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::EndpointNotFound(_) | Self::PluginNotFound(_) => StatusCode::NOT_FOUND,
            Self::Serialization(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for the transport class of failures.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Builds the error every pending request receives on disconnection.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::BackendUnavailable(KLIPPY_DISCONNECTED.to_string())
    }

    /// Builds the error returned when no backend connection is active.
    #[must_use]
    pub fn not_connected() -> Self {
        Self::BackendUnavailable(KLIPPY_NOT_CONNECTED.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: status.as_u16(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
