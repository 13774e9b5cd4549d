//! Server status DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{ConnectionState, Milestone};

/// Envelope around every successful payload.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope<T> {
    /// The payload.
    pub result: T,
}

impl<T> ResultEnvelope<T> {
    /// Wraps `result`.
    pub const fn new(result: T) -> Self {
        Self { result }
    }
}

/// Response body for `GET /server/info`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerInfoResponse {
    /// Backend connection state.
    pub connection_state: ConnectionState,
    /// Last state reported by the backend, if connected.
    pub klippy_state: Option<String>,
    /// Handshake milestones reached this connection.
    pub milestones: Vec<Milestone>,
    /// Whether every required milestone has been reached.
    pub initialized: bool,
    /// Names of the loaded plugins.
    pub plugins: Vec<String>,
    /// Endpoints forwarded under `/printer/`.
    pub registered_endpoints: Vec<String>,
    /// Requests awaiting a backend response.
    pub pending_requests: usize,
    /// Gateway version.
    pub version: String,
}
