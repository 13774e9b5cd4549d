//! Printer control DTOs.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters for `POST /printer/print/start`.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StartPrintParams {
    /// File to print, relative to the `gcodes` root.
    pub filename: String,
}

/// Generic backend result, as returned by forwarded endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackendResult {
    /// Backend result; `"ok"` when the backend returned nothing.
    #[schema(value_type = Object)]
    pub result: serde_json::Value,
}
