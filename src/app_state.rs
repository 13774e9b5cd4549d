//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::Gateway;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Gateway core: backend requests, registries and the event bus.
    pub gateway: Arc<Gateway>,
}

impl AppState {
    /// Wraps a gateway for the router.
    #[must_use]
    pub const fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}
