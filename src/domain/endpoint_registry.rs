//! Remote endpoints advertised by the backend.
//!
//! [`EndpointRegistry`] records every endpoint name returned by the
//! backend's `list_endpoints` call. The HTTP front-end forwards
//! `/printer/{endpoint}` to the backend only for names present here.

use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::sync;

/// Set of backend endpoint names reachable through the HTTP front-end.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<BTreeSet<String>>,
}

impl EndpointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a remote endpoint. Leading slashes are ignored.
    ///
    /// Returns `true` if the endpoint was not registered before.
    pub fn register(&self, endpoint: &str) -> bool {
        let endpoint = endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            return false;
        }
        let added = sync::write(&self.endpoints).insert(endpoint.to_string());
        if added {
            tracing::debug!(endpoint, "registered remote endpoint");
        }
        added
    }

    /// Returns `true` if the backend advertised `endpoint`.
    #[must_use]
    pub fn contains(&self, endpoint: &str) -> bool {
        sync::read(&self.endpoints).contains(endpoint.trim_start_matches('/'))
    }

    /// Returns all registered endpoints in sorted order.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        sync::read(&self.endpoints).iter().cloned().collect()
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        sync::read(&self.endpoints).len()
    }

    /// Returns `true` if no endpoint is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        sync::read(&self.endpoints).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let registry = EndpointRegistry::new();
        assert!(registry.register("objects/query"));
        assert!(!registry.register("/objects/query"));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("objects/query"));
    }

    #[test]
    fn empty_names_are_rejected() {
        let registry = EndpointRegistry::new();
        assert!(!registry.register("/"));
        assert!(registry.is_empty());
    }

    #[test]
    fn list_is_sorted() {
        let registry = EndpointRegistry::new();
        registry.register("info");
        registry.register("gcode/script");
        assert_eq!(registry.list(), vec!["gcode/script", "info"]);
    }
}
