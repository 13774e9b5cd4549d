//! Plugin registry and plugin capabilities.
//!
//! Plugins are constructed by the binary and handed to the
//! [`PluginRegistry`] owned by the gateway. The core never inspects a
//! plugin beyond the [`Plugin`] trait: cleanup runs only for plugins that
//! opt into [`Shutdown`].

pub mod file_manager;
pub mod temperature_store;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;

pub use file_manager::FileManager;
pub use temperature_store::TemperatureStore;

use crate::error::GatewayError;
use crate::sync;

/// Opt-in cleanup capability, awaited once when the gateway stops.
pub trait Shutdown: Send + Sync {
    /// Releases resources held by the plugin.
    fn shutdown(&self) -> BoxFuture<'_, ()>;
}

/// A component loaded into the gateway.
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Unique name the plugin is registered under.
    fn name(&self) -> &str;

    /// Returns the plugin's shutdown capability, if it has one.
    fn as_shutdown(&self) -> Option<&dyn Shutdown> {
        None
    }
}

/// Name → instance map of loaded plugins.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads `plugin` under its name.
    ///
    /// Loading a name twice keeps the first instance, logs, and returns it.
    pub fn load(&self, plugin: Arc<dyn Plugin>) -> Arc<dyn Plugin> {
        let mut plugins = sync::write(&self.plugins);
        let name = plugin.name().to_string();
        if let Some(existing) = plugins.get(&name) {
            tracing::warn!(plugin = %name, "plugin already loaded");
            return Arc::clone(existing);
        }
        plugins.insert(name.clone(), Arc::clone(&plugin));
        tracing::info!(plugin = %name, "plugin loaded");
        plugin
    }

    /// Returns the plugin registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PluginNotFound`] if nothing is loaded under
    /// that name.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Plugin>, GatewayError> {
        sync::read(&self.plugins)
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::PluginNotFound(name.to_string()))
    }

    /// Returns the names of all loaded plugins, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        sync::read(&self.plugins).keys().cloned().collect()
    }

    /// Runs [`Shutdown::shutdown`] on every plugin that supports it.
    /// Returns how many plugins were shut down.
    pub async fn shutdown_all(&self) -> usize {
        let plugins: Vec<Arc<dyn Plugin>> = sync::read(&self.plugins).values().cloned().collect();
        let mut count = 0;
        for plugin in plugins {
            if let Some(shutdown) = plugin.as_shutdown() {
                tracing::debug!(plugin = plugin.name(), "shutting down plugin");
                shutdown.shutdown().await;
                count += 1;
            }
        }
        count
    }
}
