//! File manager collaborator.
//!
//! Receives the fixed paths the backend reports (`klipper_path`,
//! `log_file`, ...) and the directories the gateway discovers, such as
//! the virtual SD card root registered as `gcodes`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::Plugin;
use crate::sync;

/// Name the file manager is registered under.
pub const PLUGIN_NAME: &str = "file_manager";

/// Keys of the `info` result that are forwarded as fixed paths.
pub const FIXED_PATH_KEYS: [&str; 4] = ["klipper_path", "python_path", "log_file", "config_file"];

/// A directory exposed through the file API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FileRoot {
    /// Absolute path on disk.
    pub path: String,
    /// Whether files under the root may be deleted.
    pub can_delete: bool,
}

/// Snapshot of the file manager state.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct FileRoots {
    /// Paths reported by the backend.
    pub fixed_paths: BTreeMap<String, String>,
    /// Registered directories by root name.
    pub directories: BTreeMap<String, FileRoot>,
}

/// Tracks file locations known to the gateway.
#[derive(Debug, Default)]
pub struct FileManager {
    state: RwLock<FileRoots>,
}

impl FileManager {
    /// Creates an empty file manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the fixed paths with the string entries of `paths`.
    pub fn update_fixed_paths(&self, paths: &Map<String, Value>) {
        let fixed: BTreeMap<String, String> = paths
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        tracing::debug!(paths = ?fixed, "updated fixed paths");
        sync::write(&self.state).fixed_paths = fixed;
    }

    /// Registers (or re-points) a named directory root.
    pub fn register_directory(&self, name: &str, path: &str, can_delete: bool) {
        let root = FileRoot {
            path: path.to_string(),
            can_delete,
        };
        let previous = sync::write(&self.state)
            .directories
            .insert(name.to_string(), root);
        if previous.as_ref().map(|r| r.path.as_str()) != Some(path) {
            tracing::info!(root = name, path, "registered directory");
        }
    }

    /// Returns the fixed path stored under `key`.
    #[must_use]
    pub fn fixed_path(&self, key: &str) -> Option<String> {
        sync::read(&self.state).fixed_paths.get(key).cloned()
    }

    /// Returns the registered directory `name`.
    #[must_use]
    pub fn directory(&self, name: &str) -> Option<FileRoot> {
        sync::read(&self.state).directories.get(name).cloned()
    }

    /// Returns a copy of all known paths.
    #[must_use]
    pub fn roots(&self) -> FileRoots {
        sync::read(&self.state).clone()
    }
}

impl Plugin for FileManager {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fixed_paths_keep_only_strings() {
        let manager = FileManager::new();
        let mut paths = Map::new();
        paths.insert("log_file".to_string(), json!("/tmp/klippy.log"));
        paths.insert("config_file".to_string(), json!(null));
        manager.update_fixed_paths(&paths);

        assert_eq!(manager.fixed_path("log_file").as_deref(), Some("/tmp/klippy.log"));
        assert!(manager.fixed_path("config_file").is_none());
    }

    #[test]
    fn register_directory_replaces_existing_root() {
        let manager = FileManager::new();
        manager.register_directory("gcodes", "/home/pi/sdcard", true);
        manager.register_directory("gcodes", "/home/pi/gcode_files", true);

        let Some(root) = manager.directory("gcodes") else {
            panic!("root was registered");
        };
        assert_eq!(root.path, "/home/pi/gcode_files");
        assert!(root.can_delete);
        assert_eq!(manager.roots().directories.len(), 1);
    }
}
