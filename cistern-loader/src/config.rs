use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(Arc<std::io::Error>),
    JsonError(Arc<serde_json::Error>),
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            ConfigError::IoError(ref e) => Some(&**e),
            ConfigError::JsonError(ref e) => Some(&**e),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(
        &self,
        fmt: &mut core::fmt::Formatter,
    ) -> core::fmt::Result {
        match *self {
            ConfigError::IoError(ref e) => write!(fmt, "{}", e),
            ConfigError::JsonError(ref e) => write!(fmt, "{}", e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(error: std::io::Error) -> Self {
        ConfigError::IoError(Arc::new(error))
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(error: serde_json::Error) -> Self {
        ConfigError::JsonError(Arc::new(error))
    }
}

/// Settings for [`AssetManager::from_config`](crate::AssetManager::from_config). Missing fields
/// in a JSON config take their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetManagerConfig {
    /// Threads running pipeline tasks
    pub worker_thread_count: usize,
    /// Threads reading blobs, for libraries that own IO threads
    pub io_thread_count: usize,
    /// Instantiate every loader registered with `register_asset_loader!`
    pub discover_loaders: bool,
}

impl Default for AssetManagerConfig {
    fn default() -> Self {
        AssetManagerConfig {
            worker_thread_count: 4,
            io_thread_count: 2,
            discover_loaders: true,
        }
    }
}

impl AssetManagerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading asset manager config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
