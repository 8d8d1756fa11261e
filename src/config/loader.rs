/// Configuration loading from a JSON file
use crate::config::types::{MonitorConfig, MonitorError, Result};
use std::path::Path;

impl MonitorConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: MonitorConfig = serde_json::from_str(&config_content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse config JSON: {}", e)))?;

        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}
