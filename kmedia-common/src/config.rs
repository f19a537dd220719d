//! Bootstrap configuration file loading and default path resolution
//!
//! Services resolve settings in this order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Built-in default (fallback)
//!
//! This module covers tiers 3 and 4; tiers 1 and 2 are handled by each
//! service's `clap` arguments.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name used under the platform config/data directories
pub const APP_DIR: &str = "kmedia";

/// Logging configuration shared by all service TOML files
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default TOML path for a service: `<config_dir>/kmedia/<file_name>`
///
/// On Linux `/etc/kmedia/<file_name>` is used when the user-level file does
/// not exist but the system-wide one does.
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name));

    if cfg!(target_os = "linux") {
        if let Some(path) = &user_config {
            if path.exists() {
                return user_config;
            }
        }
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    user_config
}

/// OS-dependent default data folder (database location)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./kmedia_data"))
}

/// Load and parse a TOML file into `T`
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load a TOML file if present, falling back to `T::default()`
///
/// A missing file is not an error (services run on defaults plus CLI/ENV).
/// An unreadable or malformed file is.
pub fn load_toml_config_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match path {
        Some(path) if path.exists() => {
            debug!("Loading config file: {}", path.display());
            load_toml_config(path)
        }
        Some(path) => {
            warn!("Config file not found: {} (using defaults)", path.display());
            Ok(T::default())
        }
        None => Ok(T::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        name: Option<String>,
        #[serde(default)]
        logging: LoggingConfig,
    }

    #[test]
    fn test_default_logging_level_is_info() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_missing_file_yields_default() {
        let path = PathBuf::from("/nonexistent/kmedia/sample.toml");
        let sample: Sample = load_toml_config_or_default(Some(&path)).unwrap();
        assert!(sample.name.is_none());
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "name = [unterminated").unwrap();

        let result: Result<Sample> = load_toml_config(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_default_data_dir_ends_with_app_dir() {
        let dir = default_data_dir();
        assert!(dir.ends_with(APP_DIR) || dir.ends_with("kmedia_data"));
    }
}
