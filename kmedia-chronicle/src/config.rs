//! Configuration for kmedia-chronicle
//!
//! Resolution order per setting:
//! 1. Command-line argument
//! 2. Environment variable (via `clap`'s `env` fallback)
//! 3. TOML file (`--config`, `KMEDIA_CONFIG`, or `<config_dir>/kmedia/chronicle.toml`)
//! 4. Built-in default
//!
//! Pipeline tuning lives only in the TOML `[pipeline]` table; every value
//! has a default so a bare scan URL is enough to run.

use clap::Parser;
use kmedia_common::config::{default_data_dir, LoggingConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ChronicleError, Result};
use crate::services::debouncer::DebounceConfig;

/// TOML file name under the kmedia config directory
pub const CONFIG_FILE_NAME: &str = "chronicle.toml";

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_WAIT_FOR_SAVE_SECS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LATE_STOP_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5790";
pub const DEFAULT_DATABASE_FILE: &str = "kmedia.db";

/// Command-line arguments for kmedia-chronicle
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "kmedia-chronicle")]
#[command(about = "Chronicle playback event ingestion for kmedia")]
#[command(version)]
pub struct CliArgs {
    /// Chronicle scan endpoint URL
    #[arg(long, env = "KMEDIA_SCAN_URL")]
    pub scan_url: Option<String>,

    /// SQLite database file holding progress records
    #[arg(long, env = "KMEDIA_DATABASE")]
    pub database: Option<PathBuf>,

    /// Address for the health endpoint
    #[arg(long, env = "KMEDIA_CHRONICLE_LISTEN")]
    pub listen: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "KMEDIA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// `chronicle.toml` contents
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChronicleToml {
    #[serde(default)]
    pub scan_url: Option<String>,

    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub listen: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipeline: PipelineToml,
}

/// `[pipeline]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    pub page_size: usize,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub wait_for_save_secs: u64,
    pub request_timeout_secs: u64,
    pub late_stop_retention_secs: u64,
}

impl Default for PipelineToml {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
            max_interval_ms: DEFAULT_MAX_INTERVAL_MS,
            wait_for_save_secs: DEFAULT_WAIT_FOR_SAVE_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            late_stop_retention_secs: DEFAULT_LATE_STOP_RETENTION_SECS,
        }
    }
}

/// Pipeline tuning after validation
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub page_size: usize,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub wait_for_save: Duration,
    pub request_timeout: Duration,
    pub late_stop_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineToml::default())
    }
}

impl From<&PipelineToml> for PipelineConfig {
    fn from(toml: &PipelineToml) -> Self {
        Self {
            page_size: toml.page_size,
            min_interval: Duration::from_millis(toml.min_interval_ms),
            max_interval: Duration::from_millis(toml.max_interval_ms),
            wait_for_save: Duration::from_secs(toml.wait_for_save_secs),
            request_timeout: Duration::from_secs(toml.request_timeout_secs),
            late_stop_retention: Duration::from_secs(toml.late_stop_retention_secs),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(ChronicleError::Config("page_size must be greater than 0".to_string()));
        }
        if self.min_interval.is_zero() {
            return Err(ChronicleError::Config(
                "min_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.min_interval > self.max_interval {
            return Err(ChronicleError::Config(format!(
                "min_interval ({:?}) exceeds max_interval ({:?})",
                self.min_interval, self.max_interval
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(ChronicleError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            wait_for_save: self.wait_for_save,
            late_stop_retention: self.late_stop_retention,
        }
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ChronicleConfig {
    pub scan_url: String,
    pub database_path: PathBuf,
    pub listen: SocketAddr,
    pub log_level: String,
    pub pipeline: PipelineConfig,
}

impl ChronicleConfig {
    /// Merge CLI/ENV values over the TOML file and defaults, then validate
    pub fn resolve(args: &CliArgs, file: &ChronicleToml) -> Result<Self> {
        let scan_url = args
            .scan_url
            .clone()
            .or_else(|| file.scan_url.clone())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ChronicleError::Config(
                    "Chronicle scan URL not configured. Use --scan-url, KMEDIA_SCAN_URL, \
                     or scan_url in chronicle.toml"
                        .to_string(),
                )
            })?;

        reqwest::Url::parse(&scan_url)
            .map_err(|e| ChronicleError::Config(format!("Invalid scan URL '{}': {}", scan_url, e)))?;

        let database_path = args
            .database
            .clone()
            .or_else(|| file.database_path.clone())
            .unwrap_or_else(|| default_data_dir().join(DEFAULT_DATABASE_FILE));

        let listen_str = args
            .listen
            .clone()
            .or_else(|| file.listen.clone())
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen_str.parse().map_err(|e| {
            ChronicleError::Config(format!("Invalid listen address '{}': {}", listen_str, e))
        })?;

        let pipeline = PipelineConfig::from(&file.pipeline);
        pipeline.validate()?;

        Ok(Self {
            scan_url,
            database_path,
            listen,
            log_level: file.logging.level.clone(),
            pipeline,
        })
    }
}
