// medallion-config - Runtime and forecasting configuration
//
// Runtime configuration is layered from several sources:
// 1. Environment variables (highest priority)
// 2. Config file path from MEDALLION_CONFIG env var
// 3. Config file contents from MEDALLION_CONFIG_CONTENT env var
// 4. Default config file location (./medallion.toml)
// 5. Built-in defaults (lowest priority)
//
// Forecast notebook parameters live in `ForecastConfig`, an explicit typed
// record validated at construction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

mod env_overrides;
pub mod forecast;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};
pub use forecast::{ForecastConfig, ForecastConfigError, ModelType, TimeGranularity};
pub use sources::load_from_file_path;

/// Main runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub lakehouse: LakehouseConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default = "default_parquet_row_group_size")]
    pub parquet_row_group_size: usize,
    #[serde(default = "default_parquet_zstd_level")]
    pub parquet_zstd_level: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            parquet_row_group_size: default_parquet_row_group_size(),
            parquet_zstd_level: default_parquet_zstd_level(),
            fs: Some(FsConfig::default()),
            s3: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Fs => write!(f, "fs"),
            StorageBackend::S3 => write!(f, "s3"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

fn default_parquet_row_group_size() -> usize {
    32 * 1024
}

fn default_parquet_zstd_level() -> i32 {
    3
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fs" | "filesystem" => Ok(StorageBackend::Fs),
            "s3" | "aws" => Ok(StorageBackend::S3),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => anyhow::bail!(
                "Unsupported storage backend: {}. Supported: fs, s3, memory",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub path: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            path: "./lakehouse".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Key prefix applied to every object (always ends with '/').
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Where raw files and managed tables live inside the storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LakehouseConfig {
    #[serde(default = "default_files_prefix")]
    pub files_prefix: String,
    #[serde(default = "default_tables_prefix")]
    pub tables_prefix: String,
}

fn default_files_prefix() -> String {
    "Files/".to_string()
}

fn default_tables_prefix() -> String {
    "Tables/".to_string()
}

impl Default for LakehouseConfig {
    fn default() -> Self {
        Self {
            files_prefix: default_files_prefix(),
            tables_prefix: default_tables_prefix(),
        }
    }
}

/// Table maintenance settings (optimize and vacuum)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Files smaller than this are candidates for compaction.
    #[serde(default = "default_target_file_size")]
    pub target_file_size_bytes: u64,
    /// Upper bound on rows written per data file by optimize.
    #[serde(default = "default_max_rows_per_file")]
    pub max_rows_per_file: usize,
    #[serde(default = "default_retention_hours")]
    pub default_retention_hours: u64,
    #[serde(default = "default_retention_hours")]
    pub min_retention_hours: u64,
    #[serde(default = "default_retention_check")]
    pub retention_check_enabled: bool,
}

fn default_target_file_size() -> u64 {
    128 * 1024 * 1024
}

fn default_max_rows_per_file() -> usize {
    1_000_000
}

fn default_retention_hours() -> u64 {
    168
}

fn default_retention_check() -> bool {
    true
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            target_file_size_bytes: default_target_file_size(),
            max_rows_per_file: default_max_rows_per_file(),
            default_retention_hours: default_retention_hours(),
            min_retention_hours: default_retention_hours(),
            retention_check_enabled: default_retention_check(),
        }
    }
}

/// Logging configuration for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Parse a TOML document on top of the defaults and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse inline config content")?;
        config.validate()?;
        Ok(config)
    }

    /// Merge another config into this one (used for TOML layering).
    pub fn merge(&mut self, other: RuntimeConfig) {
        self.storage = other.storage;
        self.lakehouse = other.lakehouse;
        self.maintenance = other.maintenance;
        self.log = other.log;
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// In-memory storage, mostly useful for tests and dry runs.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                fs: None,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!("fs".parse::<StorageBackend>().unwrap(), StorageBackend::Fs);
        assert_eq!("s3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!(
            "memory".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert_eq!(
            "filesystem".parse::<StorageBackend>().unwrap(),
            StorageBackend::Fs
        );
        assert_eq!("aws".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let config = RuntimeConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.lakehouse.files_prefix, "Files/");
        assert_eq!(config.lakehouse.tables_prefix, "Tables/");
        assert_eq!(config.maintenance.default_retention_hours, 168);
        assert!(config.maintenance.retention_check_enabled);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str_fills_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [storage]
            backend = "memory"

            [maintenance]
            default_retention_hours = 240
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.parquet_row_group_size, 32 * 1024);
        assert_eq!(config.maintenance.default_retention_hours, 240);
        assert_eq!(config.maintenance.min_retention_hours, 168);
        assert_eq!(config.lakehouse.tables_prefix, "Tables/");
        assert_eq!(config.storage.parquet_zstd_level, 3);
    }

    #[test]
    fn partial_log_table_keeps_other_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [storage]
            backend = "memory"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, LogFormat::Text);

        let config = RuntimeConfig::from_toml_str(
            r#"
            [storage]
            backend = "memory"

            [log]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Json);
    }
}
