use super::{FsConfig, LogFormat, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "MEDALLION_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the MEDALLION_ prefix
    /// Used for AWS standard variables (AWS_ENDPOINT_URL, etc.)
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.log.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid MEDALLION_STORAGE_BACKEND value")?;
    }
    if let Some(val) = get_env_usize(env, "PARQUET_ROW_GROUP_SIZE")? {
        config.storage.parquet_row_group_size = val;
    }
    if let Some(level) = env.get("PARQUET_ZSTD_LEVEL") {
        config.storage.parquet_zstd_level = level
            .parse()
            .with_context(|| format!("Failed to parse {}PARQUET_ZSTD_LEVEL", ENV_PREFIX))?;
    }

    // Filesystem storage
    if let Some(path) = env.get("STORAGE_PATH") {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }

    // S3 storage
    if let Some(bucket) = env.get("S3_BUCKET") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get("S3_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        ensure_s3(config).endpoint = Some(endpoint);
    } else if let Some(endpoint) = env.get_raw("AWS_ENDPOINT_URL") {
        ensure_s3(config).endpoint = Some(endpoint);
    }
    if let Some(prefix) = env.get("S3_PREFIX") {
        ensure_s3(config).prefix = normalize_prefix(prefix);
    }

    // Lakehouse layout
    if let Some(prefix) = env.get("FILES_PREFIX") {
        config.lakehouse.files_prefix = normalize_prefix(prefix).unwrap_or_default();
    }
    if let Some(prefix) = env.get("TABLES_PREFIX") {
        config.lakehouse.tables_prefix = normalize_prefix(prefix).unwrap_or_default();
    }

    // Maintenance
    if let Some(val) = get_env_u64(env, "TARGET_FILE_SIZE_BYTES")? {
        config.maintenance.target_file_size_bytes = val;
    }
    if let Some(val) = get_env_u64(env, "RETENTION_HOURS")? {
        config.maintenance.default_retention_hours = val;
    }
    if let Some(val) = get_env_bool(env, "RETENTION_CHECK_ENABLED")? {
        config.maintenance.retention_check_enabled = val;
    }

    Ok(())
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    config.storage.s3.get_or_insert_with(|| S3Config {
        bucket: String::new(),
        region: String::new(),
        endpoint: None,
        prefix: None,
    })
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    env.get(key)
        .map(|val| {
            val.parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))
        })
        .transpose()
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    env.get(key)
        .map(|val| {
            val.parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))
        })
        .transpose()
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    env.get(key)
        .map(|val| {
            val.parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })
        })
        .transpose()
}

fn normalize_prefix(prefix: String) -> Option<String> {
    if prefix.is_empty() {
        None
    } else if prefix.ends_with('/') {
        Some(prefix)
    } else {
        Some(format!("{}/", prefix))
    }
}
