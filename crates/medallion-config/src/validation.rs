// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_storage_config(&config.storage)?;
    validate_lakehouse_config(&config.lakehouse)?;
    validate_maintenance_config(&config.maintenance)?;

    if config.log.level.is_empty() {
        bail!("log.level must not be empty");
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.parquet_row_group_size == 0 {
        bail!("storage.parquet_row_group_size must be greater than 0");
    }
    if !(1..=22).contains(&config.parquet_zstd_level) {
        bail!(
            "storage.parquet_zstd_level must be between 1 and 22, got {}",
            config.parquet_zstd_level
        );
    }

    match config.backend {
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("fs storage backend requires 'fs' configuration"))?;

            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }

            if s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
        StorageBackend::Memory => {}
    }

    Ok(())
}

fn validate_lakehouse_config(config: &LakehouseConfig) -> Result<()> {
    for (name, prefix) in [
        ("lakehouse.files_prefix", &config.files_prefix),
        ("lakehouse.tables_prefix", &config.tables_prefix),
    ] {
        if prefix.starts_with('/') {
            bail!("{} must be relative to the storage root", name);
        }
        if !prefix.is_empty() && !prefix.ends_with('/') {
            bail!("{} must end with '/'", name);
        }
    }

    if config.files_prefix == config.tables_prefix {
        bail!("lakehouse.files_prefix and lakehouse.tables_prefix must differ");
    }

    Ok(())
}

fn validate_maintenance_config(config: &MaintenanceConfig) -> Result<()> {
    if config.target_file_size_bytes == 0 {
        bail!("maintenance.target_file_size_bytes must be greater than 0");
    }

    if config.max_rows_per_file == 0 {
        bail!("maintenance.max_rows_per_file must be greater than 0");
    }

    if config.retention_check_enabled
        && config.default_retention_hours < config.min_retention_hours
    {
        bail!(
            "maintenance.default_retention_hours ({}) is below maintenance.min_retention_hours ({})",
            config.default_retention_hours,
            config.min_retention_hours
        );
    }

    if !config.retention_check_enabled {
        warn!("maintenance.retention_check_enabled is false; vacuum may delete files readers still need");
    }

    Ok(())
}
