//! Storage operator construction.

use medallion_config::{RuntimeConfig, StorageBackend};
use opendal::Operator;

use crate::error::{Result, TableError};

/// Build an opendal operator for the configured backend.
///
/// S3 prefixes become the operator root, so every path handed to the
/// operator stays relative to the lakehouse.
pub fn build_operator(config: &RuntimeConfig) -> Result<Operator> {
    let operator = match config.storage.backend {
        StorageBackend::Fs => {
            let fs = config.storage.fs.as_ref().ok_or_else(|| {
                TableError::invalid_config("fs config required for filesystem backend")
            })?;

            let builder = opendal::services::Fs::default().root(&fs.path);
            Operator::new(builder)
                .map_err(|e| TableError::storage(&fs.path, e))?
                .finish()
        }
        StorageBackend::S3 => {
            let s3 = config.storage.s3.as_ref().ok_or_else(|| {
                TableError::invalid_config("s3 config required for S3 backend")
            })?;

            let mut builder = opendal::services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);

            if let Some(endpoint) = &s3.endpoint {
                builder = builder.endpoint(endpoint);
            }
            if let Some(prefix) = &s3.prefix {
                builder = builder.root(prefix);
            }

            Operator::new(builder)
                .map_err(|e| TableError::storage(format!("s3://{}", s3.bucket), e))?
                .finish()
        }
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .map_err(|e| TableError::storage("memory://", e))?
            .finish(),
    };

    tracing::debug!(backend = %config.storage.backend, "Storage operator initialized");
    Ok(operator)
}

/// List the files directly under `dir` whose names end in `suffix`.
///
/// A directory that does not exist yet lists as empty.
pub(crate) async fn list_files(op: &Operator, dir: &str, suffix: &str) -> Result<Vec<String>> {
    let entries = match op.list(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TableError::storage(dir, e)),
    };

    let mut files: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.metadata().is_file() && entry.name().ends_with(suffix))
        .map(|entry| entry.path().to_string())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_config::FsConfig;

    #[test]
    fn memory_backend_builds() {
        let op = build_operator(&RuntimeConfig::in_memory()).unwrap();
        assert_eq!(op.info().scheme(), opendal::Scheme::Memory);
    }

    #[test]
    fn missing_backend_section_is_invalid_config() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3 = None;

        let err = build_operator(&config).unwrap_err();
        assert_eq!(err.code(), Some("E004"));
    }

    #[test]
    fn fs_backend_uses_configured_root() {
        let dir = std::env::temp_dir();
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Fs;
        config.storage.fs = Some(FsConfig {
            path: dir.to_string_lossy().into_owned(),
        });

        let op = build_operator(&config).unwrap();
        assert_eq!(op.info().scheme(), opendal::Scheme::Fs);
    }

    #[tokio::test]
    async fn listing_a_missing_directory_is_empty() {
        let op = build_operator(&RuntimeConfig::in_memory()).unwrap();
        op.write("t/a.json", b"{}".to_vec()).await.unwrap();
        op.write("t/b.txt", b"x".to_vec()).await.unwrap();

        assert_eq!(list_files(&op, "t/", ".json").await.unwrap(), vec!["t/a.json"]);
        assert!(list_files(&op, "missing/", ".json").await.unwrap().is_empty());
    }
}
