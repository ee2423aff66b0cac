//! Versioned table reads and writes.

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use bytes::Bytes;
use chrono::Utc;
use medallion_config::{MaintenanceConfig, RuntimeConfig};
use medallion_core::parquet::{read_parquet, read_parquet_schema, write_parquet, ParquetOptions};
use opendal::Operator;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, TableError};
use crate::manifest::{
    manifest_file_name, parse_manifest_file_name, DataFile, Manifest, Operation, WriteMode,
};
use crate::storage::{build_operator, list_files};

const MANIFEST_DIR: &str = "_manifests/";
pub(crate) const DATA_DIR: &str = "data/";

/// Check that `name` is a usable table identifier.
///
/// Names are ASCII alphanumerics, `_` and `-`, optionally split into dotted
/// segments (`sales.orders`). Every segment must be non-empty.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TableError::invalid_name(name, "name is empty"));
    }
    if name.contains('/') || name.contains("..") {
        return Err(TableError::invalid_name(
            name,
            "name must not contain '/' or '..'",
        ));
    }
    if name.split('.').any(str::is_empty) {
        return Err(TableError::invalid_name(name, "empty dotted segment"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(TableError::invalid_name(
            name,
            format!("unsupported character '{}'", c),
        ));
    }
    Ok(())
}

/// Relative path for a new data file.
fn generate_data_file_path() -> String {
    format!(
        "{}part-{}-{}.parquet",
        DATA_DIR,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

/// Write timestamp encoded in a data file name.
pub(crate) fn data_file_timestamp_ms(path: &str) -> Option<i64> {
    let name = path.rsplit('/').next()?;
    let rest = name.strip_prefix("part-")?.strip_suffix(".parquet")?;
    let (millis, _) = rest.split_once('-')?;
    millis.parse().ok()
}

/// Reorder `batch` into the table's column order, matching columns by
/// name and type. Nullability follows the batch. `None` when the column
/// sets differ.
fn align_to_table(existing: &Schema, batch: &RecordBatch) -> Option<RecordBatch> {
    let incoming = batch.schema();
    if existing.fields().len() != incoming.fields().len() {
        return None;
    }

    let mut fields = Vec::with_capacity(existing.fields().len());
    let mut columns = Vec::with_capacity(existing.fields().len());
    for field in existing.fields() {
        let (idx, theirs) = incoming.column_with_name(field.name())?;
        if theirs.data_type() != field.data_type() {
            return None;
        }
        fields.push(field.as_ref().clone().with_nullable(theirs.is_nullable()));
        columns.push(batch.column(idx).clone());
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).ok()
}

fn describe_schema(schema: &Schema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Concatenate file batches whose schemas differ only in nullability.
fn concat_files(batches: Vec<RecordBatch>) -> Result<RecordBatch> {
    let Some(first) = batches.first() else {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    };

    let fields: Vec<_> = first
        .schema()
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let nullable = batches
                .iter()
                .any(|batch| batch.schema().field(idx).is_nullable());
            field.as_ref().clone().with_nullable(nullable)
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let aligned = batches
        .iter()
        .map(|batch| RecordBatch::try_new(schema.clone(), batch.columns().to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(concat_batches(&schema, &aligned)?)
}

/// Versioned Parquet tables under one tables prefix.
///
/// Single writer: concurrent commits of the same version are detected and
/// rejected, never merged.
#[derive(Debug, Clone)]
pub struct TableStore {
    op: Operator,
    tables_prefix: String,
    maintenance: MaintenanceConfig,
    parquet: ParquetOptions,
}

impl TableStore {
    pub fn new(
        op: Operator,
        tables_prefix: impl Into<String>,
        maintenance: MaintenanceConfig,
    ) -> Self {
        Self {
            op,
            tables_prefix: tables_prefix.into(),
            maintenance,
            parquet: ParquetOptions::default(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let op = build_operator(config)?;
        let parquet = ParquetOptions {
            row_group_size: config.storage.parquet_row_group_size,
            zstd_level: config.storage.parquet_zstd_level,
        };
        Ok(Self::new(
            op,
            config.lakehouse.tables_prefix.clone(),
            config.maintenance.clone(),
        )
        .with_parquet_options(parquet))
    }

    pub fn with_parquet_options(mut self, parquet: ParquetOptions) -> Self {
        self.parquet = parquet;
        self
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn maintenance(&self) -> &MaintenanceConfig {
        &self.maintenance
    }

    /// Directory of `table`, with a trailing slash.
    pub fn table_dir(&self, table: &str) -> Result<String> {
        validate_table_name(table)?;
        Ok(format!("{}{}/", self.tables_prefix, table))
    }

    /// Committed versions of `table`, oldest first.
    pub async fn versions(&self, table: &str) -> Result<Vec<u64>> {
        let dir = format!("{}{}", self.table_dir(table)?, MANIFEST_DIR);
        let mut versions: Vec<u64> = list_files(&self.op, &dir, ".json")
            .await?
            .iter()
            .filter_map(|path| parse_manifest_file_name(path))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    pub async fn exists(&self, table: &str) -> Result<bool> {
        Ok(!self.versions(table).await?.is_empty())
    }

    /// Manifest of one committed version.
    pub async fn manifest(&self, table: &str, version: u64) -> Result<Manifest> {
        let path = format!(
            "{}{}{}",
            self.table_dir(table)?,
            MANIFEST_DIR,
            manifest_file_name(version)
        );
        let buffer = match self.op.read(&path).await {
            Ok(buffer) => buffer,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                return Err(TableError::version_not_found(table, version));
            }
            Err(e) => return Err(TableError::storage(path, e)),
        };

        serde_json::from_slice(&buffer.to_bytes()).map_err(|e| TableError::corrupt_manifest(path, e))
    }

    /// Manifest of the latest version, or `None` for a table never written.
    pub async fn latest_manifest(&self, table: &str) -> Result<Option<Manifest>> {
        match self.versions(table).await?.last() {
            Some(&version) => Ok(Some(self.manifest(table, version).await?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn require_latest(&self, table: &str) -> Result<Manifest> {
        self.latest_manifest(table)
            .await?
            .ok_or_else(|| TableError::not_found(table))
    }

    /// Every committed version, newest first.
    pub async fn history(&self, table: &str) -> Result<Vec<Manifest>> {
        let versions = self.versions(table).await?;
        if versions.is_empty() {
            return Err(TableError::not_found(table));
        }

        let mut history = Vec::with_capacity(versions.len());
        for version in versions.into_iter().rev() {
            history.push(self.manifest(table, version).await?);
        }
        Ok(history)
    }

    /// Current contents of `table`.
    pub async fn read(&self, table: &str) -> Result<RecordBatch> {
        let manifest = self.require_latest(table).await?;
        self.read_manifest(table, &manifest).await
    }

    /// Contents of `table` as of `version`.
    pub async fn read_version(&self, table: &str, version: u64) -> Result<RecordBatch> {
        if !self.exists(table).await? {
            return Err(TableError::not_found(table));
        }
        let manifest = self.manifest(table, version).await?;
        self.read_manifest(table, &manifest).await
    }

    pub(crate) async fn read_manifest(
        &self,
        table: &str,
        manifest: &Manifest,
    ) -> Result<RecordBatch> {
        self.read_files(table, &manifest.files).await
    }

    pub(crate) async fn read_files(&self, table: &str, files: &[DataFile]) -> Result<RecordBatch> {
        let dir = self.table_dir(table)?;
        let mut batches = Vec::with_capacity(files.len());
        for file in files {
            let bytes = self.read_object(&format!("{}{}", dir, file.path)).await?;
            batches.push(read_parquet(bytes)?);
        }
        concat_files(batches)
    }

    async fn read_object(&self, path: &str) -> Result<Bytes> {
        let buffer = self
            .op
            .read(path)
            .await
            .map_err(|e| TableError::storage(path, e))?;
        Ok(buffer.to_bytes())
    }

    /// Schema of the latest version, read from its first data file.
    pub async fn schema(&self, table: &str) -> Result<SchemaRef> {
        let manifest = self.require_latest(table).await?;
        let file = manifest
            .files
            .first()
            .ok_or_else(|| TableError::not_found(table))?;
        let path = format!("{}{}", self.table_dir(table)?, file.path);
        Ok(read_parquet_schema(self.read_object(&path).await?)?)
    }

    /// Add `batch` to the table, creating it when absent.
    pub async fn append(&self, table: &str, batch: &RecordBatch) -> Result<Manifest> {
        self.write(table, batch, WriteMode::Append).await
    }

    /// Replace the table's contents and schema with `batch`.
    pub async fn overwrite(&self, table: &str, batch: &RecordBatch) -> Result<Manifest> {
        self.write(table, batch, WriteMode::Overwrite).await
    }

    pub async fn write(
        &self,
        table: &str,
        batch: &RecordBatch,
        mode: WriteMode,
    ) -> Result<Manifest> {
        let latest = self.latest_manifest(table).await?;

        let (mut files, batch) = match (&latest, mode) {
            (Some(manifest), WriteMode::Append) => {
                let existing = self.schema(table).await?;
                let aligned = align_to_table(&existing, batch).ok_or_else(|| {
                    TableError::schema_mismatch(
                        table,
                        format!(
                            "table has [{}], batch has [{}]",
                            describe_schema(&existing),
                            describe_schema(&batch.schema())
                        ),
                    )
                })?;
                (manifest.files.clone(), aligned)
            }
            _ => (Vec::new(), batch.clone()),
        };

        files.extend(self.write_data_files(table, &batch).await?);

        let version = latest.map_or(0, |m| m.version + 1);
        let manifest = self
            .commit(
                table,
                version,
                Operation::Write,
                Some(mode),
                files,
                BTreeMap::new(),
            )
            .await?;

        tracing::debug!(
            table,
            version,
            mode = %mode,
            rows = batch.num_rows(),
            "Committed write"
        );
        Ok(manifest)
    }

    /// Encode `batch` into one or more data files of at most
    /// `max_rows_per_file` rows. An empty batch still yields one file so
    /// the table keeps its schema.
    pub(crate) async fn write_data_files(
        &self,
        table: &str,
        batch: &RecordBatch,
    ) -> Result<Vec<DataFile>> {
        let dir = self.table_dir(table)?;
        let max_rows = self.maintenance.max_rows_per_file.max(1);

        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = max_rows.min(batch.num_rows() - offset);
            chunks.push(batch.slice(offset, len));
            offset += len;
        }
        if chunks.is_empty() {
            chunks.push(batch.clone());
        }

        let mut files = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let path = generate_data_file_path();
            let bytes = write_parquet(&chunk, &self.parquet)?;
            let size = bytes.len() as u64;
            let full_path = format!("{}{}", dir, path);

            tracing::debug!("Writing data file: {} ({} bytes)", full_path, size);
            self.op
                .write(&full_path, bytes)
                .await
                .map_err(|e| TableError::storage(&full_path, e))?;

            files.push(DataFile {
                path,
                size,
                rows: chunk.num_rows() as u64,
            });
        }
        Ok(files)
    }

    /// Publish a new version. Fails if `version` was already committed.
    /// Backends with conditional writes check and create the manifest in
    /// one request.
    pub(crate) async fn commit(
        &self,
        table: &str,
        version: u64,
        operation: Operation,
        mode: Option<WriteMode>,
        files: Vec<DataFile>,
        parameters: BTreeMap<String, serde_json::Value>,
    ) -> Result<Manifest> {
        let path = format!(
            "{}{}{}",
            self.table_dir(table)?,
            MANIFEST_DIR,
            manifest_file_name(version)
        );

        let conditional = self.op.info().full_capability().write_with_if_not_exists;
        if !conditional {
            let exists = self
                .op
                .exists(&path)
                .await
                .map_err(|e| TableError::storage(&path, e))?;
            if exists {
                return Err(TableError::concurrent_commit(table, version));
            }
        }

        let manifest = Manifest {
            version,
            timestamp_ms: Utc::now().timestamp_millis(),
            operation,
            mode,
            files,
            parameters,
        };
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| TableError::corrupt_manifest(&path, e))?;

        match self.op.write_with(&path, body).if_not_exists(conditional).await {
            Ok(_) => Ok(manifest),
            Err(e) if e.kind() == opendal::ErrorKind::ConditionNotMatch => {
                Err(TableError::concurrent_commit(table, version))
            }
            Err(e) => Err(TableError::storage(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field};
    use medallion_config::{FsConfig, StorageBackend};

    fn store() -> TableStore {
        TableStore::from_config(&RuntimeConfig::in_memory()).unwrap()
    }

    fn people(ids: &[i64], nullable: bool) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, nullable),
            Field::new("name", DataType::Utf8, true),
        ]));
        let names: Vec<String> = ids.iter().map(|id| format!("p{}", id)).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    fn ids(batch: &RecordBatch) -> Vec<i64> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    #[test]
    fn table_names() {
        for ok in ["orders", "bronze_orders", "dim-product", "sales.orders", "t1"] {
            assert!(validate_table_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "a/b", "a..b", ".a", "a.", "has space", "ünï"] {
            let err = validate_table_name(bad).unwrap_err();
            assert_eq!(err.code(), Some("E002"), "{bad}");
        }
    }

    #[test]
    fn data_file_timestamps() {
        let path = generate_data_file_path();
        assert!(path.starts_with("data/part-"));
        assert!(data_file_timestamp_ms(&path).is_some());
        assert_eq!(
            data_file_timestamp_ms("Tables/t/data/part-1700000000000-abc.parquet"),
            Some(1_700_000_000_000)
        );
        assert_eq!(data_file_timestamp_ms("data/other.parquet"), None);
    }

    #[tokio::test]
    async fn append_creates_then_extends() {
        let store = store();
        assert!(!store.exists("people").await.unwrap());

        let v0 = store.append("people", &people(&[1, 2], false)).await.unwrap();
        let v1 = store.append("people", &people(&[3], true)).await.unwrap();

        assert_eq!(v0.version, 0);
        assert_eq!(v1.version, 1);
        assert_eq!(v1.files.len(), 2);
        assert_eq!(v1.mode, Some(WriteMode::Append));
        assert!(store.exists("people").await.unwrap());

        let all = store.read("people").await.unwrap();
        assert_eq!(ids(&all), vec![1, 2, 3]);
        assert!(all.schema().field(0).is_nullable());
    }

    #[tokio::test]
    async fn overwrite_replaces_files_and_schema() {
        let store = store();
        store.append("t", &people(&[1, 2, 3], false)).await.unwrap();

        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("code", DataType::Utf8, false)])),
            vec![Arc::new(StringArray::from(vec!["x"]))],
        )
        .unwrap();
        let manifest = store.overwrite("t", &other).await.unwrap();
        assert_eq!(manifest.files.len(), 1);

        let current = store.read("t").await.unwrap();
        assert_eq!(current.num_rows(), 1);
        assert_eq!(current.schema().field(0).name(), "code");

        // Time travel still sees the first version.
        let first = store.read_version("t", 0).await.unwrap();
        assert_eq!(ids(&first), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn append_rejects_different_schema() {
        let store = store();
        store.append("t", &people(&[1], false)).await.unwrap();

        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)])),
            vec![Arc::new(StringArray::from(vec!["1"]))],
        )
        .unwrap();
        let err = store.append("t", &other).await.unwrap_err();
        assert_eq!(err.code(), Some("E003"));
    }

    #[tokio::test]
    async fn append_matches_columns_by_name() {
        let store = store();
        store.append("t", &people(&[1], false)).await.unwrap();

        let reordered = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("name", DataType::Utf8, true),
                Field::new("id", DataType::Int64, true),
            ])),
            vec![
                Arc::new(StringArray::from(vec!["p2"])),
                Arc::new(Int64Array::from(vec![2])),
            ],
        )
        .unwrap();
        store.append("t", &reordered).await.unwrap();

        let all = store.read("t").await.unwrap();
        assert_eq!(all.schema().field(0).name(), "id");
        assert_eq!(ids(&all), vec![1, 2]);
        let names = all
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(1), "p2");

        let renamed = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("label", DataType::Utf8, true),
            ])),
            vec![
                Arc::new(Int64Array::from(vec![3])),
                Arc::new(StringArray::from(vec!["p3"])),
            ],
        )
        .unwrap();
        let err = store.append("t", &renamed).await.unwrap_err();
        assert_eq!(err.code(), Some("E003"));
    }

    #[tokio::test]
    async fn empty_write_keeps_schema() {
        let store = store();
        store.overwrite("empty", &people(&[], false)).await.unwrap();

        let batch = store.read("empty").await.unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(store.schema("empty").await.unwrap().field(1).name(), "name");
    }

    #[tokio::test]
    async fn large_writes_split_by_row_limit() {
        let mut config = RuntimeConfig::in_memory();
        config.maintenance.max_rows_per_file = 2;
        let store = TableStore::from_config(&config).unwrap();

        let manifest = store.append("t", &people(&[1, 2, 3, 4, 5], false)).await.unwrap();
        let rows: Vec<u64> = manifest.files.iter().map(|f| f.rows).collect();
        assert_eq!(rows, vec![2, 2, 1]);
        assert_eq!(ids(&store.read("t").await.unwrap()), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn parquet_options_follow_config() {
        let mut config = RuntimeConfig::in_memory();
        config.storage.parquet_row_group_size = 1024;
        config.storage.parquet_zstd_level = 7;
        let store = TableStore::from_config(&config).unwrap();
        assert_eq!(
            store.parquet,
            ParquetOptions {
                row_group_size: 1024,
                zstd_level: 7,
            }
        );
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = store();
        store.append("t", &people(&[1], false)).await.unwrap();
        store.overwrite("t", &people(&[2], false)).await.unwrap();

        let history = store.history("t").await.unwrap();
        let versions: Vec<u64> = history.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 0]);
        assert_eq!(history[0].mode, Some(WriteMode::Overwrite));
        assert_eq!(history[0].operation, Operation::Write);
    }

    #[tokio::test]
    async fn missing_tables_and_versions() {
        let store = store();
        assert_eq!(store.read("nope").await.unwrap_err().code(), Some("E001"));
        assert_eq!(store.history("nope").await.unwrap_err().code(), Some("E001"));

        store.append("t", &people(&[1], false)).await.unwrap();
        assert_eq!(
            store.read_version("t", 9).await.unwrap_err().code(),
            Some("E008")
        );
    }

    #[tokio::test]
    async fn committed_versions_are_never_replaced() {
        let store = store();
        let manifest = store.append("t", &people(&[1], false)).await.unwrap();

        let err = store
            .commit(
                "t",
                manifest.version,
                Operation::Write,
                Some(WriteMode::Append),
                Vec::new(),
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("E006"));
        assert_eq!(store.read("t").await.unwrap().num_rows(), 1);
    }

    #[tokio::test]
    async fn filesystem_commits_are_conditional() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::Fs;
        config.storage.fs = Some(FsConfig {
            path: dir.path().to_string_lossy().into_owned(),
        });
        let store = TableStore::from_config(&config).unwrap();
        assert!(store.operator().info().full_capability().write_with_if_not_exists);

        store.append("t", &people(&[1], false)).await.unwrap();
        let err = store
            .commit(
                "t",
                0,
                Operation::Write,
                Some(WriteMode::Overwrite),
                Vec::new(),
                BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("E006"));
        assert_eq!(ids(&store.read("t").await.unwrap()), vec![1]);
    }
}
