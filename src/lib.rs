// medallion - Bronze → Silver → Gold pipelines over versioned Parquet tables
//
// `Lakehouse` ties the pure transforms in medallion-core to the table store
// in medallion-table:
// - Bronze: raw CSV/JSON files from the files area, tagged and appended
// - Silver: deduplicated, standardized, null-checked and overwritten
// - Gold: fact tables keyed by dimension lookups
// - Maintenance and quality reports on any table

use arrow::array::RecordBatch;
use bytes::Bytes;
use chrono::Utc;
use medallion_config::RuntimeConfig;
use medallion_core::aggregate::build_fact;
use medallion_core::{
    deduplicate, read_csv, read_json, run_quality_checks, standardize_strings, tag_ingestion,
    validate_not_null, DimensionLookup, PipelineError, Predicate, QualityReport,
    DEFAULT_MEASURE_PREFIXES, DEFAULT_ORDER_COLUMN,
};
use medallion_table::{Manifest, OptimizeMetrics, TableError, TableStore, VacuumMetrics};
use opendal::Operator;
use thiserror::Error;

mod init;

pub use init::init_tracing;

/// Errors surfaced by pipeline steps.
#[derive(Debug, Error)]
pub enum LakehouseError {
    #[error("Failed to read source file '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("Failed to store source file '{path}': {source}")]
    Upload {
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("Unsupported source format for '{0}' (expected .csv or .json)")]
    UnknownFormat(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, LakehouseError>;

/// Raw file formats accepted by Bronze ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: &str) -> Result<Self> {
        let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("json") | Some("jsonl") | Some("ndjson") => Ok(Self::Json),
            _ => Err(LakehouseError::UnknownFormat(path.to_string())),
        }
    }
}

/// Silver cleaning steps, applied in field order.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub key_columns: Vec<String>,
    pub order_column: String,
    pub standardize_columns: Vec<String>,
    pub not_null_columns: Vec<String>,
}

impl CleanOptions {
    pub fn new<S: Into<String>>(key_columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
            standardize_columns: Vec::new(),
            not_null_columns: Vec::new(),
        }
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_column = column.into();
        self
    }

    pub fn standardize<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.standardize_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn require_not_null<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.not_null_columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// A lakehouse: a files area for raw inputs and a table store for
/// everything derived from them.
#[derive(Debug, Clone)]
pub struct Lakehouse {
    store: TableStore,
    files_prefix: String,
    measure_prefixes: Vec<String>,
}

impl Lakehouse {
    /// Open the lakehouse described by `config`.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let store = TableStore::from_config(config)?;
        Ok(Self::with_store(
            store,
            config.lakehouse.files_prefix.clone(),
        ))
    }

    pub fn with_store(store: TableStore, files_prefix: impl Into<String>) -> Self {
        Self {
            store,
            files_prefix: files_prefix.into(),
            measure_prefixes: DEFAULT_MEASURE_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    /// Column name prefixes that mark measures in fact tables.
    pub fn with_measure_prefixes<S: Into<String>>(
        mut self,
        prefixes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.measure_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    fn operator(&self) -> &Operator {
        self.store.operator()
    }

    fn file_path(&self, file_path: &str) -> String {
        if file_path.starts_with(&self.files_prefix) {
            file_path.to_string()
        } else {
            format!("{}{}", self.files_prefix, file_path.trim_start_matches('/'))
        }
    }

    /// Place a raw file in the files area.
    pub async fn upload_file(&self, file_path: &str, contents: Vec<u8>) -> Result<String> {
        let path = self.file_path(file_path);
        self.operator()
            .write(&path, contents)
            .await
            .map_err(|source| LakehouseError::Upload {
                path: path.clone(),
                source,
            })?;
        tracing::debug!("Uploaded source file: {}", path);
        Ok(path)
    }

    /// Raw bytes of a file in the files area.
    pub async fn read_file(&self, file_path: &str) -> Result<Bytes> {
        let path = self.file_path(file_path);
        let buffer = self
            .operator()
            .read(&path)
            .await
            .map_err(|source| LakehouseError::Source { path, source })?;
        Ok(buffer.to_bytes())
    }

    /// Read a CSV file from the files area and append it to a Bronze table.
    pub async fn ingest_csv_to_bronze(&self, file_path: &str, table: &str) -> Result<RecordBatch> {
        self.ingest_to_bronze(file_path, table, SourceFormat::Csv)
            .await
    }

    /// Read a JSON file from the files area and append it to a Bronze table.
    pub async fn ingest_json_to_bronze(&self, file_path: &str, table: &str) -> Result<RecordBatch> {
        self.ingest_to_bronze(file_path, table, SourceFormat::Json)
            .await
    }

    pub async fn ingest_to_bronze(
        &self,
        file_path: &str,
        table: &str,
        format: SourceFormat,
    ) -> Result<RecordBatch> {
        let bytes = self.read_file(file_path).await?;
        let raw = match format {
            SourceFormat::Csv => read_csv(&bytes)?,
            SourceFormat::Json => read_json(&bytes)?,
        };

        let tagged = tag_ingestion(&raw, file_path, Utc::now())?;
        self.store.append(table, &tagged).await?;

        tracing::info!("✓ Ingested {} rows → {}", tagged.num_rows(), table);
        Ok(tagged)
    }

    /// Bronze → Silver: deduplicate, standardize, validate, then replace the
    /// Silver table. Validation failures leave the Silver table untouched.
    pub async fn clean_to_silver(
        &self,
        bronze_table: &str,
        silver_table: &str,
        options: &CleanOptions,
    ) -> Result<RecordBatch> {
        let bronze = self.store.read(bronze_table).await?;

        let deduped = deduplicate(
            &bronze,
            &as_strs(&options.key_columns),
            &options.order_column,
        )?;
        let standardized = standardize_strings(&deduped, &as_strs(&options.standardize_columns))?;
        validate_not_null(
            &standardized,
            &as_strs(&options.not_null_columns),
            silver_table,
        )?;

        self.store.overwrite(silver_table, &standardized).await?;

        tracing::info!(
            "✓ Cleaned {} → {}: {} rows ({} duplicates dropped)",
            bronze_table,
            silver_table,
            standardized.num_rows(),
            bronze.num_rows() - deduped.num_rows()
        );
        Ok(standardized)
    }

    /// Silver → Gold: resolve every dimension lookup, keep keys and
    /// measures, and overwrite `output_table`.
    pub async fn build_fact_table(
        &self,
        silver_table: &str,
        lookups: &[DimensionLookup],
        output_table: &str,
    ) -> Result<RecordBatch> {
        let fact = self.store.read(silver_table).await?;

        let mut dimensions = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            let dim = self.store.read(&lookup.table).await?;
            dimensions.push((lookup.clone(), dim));
        }

        let prefixes = as_strs(&self.measure_prefixes);
        let gold = build_fact(&fact, &dimensions, &prefixes)?;
        self.store.overwrite(output_table, &gold).await?;

        tracing::info!("✓ Built {}: {} rows", output_table, gold.num_rows());
        Ok(gold)
    }

    /// Compact small files, or Z-order the table when columns are given.
    pub async fn optimize_table(
        &self,
        table: &str,
        z_order_columns: &[&str],
    ) -> Result<OptimizeMetrics> {
        Ok(self.store.optimize(table, z_order_columns).await?)
    }

    /// Delete files outside the retention window. `None` uses the
    /// configured default retention.
    pub async fn vacuum_table(
        &self,
        table: &str,
        retention_hours: Option<u64>,
        dry_run: bool,
    ) -> Result<VacuumMetrics> {
        Ok(self.store.vacuum(table, retention_hours, dry_run).await?)
    }

    /// Report-only quality checks against the current version of `table`.
    pub async fn run_quality_checks<S: AsRef<str>>(
        &self,
        table: &str,
        checks: &[(S, Predicate)],
    ) -> Result<QualityReport> {
        let batch = self.store.read(table).await?;
        Ok(run_quality_checks(&batch, table, checks)?)
    }

    /// Latest contents of `table`, or its contents at `version`.
    pub async fn read_table(&self, table: &str, version: Option<u64>) -> Result<RecordBatch> {
        let batch = match version {
            Some(version) => self.store.read_version(table, version).await?,
            None => self.store.read(table).await?,
        };
        Ok(batch)
    }

    /// Committed versions of `table`, newest first.
    pub async fn history(&self, table: &str) -> Result<Vec<Manifest>> {
        Ok(self.store.history(table).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_format_from_extension() {
        assert_eq!(SourceFormat::from_path("a/orders.csv").unwrap(), SourceFormat::Csv);
        assert_eq!(SourceFormat::from_path("ORDERS.JSON").unwrap(), SourceFormat::Json);
        assert_eq!(SourceFormat::from_path("events.ndjson").unwrap(), SourceFormat::Json);
        assert!(matches!(
            SourceFormat::from_path("orders.parquet"),
            Err(LakehouseError::UnknownFormat(_))
        ));
        assert!(SourceFormat::from_path("README").is_err());
    }

    #[test]
    fn files_area_paths() {
        let lakehouse = Lakehouse::new(&RuntimeConfig::in_memory()).unwrap();
        assert_eq!(lakehouse.file_path("raw/orders.csv"), "Files/raw/orders.csv");
        assert_eq!(lakehouse.file_path("/orders.csv"), "Files/orders.csv");
        assert_eq!(lakehouse.file_path("Files/orders.csv"), "Files/orders.csv");
    }

    #[test]
    fn clean_options_default_order_column() {
        let options = CleanOptions::new(["id"]).standardize(["status"]);
        assert_eq!(options.order_column, "_ingested_at");
        assert_eq!(options.key_columns, vec!["id"]);
        assert!(options.not_null_columns.is_empty());
    }
}
