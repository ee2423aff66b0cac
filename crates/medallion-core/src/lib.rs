// medallion-core - Pure dataset transforms for the medallion pattern
//
// Every function here takes Arrow record batches in and hands record batches
// back. No I/O, no async, no storage: the table crate owns persistence and
// the root crate wires the two together.
//
// - ingest: CSV/JSON bytes → batch, plus ingestion metadata columns (Bronze)
// - clean: dedupe, string standardization, not-null validation (Silver)
// - aggregate: dimension joins and fact projection (Gold)
// - quality: named predicates with failure counts and rates
// - zorder: multi-column clustering order for table optimization
// - parquet: shared Parquet encoding and decoding

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::{Field, Schema};
use std::sync::Arc;

pub mod aggregate;
pub mod clean;
mod error;
pub mod forecast;
pub mod ingest;
pub mod parquet;
pub mod quality;
pub mod zorder;

pub use aggregate::{join_dimension, project_fact, DimensionLookup, DEFAULT_MEASURE_PREFIXES};
pub use clean::{deduplicate, standardize_strings, validate_not_null, DEFAULT_ORDER_COLUMN};
pub use error::{PipelineError, Result};
pub use ingest::{read_csv, read_json, tag_ingestion, INGESTED_AT_COLUMN, SOURCE_FILE_COLUMN};
pub use quality::{run_quality_checks, CheckResult, Predicate, QualityReport, QualityRule};

/// Look up a column by name, mapping a miss to `PipelineError::ColumnNotFound`.
pub(crate) fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::ColumnNotFound(name.to_string()))
}

/// Index of a column in the batch schema.
pub(crate) fn column_index(batch: &RecordBatch, name: &str) -> Result<usize> {
    batch
        .schema()
        .index_of(name)
        .map_err(|_| PipelineError::ColumnNotFound(name.to_string()))
}

/// Replace the column named like `field`, or append it when absent.
pub(crate) fn with_column(batch: &RecordBatch, field: Field, array: ArrayRef) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns = batch.columns().to_vec();

    match schema.index_of(field.name()) {
        Ok(idx) => {
            fields[idx] = field;
            columns[idx] = array;
        }
        Err(_) => {
            fields.push(field);
            columns.push(array);
        }
    }

    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    Ok(RecordBatch::try_new(schema, columns)?)
}
