//! Bronze ingestion: raw CSV/JSON bytes into Arrow batches.
//!
//! Schemas are inferred from content. Ingested rows are tagged with the
//! ingestion time and the file they came from so later layers can dedupe on
//! arrival order.

use arrow::array::{ArrayRef, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, TimeUnit};
use arrow::error::ArrowError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

use crate::{with_column, PipelineError, Result};

pub const INGESTED_AT_COLUMN: &str = "_ingested_at";
pub const SOURCE_FILE_COLUMN: &str = "_source_file";

/// Parse a CSV file with a header row, inferring column types.
pub fn read_csv(bytes: &[u8]) -> Result<RecordBatch> {
    let format = Format::default().with_header(true);
    let (schema, records) = format.infer_schema(Cursor::new(bytes), None)?;
    if schema.fields().is_empty() {
        return Err(PipelineError::InvalidInput(
            "CSV input has no header row".to_string(),
        ));
    }

    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(Cursor::new(bytes))?;
    let batches = reader.collect::<std::result::Result<Vec<_>, ArrowError>>()?;

    tracing::debug!(
        columns = schema.fields().len(),
        records,
        "Parsed CSV input"
    );
    Ok(concat_batches(&schema, &batches)?)
}

/// Parse JSON records, inferring column types.
///
/// Accepts a pretty-printed top-level array of objects, a single object, or
/// a stream of objects (newline-delimited or concatenated). Nested objects
/// become struct columns.
pub fn read_json(bytes: &[u8]) -> Result<RecordBatch> {
    let mut rows = Vec::new();
    for value in serde_json::Deserializer::from_slice(bytes).into_iter::<Value>() {
        match value? {
            Value::Array(items) => rows.extend(items),
            other => rows.push(other),
        }
    }

    if rows.is_empty() {
        return Err(PipelineError::InvalidInput(
            "JSON input contains no records".to_string(),
        ));
    }
    if let Some(bad) = rows.iter().position(|row| !row.is_object()) {
        return Err(PipelineError::InvalidInput(format!(
            "JSON record {} is not an object",
            bad
        )));
    }

    let schema = arrow::json::reader::infer_json_schema_from_iterator(
        rows.iter().map(|row| Ok(row.clone())),
    )?;
    let schema = Arc::new(schema);

    let mut decoder = arrow::json::ReaderBuilder::new(schema.clone())
        .with_batch_size(rows.len())
        .build_decoder()?;
    decoder.serialize(&rows)?;
    let batch = decoder
        .flush()?
        .unwrap_or_else(|| RecordBatch::new_empty(schema));

    tracing::debug!(records = batch.num_rows(), "Parsed JSON input");
    Ok(batch)
}

/// Append (or replace) the `_ingested_at` and `_source_file` columns.
pub fn tag_ingestion(
    batch: &RecordBatch,
    source_file: &str,
    ingested_at: DateTime<Utc>,
) -> Result<RecordBatch> {
    let rows = batch.num_rows();

    let ingested: ArrayRef = Arc::new(
        TimestampMicrosecondArray::from(vec![ingested_at.timestamp_micros(); rows])
            .with_timezone("UTC"),
    );
    let source: ArrayRef = Arc::new(StringArray::from(vec![source_file; rows]));

    let batch = with_column(
        batch,
        Field::new(
            INGESTED_AT_COLUMN,
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        ingested,
    )?;
    with_column(
        &batch,
        Field::new(SOURCE_FILE_COLUMN, DataType::Utf8, false),
        source,
    )
}
