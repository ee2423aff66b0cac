//! Silver cleaning: deduplication, string standardization, null validation.

use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, UInt32Array};
use arrow::compute::{can_cast_types, cast, take_record_batch};
use arrow::datatypes::{DataType, Field};
use arrow::row::{RowConverter, SortField};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ingest::INGESTED_AT_COLUMN;
use crate::{column, column_index, with_column, PipelineError, Result};

/// Column that decides which duplicate survives when none is given.
pub const DEFAULT_ORDER_COLUMN: &str = INGESTED_AT_COLUMN;

/// Keep exactly one row per key: the one with the greatest `order_column`.
///
/// Null order values sort below every non-null value. On ties the earliest
/// row wins. Rows with null keys group together. Surviving rows keep their
/// input order.
pub fn deduplicate(
    batch: &RecordBatch,
    key_columns: &[&str],
    order_column: &str,
) -> Result<RecordBatch> {
    if key_columns.is_empty() {
        return Err(PipelineError::InvalidInput(
            "deduplicate requires at least one key column".to_string(),
        ));
    }

    let key_arrays = key_columns
        .iter()
        .map(|name| column(batch, name).cloned())
        .collect::<Result<Vec<ArrayRef>>>()?;
    let order = column(batch, order_column)?.clone();

    let key_converter = RowConverter::new(
        key_arrays
            .iter()
            .map(|array| SortField::new(array.data_type().clone()))
            .collect(),
    )?;
    let keys = key_converter.convert_columns(&key_arrays)?;

    let order_converter = RowConverter::new(vec![SortField::new(order.data_type().clone())])?;
    let orders = order_converter.convert_columns(&[order])?;

    let mut latest = HashMap::with_capacity(batch.num_rows());
    for idx in 0..batch.num_rows() {
        match latest.entry(keys.row(idx)) {
            Entry::Vacant(slot) => {
                slot.insert(idx);
            }
            Entry::Occupied(mut slot) => {
                if orders.row(idx) > orders.row(*slot.get()) {
                    slot.insert(idx);
                }
            }
        }
    }

    let mut kept: Vec<u32> = latest.into_values().map(|idx| idx as u32).collect();
    kept.sort_unstable();

    tracing::debug!(
        input_rows = batch.num_rows(),
        kept_rows = kept.len(),
        keys = ?key_columns,
        "Deduplicated batch"
    );

    Ok(take_record_batch(batch, &UInt32Array::from(kept))?)
}

/// Lowercase and trim each named column.
///
/// Non-string columns are cast to utf8 first; nulls stay null.
pub fn standardize_strings(batch: &RecordBatch, columns: &[&str]) -> Result<RecordBatch> {
    let mut out = batch.clone();

    for name in columns {
        let idx = column_index(&out, name)?;
        let source = out.column(idx);
        let nullable = out.schema().field(idx).is_nullable();

        let strings = if source.data_type() == &DataType::Utf8 {
            source.clone()
        } else if can_cast_types(source.data_type(), &DataType::Utf8) {
            cast(source, &DataType::Utf8)?
        } else {
            return Err(PipelineError::UnsupportedType {
                column: name.to_string(),
                data_type: source.data_type().clone(),
                operation: "standardize_strings",
            });
        };

        let strings = strings
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| PipelineError::UnsupportedType {
                column: name.to_string(),
                data_type: strings.data_type().clone(),
                operation: "standardize_strings",
            })?;

        let normalized: StringArray = strings
            .iter()
            .map(|value| value.map(|s| s.to_lowercase().trim().to_string()))
            .collect();

        out = with_column(
            &out,
            Field::new(*name, DataType::Utf8, nullable),
            Arc::new(normalized),
        )?;
    }

    Ok(out)
}

/// Fail on the first listed column that contains nulls.
pub fn validate_not_null(batch: &RecordBatch, columns: &[&str], table_name: &str) -> Result<()> {
    for name in columns {
        let count = column(batch, name)?.logical_null_count();
        if count > 0 {
            tracing::warn!(
                table = table_name,
                column = *name,
                nulls = count,
                "Null values in required column"
            );
            return Err(PipelineError::NullValues {
                table: table_name.to_string(),
                column: name.to_string(),
                count,
            });
        }
    }

    tracing::info!("✓ {}: no nulls in {:?}", table_name, columns);
    Ok(())
}
