//! Gold aggregation: dimension key lookups and fact projection.

use arrow::array::{Array, RecordBatch, UInt32Array};
use arrow::compute::{can_cast_types, cast, take, take_record_batch};
use arrow::row::{RowConverter, SortField};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{column, column_index, with_column, PipelineError, Result};

/// Columns whose names start with one of these are treated as measures.
pub const DEFAULT_MEASURE_PREFIXES: &[&str] = &["amount", "quantity"];

/// One dimension to resolve: join `table` on `join_column`, pick up `key_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionLookup {
    pub table: String,
    pub join_column: String,
    pub key_column: String,
}

impl DimensionLookup {
    pub fn new(
        table: impl Into<String>,
        join_column: impl Into<String>,
        key_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            join_column: join_column.into(),
            key_column: key_column.into(),
        }
    }
}

/// Inner equi-join of `fact` against `dim` on `join_column`, appending the
/// dimension's `key_column`.
///
/// Fact rows without a match are dropped; null keys never match. A fact row
/// matching several dimension rows appears once per match.
pub fn join_dimension(
    fact: &RecordBatch,
    dim: &RecordBatch,
    join_column: &str,
    key_column: &str,
) -> Result<RecordBatch> {
    let fact_key = column(fact, join_column)?;
    let dim_key = column(dim, join_column)?;
    let dim_value = column(dim, key_column)?;

    let key_type = fact_key.data_type().clone();
    let dim_key = if dim_key.data_type() == &key_type {
        dim_key.clone()
    } else if can_cast_types(dim_key.data_type(), &key_type) {
        cast(dim_key, &key_type)?
    } else {
        return Err(PipelineError::UnsupportedType {
            column: join_column.to_string(),
            data_type: dim_key.data_type().clone(),
            operation: "dimension join",
        });
    };

    let converter = RowConverter::new(vec![SortField::new(key_type)])?;
    let fact_rows = converter.convert_columns(&[fact_key.clone()])?;
    let dim_rows = converter.convert_columns(&[dim_key.clone()])?;

    let mut lookup: HashMap<_, Vec<u32>> = HashMap::with_capacity(dim.num_rows());
    for idx in 0..dim.num_rows() {
        if dim_key.is_valid(idx) {
            lookup.entry(dim_rows.row(idx)).or_default().push(idx as u32);
        }
    }

    let mut fact_indices = Vec::with_capacity(fact.num_rows());
    let mut dim_indices = Vec::with_capacity(fact.num_rows());
    for idx in 0..fact.num_rows() {
        if !fact_key.is_valid(idx) {
            continue;
        }
        if let Some(matches) = lookup.get(&fact_rows.row(idx)) {
            for &dim_idx in matches {
                fact_indices.push(idx as u32);
                dim_indices.push(dim_idx);
            }
        }
    }

    let joined = take_record_batch(fact, &UInt32Array::from(fact_indices))?;
    if key_column == join_column {
        return Ok(joined);
    }

    let keys = take(dim_value.as_ref(), &UInt32Array::from(dim_indices), None)?;
    let field = dim.schema().field_with_name(key_column)?.clone();

    tracing::debug!(
        fact_rows = fact.num_rows(),
        joined_rows = joined.num_rows(),
        join_column,
        key_column,
        "Joined dimension"
    );

    with_column(&joined, field, keys)
}

/// Keep the key columns (in the given order) followed by every measure
/// column (in schema order).
pub fn project_fact(
    batch: &RecordBatch,
    key_columns: &[&str],
    measure_prefixes: &[&str],
) -> Result<RecordBatch> {
    let mut indices = key_columns
        .iter()
        .map(|name| column_index(batch, name))
        .collect::<Result<Vec<_>>>()?;

    for (idx, field) in batch.schema().fields().iter().enumerate() {
        let is_measure = measure_prefixes
            .iter()
            .any(|prefix| field.name().starts_with(prefix));
        if is_measure && !indices.contains(&idx) {
            indices.push(idx);
        }
    }

    Ok(batch.project(&indices)?)
}

/// Resolve every dimension in order, then project keys and measures.
pub fn build_fact(
    fact: &RecordBatch,
    dimensions: &[(DimensionLookup, RecordBatch)],
    measure_prefixes: &[&str],
) -> Result<RecordBatch> {
    let mut joined = fact.clone();
    for (lookup, dim) in dimensions {
        joined = join_dimension(&joined, dim, &lookup.join_column, &lookup.key_column)?;
    }

    let key_columns: Vec<&str> = dimensions
        .iter()
        .map(|(lookup, _)| lookup.key_column.as_str())
        .collect();
    project_fact(&joined, &key_columns, measure_prefixes)
}
