//! Z-order clustering.
//!
//! Each clustering column is reduced to a dense rank, the ranks are scaled
//! to a fixed bit width, and their bits are interleaved into one 128-bit
//! key. Sorting by that key keeps rows that are close in *every* column
//! close on disk, which is what lets readers skip files on multi-column
//! filters.

use arrow::array::{RecordBatch, UInt32Array};
use arrow::compute::take_record_batch;
use arrow::row::{RowConverter, SortField};

use crate::{column, PipelineError, Result};

const KEY_BITS: usize = 128;
const MAX_BITS_PER_COLUMN: usize = 32;

/// Dense rank of every row for one column; equal values share a rank.
fn dense_ranks(batch: &RecordBatch, name: &str) -> Result<(Vec<u64>, u64)> {
    let array = column(batch, name)?.clone();
    let converter = RowConverter::new(vec![SortField::new(array.data_type().clone())])?;
    let rows = converter.convert_columns(&[array])?;

    let mut order: Vec<usize> = (0..batch.num_rows()).collect();
    order.sort_by(|&a, &b| rows.row(a).cmp(&rows.row(b)));

    let mut ranks = vec![0u64; batch.num_rows()];
    let mut current = 0u64;
    for (pos, &row) in order.iter().enumerate() {
        if pos > 0 && rows.row(order[pos - 1]) != rows.row(row) {
            current += 1;
        }
        ranks[row] = current;
    }
    Ok((ranks, current))
}

/// Interleave the top `bits` bits of each value, most significant first.
fn interleave(values: &[u64], bits: usize) -> u128 {
    let mut key = 0u128;
    for bit in (0..bits).rev() {
        for value in values {
            key = (key << 1) | u128::from((value >> bit) & 1);
        }
    }
    key
}

/// Row order that sorts `batch` along the Z-curve of `columns`.
pub fn z_order_indices(batch: &RecordBatch, columns: &[&str]) -> Result<UInt32Array> {
    if columns.is_empty() {
        return Err(PipelineError::InvalidInput(
            "z-order requires at least one column".to_string(),
        ));
    }

    let bits = (KEY_BITS / columns.len()).min(MAX_BITS_PER_COLUMN);
    let scale_max = (1u128 << bits) - 1;

    let mut scaled = Vec::with_capacity(columns.len());
    for name in columns {
        let (ranks, max_rank) = dense_ranks(batch, name)?;
        let column_scaled: Vec<u64> = ranks
            .into_iter()
            .map(|rank| {
                if max_rank == 0 {
                    0
                } else {
                    (u128::from(rank) * scale_max / u128::from(max_rank)) as u64
                }
            })
            .collect();
        scaled.push(column_scaled);
    }

    let mut keyed: Vec<(u128, u32)> = (0..batch.num_rows())
        .map(|row| {
            let values: Vec<u64> = scaled.iter().map(|ranks| ranks[row]).collect();
            (interleave(&values, bits), row as u32)
        })
        .collect();
    keyed.sort_unstable();

    Ok(UInt32Array::from(
        keyed.into_iter().map(|(_, row)| row).collect::<Vec<_>>(),
    ))
}

/// Reorder `batch` along the Z-curve of `columns`.
pub fn z_order(batch: &RecordBatch, columns: &[&str]) -> Result<RecordBatch> {
    let indices = z_order_indices(batch, columns)?;
    Ok(take_record_batch(batch, &indices)?)
}
