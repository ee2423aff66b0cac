//! Forecast input profiling against `ForecastConfig` quality thresholds.

use arrow::array::{Array, RecordBatch, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use medallion_config::ForecastConfig;
use std::collections::BTreeMap;

use crate::{column, PipelineError, Result};

/// Shape of a forecasting dataset as seen by the quality thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryProfile {
    pub rows: usize,
    pub target_null_ratio: f64,
    pub series_count: usize,
    /// Series with at least `min_history_periods` observations.
    pub eligible_series: usize,
    /// Series below `min_history_periods`, with their observation counts.
    pub short_series: Vec<(String, usize)>,
}

/// Check `batch` against the config's data quality thresholds.
///
/// Fails when the target column's null ratio exceeds `max_null_ratio`, or
/// when fewer than `min_series_count` series have at least
/// `min_history_periods` observations. Short series alone are reported, not
/// rejected.
pub fn validate_history(batch: &RecordBatch, config: &ForecastConfig) -> Result<HistoryProfile> {
    let rows = batch.num_rows();
    column(batch, &config.time_col)?;

    let target = column(batch, &config.target_col)?;
    let target_null_ratio = if rows == 0 {
        0.0
    } else {
        target.logical_null_count() as f64 / rows as f64
    };
    if target_null_ratio > config.max_null_ratio {
        return Err(PipelineError::HistoryThreshold {
            check: "max_null_ratio",
            detail: format!(
                "{:.1}% of '{}' is null, limit is {:.1}%",
                target_null_ratio * 100.0,
                config.target_col,
                config.max_null_ratio * 100.0
            ),
        });
    }

    let ids = cast(column(batch, &config.id_col)?, &DataType::Utf8)?;
    let ids = ids
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PipelineError::UnsupportedType {
            column: config.id_col.clone(),
            data_type: ids.data_type().clone(),
            operation: "forecast history",
        })?;

    let mut lengths: BTreeMap<String, usize> = BTreeMap::new();
    for id in ids.iter() {
        *lengths.entry(id.unwrap_or("<null>").to_string()).or_default() += 1;
    }

    let series_count = lengths.len();
    let short_series: Vec<(String, usize)> = lengths
        .into_iter()
        .filter(|(_, len)| *len < config.min_history_periods)
        .collect();
    let eligible_series = series_count - short_series.len();

    if eligible_series < config.min_series_count {
        return Err(PipelineError::HistoryThreshold {
            check: "min_series_count",
            detail: format!(
                "{} series have at least {} periods, need {}",
                eligible_series, config.min_history_periods, config.min_series_count
            ),
        });
    }

    if !short_series.is_empty() {
        tracing::warn!(
            short = short_series.len(),
            min_history_periods = config.min_history_periods,
            "Series below minimum history length"
        );
    }

    Ok(HistoryProfile {
        rows,
        target_null_ratio,
        series_count,
        eligible_series,
        short_series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn config(min_history: usize, min_series: usize) -> ForecastConfig {
        ForecastConfig::builder("demand", "ws", "lh")
            .columns("period", "units", "sku")
            .quality_thresholds(0.25, min_history, min_series)
            .build()
            .unwrap()
    }

    fn history(units: Vec<Option<f64>>) -> RecordBatch {
        let n = units.len();
        let skus: Vec<&str> = (0..n).map(|i| if i < 3 { "a" } else { "b" }).collect();
        let schema = Arc::new(Schema::new(vec![
            Field::new("sku", DataType::Utf8, false),
            Field::new("period", DataType::Int64, false),
            Field::new("units", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(skus)),
                Arc::new(Int64Array::from((0..n as i64).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(units)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn profiles_series_lengths() {
        let batch = history(vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None]);
        let profile = validate_history(&batch, &config(3, 1)).unwrap();

        assert_eq!(profile.rows, 5);
        assert_eq!(profile.series_count, 2);
        assert_eq!(profile.eligible_series, 1);
        assert_eq!(profile.short_series, vec![("b".to_string(), 2)]);
        assert!((profile.target_null_ratio - 0.2).abs() < 1e-9);
    }

    #[test]
    fn too_many_null_targets_fail() {
        let batch = history(vec![Some(1.0), None, None, Some(4.0)]);
        let err = validate_history(&batch, &config(1, 1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::HistoryThreshold {
                check: "max_null_ratio",
                ..
            }
        ));
    }

    #[test]
    fn too_few_eligible_series_fail() {
        let batch = history(vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let err = validate_history(&batch, &config(3, 2)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::HistoryThreshold {
                check: "min_series_count",
                ..
            }
        ));
    }

    #[test]
    fn missing_role_column_is_reported() {
        let batch = history(vec![Some(1.0)]);
        let config = ForecastConfig::builder("demand", "ws", "lh")
            .columns("week", "units", "sku")
            .build()
            .unwrap();
        assert!(matches!(
            validate_history(&batch, &config),
            Err(PipelineError::ColumnNotFound(c)) if c == "week"
        ));
    }
}
