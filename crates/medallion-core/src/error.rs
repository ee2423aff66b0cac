//! Error types for dataset transforms

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use ::parquet::errors::ParquetError;
use thiserror::Error;

/// Errors raised by the pure dataset transforms in this crate
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required column contains nulls
    #[error("{table}.{column}: {count} null values found")]
    NullValues {
        table: String,
        column: String,
        count: usize,
    },

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("column '{column}' has unsupported type {data_type} for {operation}")]
    UnsupportedType {
        column: String,
        data_type: DataType,
        operation: &'static str,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Forecast history fails one of the configured data quality thresholds
    #[error("forecast history check '{check}' failed: {detail}")]
    HistoryThreshold { check: &'static str, detail: String },

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
