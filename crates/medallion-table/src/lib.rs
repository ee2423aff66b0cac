//! Versioned Parquet tables on any opendal backend
//!
//! A table is a directory of Parquet data files plus one JSON manifest per
//! committed version. Writers append or overwrite, maintenance compacts,
//! clusters and vacuums, and readers pick the latest version or an earlier
//! one.

// opendal::Error makes TableError large.
#![allow(clippy::result_large_err)]

mod error;
mod maintenance;
pub mod manifest;
mod storage;
mod table;

pub use error::{ErrorCode, Result, TableError};
pub use maintenance::{OptimizeMetrics, OptimizeStrategy, VacuumMetrics};
pub use manifest::{DataFile, Manifest, Operation, WriteMode};
pub use storage::build_operator;
pub use table::{validate_table_name, TableStore};

// Re-export commonly used types for convenience
pub use opendal;
