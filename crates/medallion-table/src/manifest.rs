//! Snapshot manifests.
//!
//! Each committed version of a table is one JSON document under
//! `<table>/_manifests/`, named by its zero-padded version number so that a
//! lexical listing is also a version-ordered one. A manifest lists every
//! live data file at that version; no replay of earlier versions is needed
//! to read a table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Write,
    Optimize,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Write => write!(f, "WRITE"),
            Operation::Optimize => write!(f, "OPTIMIZE"),
        }
    }
}

/// How a write treats the files already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    Append,
    Overwrite,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// A live data file. `path` is relative to the table directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub size: u64,
    pub rows: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u64,
    pub timestamp_ms: i64,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    pub files: Vec<DataFile>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    pub fn num_rows(&self) -> u64 {
        self.files.iter().map(|f| f.rows).sum()
    }

    pub fn size_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// File name of the manifest for `version`.
pub fn manifest_file_name(version: u64) -> String {
    format!("{:020}.json", version)
}

/// Version encoded in a manifest file name, if it is one.
pub fn parse_manifest_file_name(name: &str) -> Option<u64> {
    let stem = name.rsplit('/').next()?.strip_suffix(".json")?;
    if stem.len() != 20 {
        return None;
    }
    stem.parse().ok()
}
