//! Error types for table store operations

use arrow::error::ArrowError;
use medallion_core::PipelineError;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Table does not exist
    E001TableNotFound,
    /// E002: Table name is not a valid identifier
    E002InvalidTableName,
    /// E003: Schema incompatible with existing table
    E003SchemaIncompatible,
    /// E004: Configuration missing or invalid
    E004InvalidConfig,
    /// E005: Storage operation failed
    E005StorageFailure,
    /// E006: Another writer committed the same version
    E006ConcurrentCommit,
    /// E007: Vacuum retention shorter than the configured minimum
    E007RetentionTooShort,
    /// E008: Requested table version does not exist
    E008VersionNotFound,
    /// E009: Table manifest could not be decoded
    E009CorruptManifest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001TableNotFound => "E001",
            Self::E002InvalidTableName => "E002",
            Self::E003SchemaIncompatible => "E003",
            Self::E004InvalidConfig => "E004",
            Self::E005StorageFailure => "E005",
            Self::E006ConcurrentCommit => "E006",
            Self::E007RetentionTooShort => "E007",
            Self::E008VersionNotFound => "E008",
            Self::E009CorruptManifest => "E009",
        }
    }
}

/// Errors that can occur during table operations
#[derive(Debug, Error)]
pub enum TableError {
    #[error("[{code}] Table '{table}' does not exist")]
    NotFound { code: &'static str, table: String },

    #[error("[{code}] Invalid table name '{name}': {reason}")]
    InvalidName {
        code: &'static str,
        name: String,
        reason: String,
    },

    #[error("[{code}] Schema mismatch writing to '{table}': {reason}")]
    SchemaMismatch {
        code: &'static str,
        table: String,
        reason: String,
    },

    #[error("[{code}] Invalid configuration: {message}")]
    InvalidConfig { code: &'static str, message: String },

    #[error("[{code}] Storage operation failed on '{path}': {source}")]
    Storage {
        code: &'static str,
        path: String,
        #[source]
        source: opendal::Error,
    },

    #[error("[{code}] Version {version} of '{table}' was committed concurrently")]
    ConcurrentCommit {
        code: &'static str,
        table: String,
        version: u64,
    },

    #[error("[{code}] Retention of {requested_hours}h is below the minimum of {minimum_hours}h; disable maintenance.retention_check_enabled to override")]
    RetentionTooShort {
        code: &'static str,
        requested_hours: u64,
        minimum_hours: u64,
    },

    #[error("[{code}] Table '{table}' has no version {version}")]
    VersionNotFound {
        code: &'static str,
        table: String,
        version: u64,
    },

    #[error("[{code}] Manifest '{path}' is corrupt: {source}")]
    CorruptManifest {
        code: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

impl TableError {
    pub fn not_found(table: impl Into<String>) -> Self {
        Self::NotFound {
            code: ErrorCode::E001TableNotFound.as_str(),
            table: table.into(),
        }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            code: ErrorCode::E002InvalidTableName.as_str(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn schema_mismatch(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            code: ErrorCode::E003SchemaIncompatible.as_str(),
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            code: ErrorCode::E004InvalidConfig.as_str(),
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<String>, source: opendal::Error) -> Self {
        Self::Storage {
            code: ErrorCode::E005StorageFailure.as_str(),
            path: path.into(),
            source,
        }
    }

    pub fn concurrent_commit(table: impl Into<String>, version: u64) -> Self {
        Self::ConcurrentCommit {
            code: ErrorCode::E006ConcurrentCommit.as_str(),
            table: table.into(),
            version,
        }
    }

    pub fn retention_too_short(requested_hours: u64, minimum_hours: u64) -> Self {
        Self::RetentionTooShort {
            code: ErrorCode::E007RetentionTooShort.as_str(),
            requested_hours,
            minimum_hours,
        }
    }

    pub fn version_not_found(table: impl Into<String>, version: u64) -> Self {
        Self::VersionNotFound {
            code: ErrorCode::E008VersionNotFound.as_str(),
            table: table.into(),
            version,
        }
    }

    pub fn corrupt_manifest(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::CorruptManifest {
            code: ErrorCode::E009CorruptManifest.as_str(),
            path: path.into(),
            source,
        }
    }

    /// Error code for programmatic handling, if this error carries one.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { code, .. }
            | Self::InvalidName { code, .. }
            | Self::SchemaMismatch { code, .. }
            | Self::InvalidConfig { code, .. }
            | Self::Storage { code, .. }
            | Self::ConcurrentCommit { code, .. }
            | Self::RetentionTooShort { code, .. }
            | Self::VersionNotFound { code, .. }
            | Self::CorruptManifest { code, .. } => Some(code),
            Self::Pipeline(_) | Self::Arrow(_) => None,
        }
    }
}

/// Result type alias for TableError
pub type Result<T> = std::result::Result<T, TableError>;
