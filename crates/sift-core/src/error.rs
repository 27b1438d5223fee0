//! Error types for Sift

use rusqlite::ErrorCode;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Unknown source institution or incomplete column mapping.
    /// Fatal for a whole batch.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed row: {0}")]
    MalformedRow(#[from] MalformedRowError),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A raw row that cannot be turned into a transaction
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MalformedRowError {
    #[error("missing column '{column}'")]
    MissingColumn { column: String },

    #[error("unable to parse date '{value}' in column '{column}'")]
    InvalidDate { column: String, value: String },

    #[error("unable to parse amount '{value}' in column '{column}'")]
    InvalidAmount { column: String, value: String },

    #[error("amount '{value}' has more than two decimal places")]
    ExcessPrecision { value: String },

    #[error("row has no amount in '{debit_column}' or '{credit_column}'")]
    NoAmount {
        debit_column: String,
        credit_column: String,
    },

    #[error("row has amounts in both '{debit_column}' and '{credit_column}'")]
    AmbiguousAmount {
        debit_column: String,
        credit_column: String,
    },

    #[error("unknown direction indicator '{value}' in column '{column}'")]
    UnknownIndicator { column: String, value: String },

    /// The CSV record itself could not be decoded
    #[error("unreadable record: {reason}")]
    UnreadableRecord { reason: String },

    /// Non-empty fields past the last header; columns are likely shifted
    #[error("record has {found} fields but the header has {expected}")]
    ExtraFields { expected: usize, found: usize },
}

/// A storage failure other than a uniqueness conflict
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum StorageError {
    /// Connectivity, lock contention, or timeout. Safe to retry.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Constraint or type violation on a non-identity field. Never retried.
    #[error("storage failure: {0}")]
    Permanent(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        let transient = matches!(
            err.sqlite_error_code(),
            Some(
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
            )
        );
        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::Permanent(err.to_string())
        }
    }
}

impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        // r2d2 only fails on checkout timeout or connection setup
        Self::Transient(err.to_string())
    }
}
