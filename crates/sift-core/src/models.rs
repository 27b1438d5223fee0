//! Domain models for Sift

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{MalformedRowError, StorageError};

/// Cash-flow polarity of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money leaving the account (purchase, fee)
    Debit,
    /// Money entering the account (payment, refund, income)
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One CSV row as read from an upload, keyed by header name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// 1-based line number in the source file (header is line 1)
    pub line: u64,
    pub fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert, mostly for tests
    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.fields.insert(column.to_string(), value.to_string());
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

/// A normalized transaction, ready for fingerprinting and storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub date: NaiveDate,
    pub description: String,
    /// Magnitude with exactly two fractional digits; polarity is in `direction`
    pub amount: Decimal,
    /// Mutable metadata, not part of identity
    pub category: Option<String>,
    pub direction: Direction,
    /// Source institution id (from config)
    pub source: String,
    /// Upload batch the row came from
    pub filename: String,
}

/// A transaction as persisted, with its storage-assigned id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: i64,
    #[serde(flatten)]
    pub transaction: Transaction,
}

/// Result of a conditional insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// Row was new; contains the storage-assigned id
    Inserted(i64),
    /// Row's identity key already existed
    SkippedDuplicate,
}

/// Why a single row failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum RowError {
    #[error(transparent)]
    Malformed(#[from] MalformedRowError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A row that could not be ingested, with its reason
#[derive(Debug, Clone, Serialize)]
pub struct FailedRow {
    pub row: RawRow,
    pub error: RowError,
}

/// Summary of one batch (one uploaded file)
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    pub filename: String,
    pub source: String,
    pub inserted_count: usize,
    pub skipped_duplicate_count: usize,
    /// Rows dropped by an exclusion keyword
    pub filtered_count: usize,
    pub failed_rows: Vec<FailedRow>,
    /// Rows left untouched because the batch was stopped
    pub not_attempted_count: usize,
    pub stopped_early: bool,
}

impl BatchResult {
    pub fn new(filename: &str, source: &str) -> Self {
        Self {
            filename: filename.to_string(),
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn failed_count(&self) -> usize {
        self.failed_rows.len()
    }

    /// Every row the batch was given
    pub fn total_rows(&self) -> usize {
        self.inserted_count
            + self.skipped_duplicate_count
            + self.filtered_count
            + self.failed_rows.len()
            + self.not_attempted_count
    }
}

/// A persisted batch summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: i64,
    pub filename: String,
    pub source: String,
    pub inserted_count: i64,
    pub skipped_duplicate_count: i64,
    pub filtered_count: i64,
    pub failed_count: i64,
    pub not_attempted_count: i64,
    pub stopped_early: bool,
    pub created_at: DateTime<Utc>,
}

/// A failed row from a past batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub batch_id: i64,
    pub line: i64,
    /// Original row as JSON
    pub raw_data: String,
    pub reason: String,
}

/// A remembered manual category correction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFeedback {
    pub description: String,
    pub category: String,
    pub updated_at: DateTime<Utc>,
}
