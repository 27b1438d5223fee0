//! Sift Core Library
//!
//! Transaction ingestion for bank and card CSV exports:
//! - Source configuration and header-based format detection
//! - Record normalization into a canonical transaction shape
//! - Identity fingerprints for deduplication
//! - Batch ingestion pipeline with per-row failure isolation
//! - SQLite storage with atomic insert-or-skip and ingest history
//! - Vendor rules for filling in categories

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod import;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod store;

/// In-process stores and sample exports for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use classify::{CategorizeResult, KeywordFilter, VendorCategorizer};
pub use config::{AmountConvention, IngestConfig, SourceConfig, StorageConfig};
pub use db::{Database, TransactionFilter};
pub use error::{Error, MalformedRowError, Result, StorageError};
pub use fingerprint::Fingerprint;
pub use import::{detect_source, read_csv, CsvBatch};
pub use models::{
    BatchFailure, BatchRecord, BatchResult, CategoryFeedback, Direction, FailedRow, InsertOutcome,
    RawRow, RowError, StoredTransaction, Transaction,
};
pub use normalize::Normalizer;
pub use pipeline::{ingest_reader, IngestPipeline, RetryPolicy};
pub use store::TransactionStore;
