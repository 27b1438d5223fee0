//! Batch ingestion pipeline
//!
//! One batch is one uploaded file. Every row ends up in exactly one bucket of
//! the [`BatchResult`]: inserted, skipped as duplicate, filtered, failed (with
//! its reason) or not attempted because the caller stopped the batch. Row
//! failures never abort the batch and nothing is rolled back.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classify::KeywordFilter;
use crate::config::{IngestConfig, SourceConfig, StorageConfig};
use crate::error::{Error, Result, StorageError};
use crate::fingerprint::Fingerprint;
use crate::import::{detect_source, read_csv, CsvBatch};
use crate::models::{BatchResult, FailedRow, InsertOutcome, RawRow, Transaction};
use crate::normalize::Normalizer;
use crate::store::TransactionStore;

/// Upper bound on a single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded retry for transient storage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Sleep before the first retry; doubles each time
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for RetryPolicy {
    fn from(storage: &StorageConfig) -> Self {
        Self {
            max_retries: storage.max_retries,
            initial_backoff: storage.retry_backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Backoff before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Ingests batches from a single source into a store
pub struct IngestPipeline<'a, S: TransactionStore + ?Sized> {
    store: &'a S,
    normalizer: Normalizer<'a>,
    filter: KeywordFilter,
    retry: RetryPolicy,
    stop: Option<&'a AtomicBool>,
}

impl<'a, S: TransactionStore + ?Sized> IngestPipeline<'a, S> {
    /// Pipeline for a configured source, with the config's filter and retry policy
    ///
    /// Fails with a configuration error if the source is unknown or its
    /// column mapping is incomplete.
    pub fn new(store: &'a S, config: &'a IngestConfig, source_id: &str) -> Result<Self> {
        let source = config.source(source_id)?;
        Ok(Self::for_source(store, source)?
            .with_filter(KeywordFilter::from_config(config))
            .with_retry(RetryPolicy::from(&config.storage)))
    }

    /// Pipeline for an explicit source definition, no keyword filter
    pub fn for_source(store: &'a S, source: &'a SourceConfig) -> Result<Self> {
        Ok(Self {
            store,
            normalizer: Normalizer::new(source)?,
            filter: KeywordFilter::default(),
            retry: RetryPolicy::default(),
            stop: None,
        })
    }

    pub fn with_filter(mut self, filter: KeywordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checked between rows; once set, the rest of the batch is left untouched
    pub fn with_stop_signal(mut self, stop: &'a AtomicBool) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn source(&self) -> &SourceConfig {
        self.normalizer.source()
    }

    /// Ingest one batch. Always returns a summary accounting for every row.
    pub fn ingest<I>(&self, filename: &str, rows: I) -> BatchResult
    where
        I: IntoIterator<Item = RawRow>,
    {
        self.run(BatchResult::new(filename, &self.source().id), rows)
    }

    /// Ingest a parsed CSV upload; records that could not be read count as
    /// failed rows of the same batch
    pub fn ingest_csv(&self, filename: &str, batch: CsvBatch) -> BatchResult {
        let mut result = BatchResult::new(filename, &self.source().id);
        result.failed_rows = batch.unreadable;

        let mut result = self.run(result, batch.rows);
        result.failed_rows.sort_by_key(|failed| failed.row.line);
        result
    }

    fn run<I>(&self, mut result: BatchResult, rows: I) -> BatchResult
    where
        I: IntoIterator<Item = RawRow>,
    {
        let filename = result.filename.clone();
        let mut rows = rows.into_iter();

        while let Some(row) = rows.next() {
            if self.stop_requested() {
                result.stopped_early = true;
                result.not_attempted_count = 1 + rows.count();
                warn!(
                    "{}: stopped before line {}, {} rows not attempted",
                    filename, row.line, result.not_attempted_count
                );
                break;
            }
            self.ingest_row(row, &filename, &mut result);
        }

        info!(
            "{} ({}): {} inserted, {} duplicates, {} filtered, {} failed",
            filename,
            result.source,
            result.inserted_count,
            result.skipped_duplicate_count,
            result.filtered_count,
            result.failed_count()
        );
        result
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_some_and(|s| s.load(Ordering::SeqCst))
    }

    fn ingest_row(&self, row: RawRow, filename: &str, result: &mut BatchResult) {
        let tx = match self.normalizer.normalize(&row, filename) {
            Ok(tx) => tx,
            Err(e) => {
                warn!("{}: line {}: {}", filename, row.line, e);
                result.failed_rows.push(FailedRow {
                    row,
                    error: e.into(),
                });
                return;
            }
        };

        if let Some(keyword) = self.filter.matched(&tx.description) {
            debug!(
                "{}: line {} filtered by keyword '{}'",
                filename, row.line, keyword
            );
            result.filtered_count += 1;
            return;
        }

        let key = Fingerprint::of(&tx);
        match self.insert_with_retry(&tx) {
            Ok(InsertOutcome::Inserted(id)) => {
                debug!(
                    "{}: line {} inserted as #{} [{}]",
                    filename,
                    row.line,
                    id,
                    key.short()
                );
                result.inserted_count += 1;
            }
            Ok(InsertOutcome::SkippedDuplicate) => {
                debug!(
                    "{}: line {} duplicate [{}]",
                    filename,
                    row.line,
                    key.short()
                );
                result.skipped_duplicate_count += 1;
            }
            Err(e) => {
                warn!("{}: line {}: {}", filename, row.line, e);
                result.failed_rows.push(FailedRow {
                    row,
                    error: e.into(),
                });
            }
        }
    }

    /// Constraint conflicts never reach here as errors; only transient
    /// failures are retried
    fn insert_with_retry(&self, tx: &Transaction) -> std::result::Result<InsertOutcome, StorageError> {
        let mut retry = 0;
        loop {
            match self.store.insert_or_skip(tx) {
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let wait = self.retry.backoff(retry);
                    warn!(
                        "Transient storage error (retry {}/{} in {:?}): {}",
                        retry, self.retry.max_retries, wait, e
                    );
                    thread::sleep(wait);
                }
                outcome => return outcome,
            }
        }
    }
}

/// Read a CSV upload and ingest it as one batch
///
/// The source is detected from the header line unless `source_id` is given.
/// An unrecognized format is a configuration error: no row could be
/// normalized without a mapping.
pub fn ingest_reader<S, R>(
    store: &S,
    config: &IngestConfig,
    filename: &str,
    reader: R,
    source_id: Option<&str>,
    stop: Option<&AtomicBool>,
) -> Result<BatchResult>
where
    S: TransactionStore + ?Sized,
    R: Read,
{
    let batch = read_csv(reader)?;

    let source = match source_id {
        Some(id) => config.source(id)?,
        None => detect_source(config, &batch.headers).ok_or_else(|| {
            Error::Configuration(format!(
                "could not detect source format of {} (known sources: {})",
                filename,
                config.source_ids().join(", ")
            ))
        })?,
    };
    debug!("{}: using source '{}'", filename, source.id);

    let mut pipeline = IngestPipeline::new(store, config, &source.id)?;
    if let Some(stop) = stop {
        pipeline = pipeline.with_stop_signal(stop);
    }
    Ok(pipeline.ingest_csv(filename, batch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmountConvention, DetectRule, SignRule};
    use crate::error::MalformedRowError;
    use crate::models::RowError;
    use crate::test_utils::{FlakyStore, MemoryStore};

    fn chase_cc() -> SourceConfig {
        SourceConfig {
            id: "chaseCC".to_string(),
            name: None,
            detect: DetectRule::default(),
            date_column: "date".to_string(),
            date_formats: vec!["%Y-%m-%d".to_string(), "%m/%d/%Y".to_string()],
            description_column: "description".to_string(),
            category_column: None,
            amount: AmountConvention::Signed {
                column: "amount".to_string(),
                debit_when: SignRule::Negative,
            },
        }
    }

    fn row(line: u64, date: &str, description: &str, amount: &str) -> RawRow {
        RawRow::new(line)
            .with("date", date)
            .with("description", description)
            .with("amount", amount)
    }

    fn ten_rows_one_bad() -> Vec<RawRow> {
        (0..10)
            .map(|i| {
                let amount = if i == 4 {
                    "N/A".to_string()
                } else {
                    format!("-{}.25", i + 1)
                };
                row(i + 2, "2024-01-15", &format!("SHOP {}", i), &amount)
            })
            .collect()
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_coffee_shop_first_insert_then_duplicate() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();
        let rows = vec![row(2, "2024-01-15", "COFFEE SHOP", "-4.50")];

        let first = pipeline.ingest("jan.csv", rows.clone());
        assert_eq!(first.inserted_count, 1);
        assert_eq!(first.skipped_duplicate_count, 0);

        let second = pipeline.ingest("jan.csv", rows);
        assert_eq!(second.inserted_count, 0);
        assert_eq!(second.skipped_duplicate_count, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_row_isolation() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();

        let result = pipeline.ingest("jan.csv", ten_rows_one_bad());

        assert_eq!(result.inserted_count, 9);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.total_rows(), 10);
        let failed = &result.failed_rows[0];
        assert_eq!(failed.row.line, 6);
        assert!(matches!(
            failed.error,
            RowError::Malformed(MalformedRowError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();

        pipeline.ingest("jan.csv", ten_rows_one_bad());
        let again = pipeline.ingest("jan.csv", ten_rows_one_bad());

        assert_eq!(again.inserted_count, 0);
        assert_eq!(again.skipped_duplicate_count, 9);
        assert_eq!(again.failed_count(), 1);
        assert_eq!(store.len(), 9);
    }

    #[test]
    fn test_different_filename_is_new_batch() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();
        let rows = vec![row(2, "2024-01-15", "COFFEE SHOP", "-4.50")];

        assert_eq!(pipeline.ingest("jan.csv", rows.clone()).inserted_count, 1);
        assert_eq!(pipeline.ingest("jan (1).csv", rows).inserted_count, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reformatted_date_is_duplicate() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();

        pipeline.ingest("jan.csv", vec![row(2, "01/15/2024", "COFFEE SHOP", "-4.5")]);
        let result = pipeline.ingest("jan.csv", vec![row(2, "2024-01-15", "COFFEE  SHOP ", "-4.50")]);
        assert_eq!(result.skipped_duplicate_count, 1);
    }

    #[test]
    fn test_keyword_filter_counts_rows() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source)
            .unwrap()
            .with_filter(KeywordFilter::new(&["payment thank you"]));

        let result = pipeline.ingest(
            "jan.csv",
            vec![
                row(2, "2024-01-15", "PAYMENT THANK YOU", "500.00"),
                row(3, "2024-01-15", "COFFEE SHOP", "-4.50"),
            ],
        );
        assert_eq!(result.filtered_count, 1);
        assert_eq!(result.inserted_count, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let store = FlakyStore::transient(2);
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source)
            .unwrap()
            .with_retry(no_wait());

        let result = pipeline.ingest("jan.csv", vec![row(2, "2024-01-15", "X", "-1.00")]);
        assert_eq!(result.inserted_count, 1);
        assert_eq!(store.attempts(), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let store = FlakyStore::transient(10);
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source)
            .unwrap()
            .with_retry(no_wait());

        let result = pipeline.ingest(
            "jan.csv",
            vec![
                row(2, "2024-01-15", "X", "-1.00"),
                row(3, "2024-01-15", "Y", "-2.00"),
            ],
        );
        // 4 attempts for the first row, then 4 more for the second
        assert_eq!(store.attempts(), 8);
        assert_eq!(result.failed_count(), 2);
        assert!(matches!(
            result.failed_rows[0].error,
            RowError::Storage(StorageError::Transient(_))
        ));
    }

    #[test]
    fn test_permanent_errors_are_not_retried() {
        let store = FlakyStore::permanent_for("BROKEN");
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source)
            .unwrap()
            .with_retry(no_wait());

        let result = pipeline.ingest(
            "jan.csv",
            vec![
                row(2, "2024-01-15", "BROKEN", "-1.00"),
                row(3, "2024-01-15", "FINE", "-2.00"),
            ],
        );
        assert_eq!(store.attempts(), 2);
        assert_eq!(result.inserted_count, 1);
        assert!(matches!(
            result.failed_rows[0].error,
            RowError::Storage(StorageError::Permanent(_))
        ));
    }

    #[test]
    fn test_stop_signal_between_rows() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let stop = AtomicBool::new(false);
        let pipeline = IngestPipeline::for_source(&store, &source)
            .unwrap()
            .with_stop_signal(&stop);

        // Set the signal after the third row has been consumed
        let rows = ten_rows_one_bad().into_iter().enumerate().map(|(i, r)| {
            if i == 3 {
                stop.store(true, Ordering::SeqCst);
            }
            r
        });

        let result = pipeline.ingest("jan.csv", rows);
        assert!(result.stopped_early);
        assert_eq!(result.inserted_count, 3);
        assert_eq!(result.not_attempted_count, 7);
        assert_eq!(result.total_rows(), 10);
    }

    #[test]
    fn test_unknown_source_is_configuration_error() {
        let store = MemoryStore::new();
        let config = IngestConfig::embedded().unwrap();
        let err = IngestPipeline::new(&store, &config, "nope").err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_ingest_reader_detects_source() {
        let store = MemoryStore::new();
        let config = IngestConfig::embedded().unwrap();
        let csv = "Transaction Date,Posted Date,Card No.,Description,Category,Debit,Credit
2024-01-15,2024-01-16,1234,COFFEE SHOP,Dining,4.50,
2024-01-16,2024-01-17,1234,PAYMENT,Payment/Credit,,250.00
";
        let result = ingest_reader(&store, &config, "capone.csv", csv.as_bytes(), None, None).unwrap();
        assert_eq!(result.source, "capitalone");
        assert_eq!(result.inserted_count, 2);
    }

    #[test]
    fn test_ingest_csv_merges_unreadable_records_in_line_order() {
        let store = MemoryStore::new();
        let source = chase_cc();
        let pipeline = IngestPipeline::for_source(&store, &source).unwrap();

        let mut csv = b"date,description,amount\n".to_vec();
        csv.extend_from_slice(b"2024-01-15,GOOD ONE,-1.00\n");
        csv.extend_from_slice(b"2024-01-15,BAD AMOUNT,N/A\n");
        csv.extend_from_slice(b"2024-01-15,\xFF\xFE,-2.00\n");
        csv.extend_from_slice(b"2024-01-15,GOOD TWO,-3.00\n");
        let batch = read_csv(csv.as_slice()).unwrap();

        let result = pipeline.ingest_csv("mixed.csv", batch);
        assert_eq!(result.inserted_count, 2);
        assert_eq!(result.total_rows(), 4);
        let lines: Vec<u64> = result.failed_rows.iter().map(|f| f.row.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert!(matches!(
            result.failed_rows[1].error,
            RowError::Malformed(MalformedRowError::UnreadableRecord { .. })
        ));
    }

    #[test]
    fn test_ingest_reader_unknown_format() {
        let store = MemoryStore::new();
        let config = IngestConfig::embedded().unwrap();
        let err = ingest_reader(&store, &config, "x.csv", "a,b\n1,2\n".as_bytes(), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }
}
