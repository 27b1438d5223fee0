//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `transactions` - The deduplicated transactions relation
//! - `batches` - Ingest history (batch summaries and failed rows)
//! - `feedback` - Manual category corrections remembered by description

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::Result;

mod batches;
mod feedback;
mod transactions;

#[cfg(test)]
mod tests;

pub use transactions::TransactionFilter;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Open (or create) a database with default storage settings
    pub fn new(path: &str) -> Result<Self> {
        Self::with_config(path, &StorageConfig::default())
    }

    /// Open (or create) a database with explicit timeouts and pool size
    pub fn with_config(path: &str, storage: &StorageConfig) -> Result<Self> {
        let busy_timeout = storage.busy_timeout();

        // Every pooled connection waits on locks instead of failing immediately
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(storage.pool_size.max(1))
            .connection_timeout(busy_timeout.max(std::time::Duration::from_secs(1)))
            .build(manager)?;

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because each pooled
    /// connection to `:memory:` would see its own empty database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "sift_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        // Remove any leftovers from a previous run
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path, suffix));
        }

        Self::new(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers (dashboard) don't block the ingesting writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- Transactions: one row per unique financial event.
            -- The UNIQUE constraint is the deduplication mechanism; ingestion
            -- relies on ON CONFLICT DO NOTHING against it.
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                date TEXT NOT NULL,                        -- YYYY-MM-DD
                description TEXT NOT NULL,
                amount TEXT NOT NULL,                      -- fixed-point, 2 decimals
                category TEXT,
                direction TEXT NOT NULL CHECK (direction IN ('debit', 'credit')),
                source TEXT NOT NULL,
                filename TEXT NOT NULL,
                UNIQUE (date, description, amount, source, filename)
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
            CREATE INDEX IF NOT EXISTS idx_transactions_source ON transactions(source);
            CREATE INDEX IF NOT EXISTS idx_transactions_filename ON transactions(filename);

            -- Ingest history: one row per batch run
            CREATE TABLE IF NOT EXISTS ingest_batches (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                source TEXT NOT NULL,
                inserted_count INTEGER NOT NULL DEFAULT 0,
                skipped_duplicate_count INTEGER NOT NULL DEFAULT 0,
                filtered_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                not_attempted_count INTEGER NOT NULL DEFAULT 0,
                stopped_early BOOLEAN NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_ingest_batches_filename ON ingest_batches(filename);

            -- Rows that failed in a batch, with the original data for reprocessing
            CREATE TABLE IF NOT EXISTS ingest_failures (
                id INTEGER PRIMARY KEY,
                batch_id INTEGER NOT NULL REFERENCES ingest_batches(id) ON DELETE CASCADE,
                line INTEGER NOT NULL,
                raw_data TEXT NOT NULL,                    -- JSON of the raw row
                reason TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ingest_failures_batch ON ingest_failures(batch_id);

            -- Manual category corrections, applied to later rows with the same description
            CREATE TABLE IF NOT EXISTS category_feedback (
                description TEXT PRIMARY KEY COLLATE NOCASE,
                category TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        debug!("Database migrations complete");
        Ok(())
    }
}
