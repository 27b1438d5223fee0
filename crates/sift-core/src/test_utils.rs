//! Test utilities for sift-core
//!
//! In-process [`TransactionStore`] implementations for exercising the
//! pipeline without SQLite, plus sample bank exports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::StorageError;
use crate::fingerprint::Fingerprint;
use crate::models::{InsertOutcome, Transaction};
use crate::store::TransactionStore;

/// Chase credit card export (signed amounts, purchases negative)
pub const CHASE_CSV: &str = "\
Transaction Date,Post Date,Description,Category,Type,Amount,Memo
01/15/2024,01/16/2024,COFFEE SHOP,Food & Drink,Sale,-4.50,
01/16/2024,01/17/2024,NETFLIX.COM,Entertainment,Sale,-15.99,
01/17/2024,01/18/2024,AMAZON MKTPLACE,Shopping,Sale,-42.10,
01/20/2024,01/20/2024,AUTOMATIC PAYMENT - THANK YOU,,Payment,500.00,
";

/// Chase export with one unparseable amount on line 3
pub const CHASE_CSV_WITH_BAD_ROW: &str = "\
Transaction Date,Post Date,Description,Category,Type,Amount,Memo
01/15/2024,01/16/2024,COFFEE SHOP,Food & Drink,Sale,-4.50,
01/16/2024,01/17/2024,BROKEN ROW,Entertainment,Sale,N/A,
01/17/2024,01/18/2024,AMAZON MKTPLACE,Shopping,Sale,-42.10,
";

/// Capital One export (separate Debit and Credit columns)
pub const CAPITALONE_CSV: &str = "\
Transaction Date,Posted Date,Card No.,Description,Category,Debit,Credit
2024-01-15,2024-01-16,1234,UBER TRIP,Other Travel,18.20,
2024-01-18,2024-01-19,1234,CAPITAL ONE AUTOPAY,Payment/Credit,,250.00
";

/// Store backed by a map keyed on the identity fingerprint
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<Fingerprint, i64>>,
    next_id: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.rows
            .lock()
            .map(|rows| rows.contains_key(&Fingerprint::of(tx)))
            .unwrap_or(false)
    }
}

impl TransactionStore for MemoryStore {
    fn insert_or_skip(&self, tx: &Transaction) -> Result<InsertOutcome, StorageError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|e| StorageError::Permanent(e.to_string()))?;
        let key = Fingerprint::of(tx);
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::SkippedDuplicate);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1;
        rows.insert(key, id);
        Ok(InsertOutcome::Inserted(id))
    }
}

/// Store that fails on purpose, counting every insert attempt
pub struct FlakyStore {
    inner: MemoryStore,
    /// Remaining transient failures before inserts start succeeding
    transient_failures: AtomicU32,
    /// Descriptions that always fail permanently
    permanent_for: Option<String>,
    attempts: AtomicU32,
}

impl FlakyStore {
    /// Fail the next `failures` attempts with a transient error
    pub fn transient(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            transient_failures: AtomicU32::new(failures),
            permanent_for: None,
            attempts: AtomicU32::new(0),
        }
    }

    /// Always fail rows with this description with a permanent error
    pub fn permanent_for(description: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            transient_failures: AtomicU32::new(0),
            permanent_for: Some(description.to_string()),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl TransactionStore for FlakyStore {
    fn insert_or_skip(&self, tx: &Transaction) -> Result<InsertOutcome, StorageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.permanent_for.as_deref() == Some(tx.description.as_str()) {
            return Err(StorageError::Permanent(
                "NOT NULL constraint failed: transactions.category".to_string(),
            ));
        }

        let took_failure = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if took_failure {
            return Err(StorageError::Transient("database is locked".to_string()));
        }

        self.inner.insert_or_skip(tx)
    }
}
