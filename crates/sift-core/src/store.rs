//! Storage gateway abstraction
//!
//! Identity enforcement belongs to the store: implementations must make
//! `insert_or_skip` a single atomic conditional insert, so concurrent batches
//! never need an in-process lock to stay duplicate-free.

use crate::error::StorageError;
use crate::models::{InsertOutcome, Transaction};

pub trait TransactionStore: Send + Sync {
    /// Insert `tx` unless a row with the same (date, description, amount,
    /// source, filename) already exists.
    ///
    /// A uniqueness conflict is `Ok(SkippedDuplicate)`, never an error.
    fn insert_or_skip(&self, tx: &Transaction) -> Result<InsertOutcome, StorageError>;
}

impl<T: TransactionStore + ?Sized> TransactionStore for &T {
    fn insert_or_skip(&self, tx: &Transaction) -> Result<InsertOutcome, StorageError> {
        (**self).insert_or_skip(tx)
    }
}
