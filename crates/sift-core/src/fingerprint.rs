//! Transaction identity keys
//!
//! A fingerprint is the canonical form of (date, description, amount, source,
//! filename). Category and direction are not part of identity and never
//! affect whether two rows are the same transaction.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::models::Transaction;

/// Canonical identity tuple for a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    /// `YYYY-MM-DD`
    pub date: String,
    pub description: String,
    /// Magnitude with exactly two fractional digits, e.g. `4.50`
    pub amount: String,
    pub source: String,
    pub filename: String,
}

impl Fingerprint {
    pub fn of(tx: &Transaction) -> Self {
        let mut amount = tx.amount.abs();
        amount.rescale(2);

        Self {
            date: tx.date.format("%Y-%m-%d").to_string(),
            description: tx.description.clone(),
            amount: amount.to_string(),
            source: tx.source.clone(),
            filename: tx.filename.clone(),
        }
    }

    /// Length-prefixed encoding of every field, so no two distinct tuples
    /// share an encoding regardless of what characters the fields contain
    pub fn canonical(&self) -> String {
        [
            &self.date,
            &self.description,
            &self.amount,
            &self.source,
            &self.filename,
        ]
        .iter()
        .map(|field| format!("{}:{}", field.len(), field))
        .collect::<Vec<_>>()
        .join("|")
    }

    /// SHA-256 of the canonical encoding, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// First 12 hex characters of the digest, for log lines
    pub fn short(&self) -> String {
        self.digest()[..12].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}
