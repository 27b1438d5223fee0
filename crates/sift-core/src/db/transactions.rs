//! Transaction operations

use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

use super::Database;
use crate::error::{Error, Result, StorageError};
use crate::fingerprint::Fingerprint;
use crate::models::{InsertOutcome, StoredTransaction, Transaction};
use crate::store::TransactionStore;

/// Optional filters for listing transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub source: Option<String>,
    pub filename: Option<String>,
    pub uncategorized_only: bool,
}

const SELECT_COLUMNS: &str =
    "SELECT id, date, description, amount, category, direction, source, filename FROM transactions";

impl TransactionStore for Database {
    /// Single atomic statement; the UNIQUE constraint decides, not a prior SELECT
    fn insert_or_skip(&self, tx: &Transaction) -> std::result::Result<InsertOutcome, StorageError> {
        let conn = self.pool.get()?;
        let key = Fingerprint::of(tx);

        let changed = conn.execute(
            r#"
            INSERT INTO transactions (date, description, amount, category, direction, source, filename)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (date, description, amount, source, filename) DO NOTHING
            "#,
            params![
                key.date,
                key.description,
                key.amount,
                tx.category,
                tx.direction.as_str(),
                key.source,
                key.filename,
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::SkippedDuplicate)
        } else {
            Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
        }
    }
}

impl Database {
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<StoredTransaction> {
        let date_str: String = row.get(1)?;
        let amount_str: String = row.get(3)?;
        let direction_str: String = row.get(5)?;

        let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
        let amount = Decimal::from_str(&amount_str)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        let direction = direction_str.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into())
        })?;

        Ok(StoredTransaction {
            id: row.get(0)?,
            transaction: Transaction {
                date,
                description: row.get(2)?,
                amount,
                category: row.get(4)?,
                direction,
                source: row.get(6)?,
                filename: row.get(7)?,
            },
        })
    }

    /// Get a single transaction by ID
    pub fn get_transaction(&self, id: i64) -> Result<Option<StoredTransaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("{} WHERE id = ?", SELECT_COLUMNS),
                params![id],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Look up a transaction by its identity key
    pub fn find_by_fingerprint(&self, key: &Fingerprint) -> Result<Option<StoredTransaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!(
                    "{} WHERE date = ? AND description = ? AND amount = ? AND source = ? AND filename = ?",
                    SELECT_COLUMNS
                ),
                params![key.date, key.description, key.amount, key.source, key.filename],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List transactions, newest first
    pub fn list_transactions(
        &self,
        filter: &TransactionFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;

        // Build dynamic WHERE clause
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(source) = &filter.source {
            conditions.push("source = ?");
            params.push(Box::new(source.clone()));
        }
        if let Some(filename) = &filter.filename {
            conditions.push("filename = ?");
            params.push(Box::new(filename.clone()));
        }
        if filter.uncategorized_only {
            conditions.push("category IS NULL");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "{} {} ORDER BY date DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        params.push(Box::new(limit));
        params.push(Box::new(offset));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let transactions = stmt
            .query_map(params_refs.as_slice(), Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    /// Count total transactions
    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Change a transaction's category. Identity columns are never touched.
    pub fn set_category(&self, id: i64, category: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE transactions SET category = ? WHERE id = ?",
            params![category, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("transaction {}", id)));
        }
        Ok(())
    }

    /// Transactions with no category yet and an id above `after_id`, oldest first
    pub fn uncategorized_transactions(
        &self,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE category IS NULL AND id > ? ORDER BY id LIMIT ?",
            SELECT_COLUMNS
        ))?;
        let transactions = stmt
            .query_map(params![after_id, limit], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    /// Count transactions with no category
    pub fn count_uncategorized(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE category IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
