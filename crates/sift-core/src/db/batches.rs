//! Ingest history operations

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{BatchFailure, BatchRecord, BatchResult};

impl Database {
    /// Persist a batch summary and its failed rows
    pub fn record_batch(&self, result: &BatchResult) -> Result<i64> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;

        db_tx.execute(
            r#"
            INSERT INTO ingest_batches (filename, source, inserted_count, skipped_duplicate_count,
                                        filtered_count, failed_count, not_attempted_count, stopped_early)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                result.filename,
                result.source,
                result.inserted_count as i64,
                result.skipped_duplicate_count as i64,
                result.filtered_count as i64,
                result.failed_count() as i64,
                result.not_attempted_count as i64,
                result.stopped_early,
            ],
        )?;
        let batch_id = db_tx.last_insert_rowid();

        {
            let mut stmt = db_tx.prepare(
                "INSERT INTO ingest_failures (batch_id, line, raw_data, reason) VALUES (?, ?, ?, ?)",
            )?;
            for failed in &result.failed_rows {
                stmt.execute(params![
                    batch_id,
                    failed.row.line as i64,
                    serde_json::to_string(&failed.row.fields)?,
                    failed.error.to_string(),
                ])?;
            }
        }

        db_tx.commit()?;
        Ok(batch_id)
    }

    /// Most recent batches first
    pub fn list_batches(&self, limit: i64) -> Result<Vec<BatchRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, filename, source, inserted_count, skipped_duplicate_count, filtered_count,
                   failed_count, not_attempted_count, stopped_early, created_at
            FROM ingest_batches
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;

        let batches = stmt
            .query_map(params![limit], |row| {
                let created_at: String = row.get(9)?;
                Ok(BatchRecord {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    source: row.get(2)?,
                    inserted_count: row.get(3)?,
                    skipped_duplicate_count: row.get(4)?,
                    filtered_count: row.get(5)?,
                    failed_count: row.get(6)?,
                    not_attempted_count: row.get(7)?,
                    stopped_early: row.get(8)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(batches)
    }

    /// Failed rows recorded for a batch, in file order
    pub fn batch_failures(&self, batch_id: i64) -> Result<Vec<BatchFailure>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT batch_id, line, raw_data, reason FROM ingest_failures WHERE batch_id = ? ORDER BY line",
        )?;

        let failures = stmt
            .query_map(params![batch_id], |row| {
                Ok(BatchFailure {
                    batch_id: row.get(0)?,
                    line: row.get(1)?,
                    raw_data: row.get(2)?,
                    reason: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(failures)
    }
}
