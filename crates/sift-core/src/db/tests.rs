//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, MalformedRowError, StorageError};
    use crate::fingerprint::Fingerprint;
    use crate::store::TransactionStore;
    use chrono::NaiveDate;
    use rusqlite::params;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn tx(date: &str, description: &str, amount: &str, filename: &str) -> Transaction {
        Transaction {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: description.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            category: None,
            direction: Direction::Debit,
            source: "chaseCC".to_string(),
            filename: filename.to_string(),
        }
    }

    fn coffee() -> Transaction {
        tx("2024-01-15", "COFFEE SHOP", "4.50", "jan.csv")
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.count_transactions().unwrap(), 0);
        assert!(db.list_batches(10).unwrap().is_empty());
    }

    #[test]
    fn test_transactions_schema() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('transactions') WHERE name IN ('id', 'date', 'description', 'amount', 'category', 'direction', 'source', 'filename')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 8, "transactions table should have 8 expected columns");

        // Identity key is enforced by a unique index over exactly five columns
        let unique_cols: Vec<String> = conn
            .prepare(
                "SELECT ii.name FROM pragma_index_list('transactions') il
                 JOIN pragma_index_info(il.name) ii
                 WHERE il.\"unique\" = 1 AND il.origin = 'u'
                 ORDER BY ii.seqno",
            )
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(
            unique_cols,
            vec!["date", "description", "amount", "source", "filename"]
        );
    }

    #[test]
    fn test_insert_then_duplicate() {
        let db = Database::in_memory().unwrap();

        let first = db.insert_or_skip(&coffee()).unwrap();
        let id = match first {
            InsertOutcome::Inserted(id) => id,
            other => panic!("expected insert, got {:?}", other),
        };
        assert!(id > 0);

        assert_eq!(
            db.insert_or_skip(&coffee()).unwrap(),
            InsertOutcome::SkippedDuplicate
        );
        assert_eq!(db.count_transactions().unwrap(), 1);

        let stored = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(stored.transaction, coffee());
    }

    #[test]
    fn test_amount_stored_with_two_decimals() {
        let db = Database::in_memory().unwrap();
        db.insert_or_skip(&tx("2024-01-15", "COFFEE SHOP", "4.5", "jan.csv"))
            .unwrap();

        // 4.5 and 4.50 are the same key
        assert_eq!(
            db.insert_or_skip(&coffee()).unwrap(),
            InsertOutcome::SkippedDuplicate
        );

        let conn = db.conn().unwrap();
        let amount: String = conn
            .query_row("SELECT amount FROM transactions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(amount, "4.50");
    }

    #[test]
    fn test_filename_is_part_of_identity() {
        let db = Database::in_memory().unwrap();
        db.insert_or_skip(&coffee()).unwrap();

        let other_file = tx("2024-01-15", "COFFEE SHOP", "4.50", "jan (1).csv");
        assert!(matches!(
            db.insert_or_skip(&other_file).unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(db.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_category_and_direction_not_part_of_identity() {
        let db = Database::in_memory().unwrap();
        db.insert_or_skip(&coffee()).unwrap();

        let mut variant = coffee();
        variant.category = Some("Dining".to_string());
        variant.direction = Direction::Credit;
        assert_eq!(
            db.insert_or_skip(&variant).unwrap(),
            InsertOutcome::SkippedDuplicate
        );
    }

    #[test]
    fn test_set_category_keeps_identity() {
        let db = Database::in_memory().unwrap();
        let id = match db.insert_or_skip(&coffee()).unwrap() {
            InsertOutcome::Inserted(id) => id,
            other => panic!("expected insert, got {:?}", other),
        };

        db.set_category(id, Some("Dining")).unwrap();
        let stored = db.get_transaction(id).unwrap().unwrap();
        assert_eq!(stored.transaction.category.as_deref(), Some("Dining"));

        // Still found by the same key, and still deduplicates
        let found = db.find_by_fingerprint(&Fingerprint::of(&coffee())).unwrap();
        assert_eq!(found.map(|t| t.id), Some(id));
        assert_eq!(
            db.insert_or_skip(&coffee()).unwrap(),
            InsertOutcome::SkippedDuplicate
        );

        db.set_category(id, None).unwrap();
        let stored = db.get_transaction(id).unwrap().unwrap();
        assert!(stored.transaction.category.is_none());
    }

    #[test]
    fn test_set_category_not_found() {
        let db = Database::in_memory().unwrap();
        let err = db.set_category(999, Some("Dining")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_check_violation_is_permanent() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let err = conn
            .execute(
                "INSERT INTO transactions (date, description, amount, direction, source, filename)
                 VALUES ('2024-01-15', 'X', '1.00', 'sideways', 's', 'f')",
                [],
            )
            .unwrap_err();
        assert!(matches!(
            StorageError::from(err),
            StorageError::Permanent(_)
        ));
    }

    #[test]
    fn test_list_transactions_filters() {
        let db = Database::in_memory().unwrap();
        db.insert_or_skip(&tx("2024-01-15", "A", "1.00", "jan.csv"))
            .unwrap();
        db.insert_or_skip(&tx("2024-01-20", "B", "2.00", "jan.csv"))
            .unwrap();
        let mut other = tx("2024-02-01", "C", "3.00", "feb.csv");
        other.source = "amex".to_string();
        other.category = Some("Travel".to_string());
        db.insert_or_skip(&other).unwrap();

        let all = db
            .list_transactions(&TransactionFilter::default(), 100, 0)
            .unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert_eq!(all[0].transaction.description, "C");

        let jan = db
            .list_transactions(
                &TransactionFilter {
                    filename: Some("jan.csv".to_string()),
                    ..Default::default()
                },
                100,
                0,
            )
            .unwrap();
        assert_eq!(jan.len(), 2);

        let amex = db
            .list_transactions(
                &TransactionFilter {
                    source: Some("amex".to_string()),
                    ..Default::default()
                },
                100,
                0,
            )
            .unwrap();
        assert_eq!(amex.len(), 1);

        let uncategorized = db
            .list_transactions(
                &TransactionFilter {
                    uncategorized_only: true,
                    ..Default::default()
                },
                100,
                0,
            )
            .unwrap();
        assert_eq!(uncategorized.len(), 2);

        let page = db
            .list_transactions(&TransactionFilter::default(), 1, 1)
            .unwrap();
        assert_eq!(page[0].transaction.description, "B");
    }

    #[test]
    fn test_uncategorized_oldest_first() {
        let db = Database::in_memory().unwrap();
        db.insert_or_skip(&tx("2024-01-20", "LATER INSERT", "1.00", "a.csv"))
            .unwrap();
        db.insert_or_skip(&tx("2024-01-10", "EARLIER DATE", "1.00", "a.csv"))
            .unwrap();

        let pending = db.uncategorized_transactions(0, 10).unwrap();
        assert_eq!(pending[0].transaction.description, "LATER INSERT");
        assert_eq!(db.uncategorized_transactions(0, 1).unwrap().len(), 1);

        // The id cursor resumes after the last row seen
        let rest = db.uncategorized_transactions(pending[0].id, 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].transaction.description, "EARLIER DATE");
        assert_eq!(db.count_uncategorized().unwrap(), 2);

        db.set_category(rest[0].id, Some("Misc")).unwrap();
        assert!(db
            .uncategorized_transactions(pending[0].id, 10)
            .unwrap()
            .is_empty());
        assert_eq!(db.count_uncategorized().unwrap(), 1);
    }

    #[test]
    fn test_category_feedback_upsert_and_lookup() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.feedback_category("LOCAL BAKERY").unwrap(), None);

        db.set_category_feedback("LOCAL BAKERY", Some("Groceries"))
            .unwrap();
        db.set_category_feedback("LOCAL BAKERY", Some("Dining"))
            .unwrap();

        // One row per description; the latest correction wins
        let feedback = db.list_category_feedback().unwrap();
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].category, "Dining");

        // Lookup ignores case
        assert_eq!(
            db.feedback_category("local bakery").unwrap().as_deref(),
            Some("Dining")
        );

        db.set_category_feedback("Local Bakery", None).unwrap();
        assert_eq!(db.feedback_category("LOCAL BAKERY").unwrap(), None);
        assert!(db.list_category_feedback().unwrap().is_empty());
    }

    #[test]
    fn test_record_batch_with_failures() {
        let db = Database::in_memory().unwrap();

        let mut result = BatchResult::new("jan.csv", "chase");
        result.inserted_count = 9;
        result.skipped_duplicate_count = 2;
        result.failed_rows.push(FailedRow {
            row: RawRow::new(6).with("Amount", "N/A"),
            error: RowError::Malformed(MalformedRowError::InvalidAmount {
                column: "Amount".to_string(),
                value: "N/A".to_string(),
            }),
        });

        let batch_id = db.record_batch(&result).unwrap();
        let batches = db.list_batches(10).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].id, batch_id);
        assert_eq!(batches[0].inserted_count, 9);
        assert_eq!(batches[0].skipped_duplicate_count, 2);
        assert_eq!(batches[0].failed_count, 1);
        assert!(!batches[0].stopped_early);

        let failures = db.batch_failures(batch_id).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].line, 6);
        assert!(failures[0].reason.contains("N/A"));
        let raw: serde_json::Value = serde_json::from_str(&failures[0].raw_data).unwrap();
        assert_eq!(raw["Amount"], "N/A");
    }

    #[test]
    fn test_list_batches_newest_first() {
        let db = Database::in_memory().unwrap();
        db.record_batch(&BatchResult::new("jan.csv", "chase"))
            .unwrap();
        let mut stopped = BatchResult::new("feb.csv", "chase");
        stopped.stopped_early = true;
        stopped.not_attempted_count = 4;
        db.record_batch(&stopped).unwrap();

        let batches = db.list_batches(10).unwrap();
        assert_eq!(batches[0].filename, "feb.csv");
        assert!(batches[0].stopped_early);
        assert_eq!(batches[0].not_attempted_count, 4);
        assert_eq!(db.list_batches(1).unwrap().len(), 1);
    }

    #[test]
    fn test_deleting_batch_cascades_failures() {
        let db = Database::in_memory().unwrap();
        let mut result = BatchResult::new("jan.csv", "chase");
        result.failed_rows.push(FailedRow {
            row: RawRow::new(2),
            error: RowError::Storage(StorageError::Permanent("x".to_string())),
        });
        let batch_id = db.record_batch(&result).unwrap();

        let conn = db.conn().unwrap();
        conn.execute("DELETE FROM ingest_batches WHERE id = ?", params![batch_id])
            .unwrap();
        assert!(db.batch_failures(batch_id).unwrap().is_empty());
    }
}
