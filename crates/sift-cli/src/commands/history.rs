//! Ingest history command

use anyhow::Result;
use sift_core::Database;

use super::truncate;

pub fn cmd_history(db: &Database, limit: i64) -> Result<()> {
    let batches = db.list_batches(limit)?;

    if batches.is_empty() {
        println!("No batches ingested yet.");
        return Ok(());
    }

    println!();
    println!("🗂️  Ingest History");
    println!("   ─────────────────────────────────────────────────────────────");

    for batch in batches {
        let stopped = if batch.stopped_early {
            format!(" (stopped, {} not attempted)", batch.not_attempted_count)
        } else {
            String::new()
        };
        println!(
            "   [{}] {} │ {:<30} │ {:<14} │ +{} ={} ~{} !{}{}",
            batch.id,
            batch.created_at.format("%Y-%m-%d %H:%M"),
            truncate(&batch.filename, 30),
            batch.source,
            batch.inserted_count,
            batch.skipped_duplicate_count,
            batch.filtered_count,
            batch.failed_count,
            stopped
        );

        if batch.failed_count > 0 {
            for failure in db.batch_failures(batch.id)? {
                println!(
                    "         line {}: {}",
                    failure.line,
                    truncate(&failure.reason, 60)
                );
            }
        }
    }

    println!();
    println!("   + inserted  = duplicates  ~ filtered  ! failed");

    Ok(())
}
