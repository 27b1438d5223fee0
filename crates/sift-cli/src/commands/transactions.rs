//! Transaction command implementations

use anyhow::Result;
use sift_core::{Database, Direction, IngestConfig, TransactionFilter, VendorCategorizer};

use super::truncate;

pub fn cmd_transactions_list(
    db: &Database,
    limit: i64,
    source: Option<String>,
    filename: Option<String>,
) -> Result<()> {
    let filter = TransactionFilter {
        source,
        filename,
        ..Default::default()
    };
    let transactions = db.list_transactions(&filter, limit, 0)?;

    if transactions.is_empty() {
        println!("No transactions found. Ingest some with:");
        println!("  sift ingest statement.csv");
        return Ok(());
    }

    println!();
    println!("📝 Recent Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for stored in transactions {
        let tx = &stored.transaction;
        let amount_str = match tx.direction {
            Direction::Debit => format!("\x1b[31m-${}\x1b[0m", tx.amount), // Red for money out
            Direction::Credit => format!("\x1b[32m+${}\x1b[0m", tx.amount), // Green for money in
        };

        println!(
            "   [{}] {} │ {:>10} │ {:<40} │ {} │ {}",
            stored.id,
            tx.date,
            amount_str,
            truncate(&tx.description, 40),
            tx.category.as_deref().unwrap_or("-"),
            tx.source
        );
    }

    Ok(())
}

pub fn cmd_categorize(db: &Database, id: i64, category: &str) -> Result<()> {
    let tx = db
        .get_transaction(id)?
        .ok_or_else(|| anyhow::anyhow!("Transaction {} not found", id))?;

    let category = category.trim();
    let category = (!category.is_empty()).then_some(category);
    db.set_category(id, category)?;
    // Later rows with the same description pick this up in `categorize --auto`
    db.set_category_feedback(&tx.transaction.description, category)?;

    println!(
        "✅ Categorized: {} → {}",
        truncate(&tx.transaction.description, 40),
        category.unwrap_or("(none)")
    );
    Ok(())
}

pub fn cmd_categorize_auto(db: &Database, config: &IngestConfig) -> Result<()> {
    println!("🏷️  Applying vendor rules and remembered categories...");

    let categorizer = VendorCategorizer::from_config(config)?;
    let result = categorizer.categorize_uncategorized(db)?;

    println!("   Examined: {}", result.examined);
    println!(
        "   Categorized: {} ({} from earlier corrections)",
        result.categorized, result.from_feedback
    );
    if result.remaining > 0 {
        println!("   Still uncategorized: {}", result.remaining);
    }
    Ok(())
}
