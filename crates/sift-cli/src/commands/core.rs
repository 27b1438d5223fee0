//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `load_config` - Resolve the source configuration
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database
//! - `cmd_sources` - List configured sources

use std::path::Path;

use anyhow::{Context, Result};
use sift_core::{config::default_config_path, AmountConvention, Database, IngestConfig};

pub fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    IngestConfig::load(path).context("Failed to load source configuration")
}

/// Open the database with the configured timeouts and pool size
pub fn open_db(db_path: &Path, config: &IngestConfig) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", db_path.display()))?;
    Database::with_config(path_str, &config.storage).context("Failed to open database")
}

pub fn cmd_init(db_path: &Path, config: &IngestConfig) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, config)?;
    println!("   Transactions: {}", db.count_transactions()?);
    println!("   Sources configured: {}", config.sources.len());

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Ingest a statement: sift ingest statement.csv");
    println!("  2. Or drop files in ./incoming and run: sift run");

    Ok(())
}

pub fn cmd_sources(config: &IngestConfig) -> Result<()> {
    println!();
    println!("🏦 Configured Sources (detection order)");
    println!("   ─────────────────────────────────────────────────────────────");

    for source in &config.sources {
        let convention = match &source.amount {
            AmountConvention::Signed { .. } => "signed",
            AmountConvention::Split { .. } => "split",
            AmountConvention::Indicator { .. } => "indicator",
        };
        println!(
            "   {:<16} │ {:<18} │ {:<9} │ {}",
            source.id,
            source.display_name(),
            convention,
            source.detect.headers.join(", ")
        );
    }

    if let Some(path) = default_config_path() {
        println!();
        println!("   Override: {}", path.display());
    }

    Ok(())
}
