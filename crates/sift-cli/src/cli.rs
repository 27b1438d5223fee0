//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};

/// Sift - Deduplicating transaction ingestion
#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Ingest bank CSV exports into a deduplicated ledger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "sift.db", global = true)]
    pub db: PathBuf,

    /// Source configuration file (defaults to the data dir override, then built-in)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Ingest one or more CSV files (one batch per file)
    Ingest {
        /// CSV files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Source id (auto-detected from headers if not specified)
        #[arg(short, long)]
        source: Option<String>,

        /// Print batch results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ingest every CSV in the incoming directory, then move it to processed
    Run {
        /// Directory to pick up CSV files from
        #[arg(long, default_value = "incoming")]
        incoming: PathBuf,

        /// Directory completed files are moved to
        #[arg(long, default_value = "processed")]
        processed: PathBuf,
    },

    /// List stored transactions
    Transactions {
        /// Number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Only transactions from this source
        #[arg(short, long)]
        source: Option<String>,

        /// Only transactions from this uploaded file
        #[arg(short, long)]
        filename: Option<String>,
    },

    /// Set a transaction's category, or fill in categories from vendor rules
    #[command(group(ArgGroup::new("mode").required(true).args(["id", "auto"])))]
    Categorize {
        /// Transaction ID
        #[arg(long, requires = "category")]
        id: Option<i64>,

        /// Category name
        #[arg(long)]
        category: Option<String>,

        /// Apply vendor rules to uncategorized transactions
        #[arg(long)]
        auto: bool,
    },

    /// Show recent ingest batches
    History {
        /// Number of batches to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// List configured sources
    Sources,
}
