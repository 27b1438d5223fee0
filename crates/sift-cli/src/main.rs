//! Sift CLI - Deduplicating transaction ingestion
//!
//! Usage:
//!   sift init                      Initialize database
//!   sift ingest jan.csv feb.csv    Ingest files (auto-detects source)
//!   sift run                       Ingest everything in ./incoming
//!   sift history                   Show recent batches

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::cmd_init(&cli.db, &config),
        Commands::Ingest {
            files,
            source,
            json,
        } => commands::cmd_ingest(&cli.db, config, files, source, json).await,
        Commands::Run {
            incoming,
            processed,
        } => commands::cmd_run(&cli.db, config, &incoming, &processed).await,
        Commands::Transactions {
            limit,
            source,
            filename,
        } => {
            let db = commands::open_db(&cli.db, &config)?;
            commands::cmd_transactions_list(&db, limit, source, filename)
        }
        Commands::Categorize { id, category, auto } => {
            let db = commands::open_db(&cli.db, &config)?;
            match (id, category) {
                (Some(id), Some(category)) => commands::cmd_categorize(&db, id, &category),
                _ if auto => commands::cmd_categorize_auto(&db, &config),
                _ => anyhow::bail!("Specify --id with --category, or --auto"),
            }
        }
        Commands::History { limit } => {
            let db = commands::open_db(&cli.db, &config)?;
            commands::cmd_history(&db, limit)
        }
        Commands::Sources => commands::cmd_sources(&config),
    }
}
