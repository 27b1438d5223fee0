//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Core commands (init, sources) and shared utilities (open_db, load_config)
//! - `ingest` - Batch ingestion (explicit files, incoming directory runs)
//! - `transactions` - Transaction commands (list, categorize)
//! - `history` - Ingest batch history

pub mod core;
pub mod history;
pub mod ingest;
pub mod transactions;

// Re-export command functions for main.rs
pub use core::*;
pub use history::*;
pub use ingest::*;
pub use transactions::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
