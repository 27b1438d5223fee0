//! Ingest command implementations

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use sift_core::{ingest_reader, BatchResult, Database, IngestConfig};
use tracing::{info, warn};

use super::{open_db, truncate};

/// Files moved or left behind by `sift run`
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: Vec<PathBuf>,
    pub left_in_place: Vec<PathBuf>,
}

pub async fn cmd_ingest(
    db_path: &Path,
    config: IngestConfig,
    files: Vec<PathBuf>,
    source: Option<String>,
    json: bool,
) -> Result<()> {
    let db = open_db(db_path, &config)?;
    let stop = stop_on_ctrl_c();

    if !json {
        println!("📥 Ingesting {} file(s)...", files.len());
    }

    let outcomes = ingest_files(&db, Arc::new(config), files, source, stop).await;
    let failed = outcomes.iter().filter(|(_, o)| o.is_err()).count();

    if json {
        let entries: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|(path, outcome)| match outcome {
                Ok(result) => serde_json::json!({
                    "file": path.display().to_string(),
                    "result": result,
                }),
                Err(e) => serde_json::json!({
                    "file": path.display().to_string(),
                    "error": format!("{:#}", e),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (path, outcome) in &outcomes {
            match outcome {
                Ok(result) => print_batch_summary(result),
                Err(e) => {
                    println!();
                    println!("❌ {}: {:#}", path.display(), e);
                }
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) could not be ingested", failed, outcomes.len());
    }
    Ok(())
}

pub async fn cmd_run(
    db_path: &Path,
    config: IngestConfig,
    incoming: &Path,
    processed: &Path,
) -> Result<()> {
    let db = open_db(db_path, &config)?;
    let stop = stop_on_ctrl_c();

    println!("📂 Processing {}...", incoming.display());
    let summary = process_incoming(&db, config, incoming, processed, stop).await?;

    println!();
    println!("✅ Run complete!");
    println!("   Moved to {}: {}", processed.display(), summary.processed.len());
    if !summary.left_in_place.is_empty() {
        println!("   Left in {}: {}", incoming.display(), summary.left_in_place.len());
        for path in &summary.left_in_place {
            println!("     - {}", path.display());
        }
    }

    Ok(())
}

/// Ingest every CSV in `incoming`, moving completed files to `processed`
///
/// Files that fail (unknown format, unreadable) or whose batch was stopped
/// stay in `incoming` so the next run picks them up again.
pub async fn process_incoming(
    db: &Database,
    config: IngestConfig,
    incoming: &Path,
    processed: &Path,
    stop: Arc<AtomicBool>,
) -> Result<RunSummary> {
    let files = list_csv_files(incoming)?;
    if files.is_empty() {
        info!("No CSV files in {}", incoming.display());
        return Ok(RunSummary::default());
    }

    fs::create_dir_all(processed)
        .with_context(|| format!("Failed to create {}", processed.display()))?;

    let outcomes = ingest_files(db, Arc::new(config), files, None, stop).await;

    let mut summary = RunSummary::default();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(result) if !result.stopped_early => {
                print_batch_summary(&result);
                let target = processed.join(path.file_name().unwrap_or_default());
                fs::rename(&path, &target).with_context(|| {
                    format!("Failed to move {} to {}", path.display(), target.display())
                })?;
                summary.processed.push(target);
            }
            Ok(result) => {
                print_batch_summary(&result);
                warn!(
                    "{} was interrupted; leaving it in place (re-running is safe)",
                    path.display()
                );
                summary.left_in_place.push(path);
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", path.display(), e);
                summary.left_in_place.push(path);
            }
        }
    }

    Ok(summary)
}

/// Ingest and record one file as a batch named after its file name
pub fn ingest_file(
    db: &Database,
    config: &IngestConfig,
    path: &Path,
    source: Option<&str>,
    stop: Option<&AtomicBool>,
) -> Result<BatchResult> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file name: {}", path.display()))?;
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let result = ingest_reader(db, config, filename, BufReader::new(file), source, stop)
        .with_context(|| format!("Failed to ingest {}", path.display()))?;
    db.record_batch(&result)
        .context("Failed to record batch history")?;

    Ok(result)
}

/// One blocking task per file; results come back in input order
async fn ingest_files(
    db: &Database,
    config: Arc<IngestConfig>,
    files: Vec<PathBuf>,
    source: Option<String>,
    stop: Arc<AtomicBool>,
) -> Vec<(PathBuf, Result<BatchResult>)> {
    let handles: Vec<_> = files
        .into_iter()
        .map(|path| {
            let db = db.clone();
            let config = config.clone();
            let source = source.clone();
            let stop = stop.clone();
            let task_path = path.clone();
            let handle = tokio::task::spawn_blocking(move || {
                ingest_file(&db, &config, &task_path, source.as_deref(), Some(&*stop))
            });
            (path, handle)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (path, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("Ingest task failed: {}", e)),
        };
        outcomes.push((path, outcome));
    }
    outcomes
}

/// Sorted `*.csv` files directly inside `dir`
fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Shared stop flag, set on the first Ctrl-C
fn stop_on_ctrl_c() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping batches at the next row");
            flag.store(true, Ordering::SeqCst);
        }
    });
    stop
}

fn print_batch_summary(result: &BatchResult) {
    println!();
    println!("📄 {} ({})", result.filename, result.source);
    println!("   Inserted: {}", result.inserted_count);
    println!("   Skipped (duplicates): {}", result.skipped_duplicate_count);
    if result.filtered_count > 0 {
        println!("   Filtered: {}", result.filtered_count);
    }
    if !result.failed_rows.is_empty() {
        println!("   Failed: {}", result.failed_rows.len());
        for failed in &result.failed_rows {
            println!(
                "     line {}: {}",
                failed.row.line,
                truncate(&failed.error.to_string(), 70)
            );
        }
    }
    if result.stopped_early {
        println!(
            "   ⚠️  Stopped early: {} rows not attempted",
            result.not_attempted_count
        );
    }
}
