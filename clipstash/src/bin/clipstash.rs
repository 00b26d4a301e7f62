//! clipstash command-line front end
//!
//! `watch` runs the capture pipeline against the system clipboard until
//! Ctrl-C. The other subcommands read or maintain an existing history.
//!
//! Run with: cargo run --bin clipstash -- watch

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clipstash::{
    Detector, HistoryRecord, HistoryStore, IngestionCoordinator, Settings, SettingsProvider,
    StoreConfig, SystemClipboard,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding history.sqlite, thumbnails/ and images/
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// JSON settings file (retentionLimit, pollIntervalMs, ignoredSources, filterSensitive)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds inside which an identical copy is treated as a repeat
    #[arg(long, default_value_t = 60)]
    dedup_window_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record clipboard changes until interrupted
    Watch,
    /// List the newest unpinned records
    Recent {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// List pinned records
    Pinned,
    /// Case-insensitive substring search over record text
    Search { query: String },
    /// Toggle the pin flag of a record
    Pin { id: String },
    /// Delete one record and its image files
    Delete { id: String },
    /// Delete every unpinned record
    Clear,
    /// Write the history as JSON (stdout when no path is given)
    Export { path: Option<PathBuf> },
    /// Remove image files no record references
    Sweep,
    /// Record counts and disk usage
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipstash=info")),
        )
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    let config = StoreConfig {
        dedup_window: std::time::Duration::from_secs(args.dedup_window_secs),
        ..StoreConfig::default()
    };
    let store = HistoryStore::open(&data_dir, config)
        .with_context(|| format!("Failed to open history at {}", data_dir.display()))?;

    match args.command {
        Command::Watch => watch(Arc::new(store), Arc::new(settings)).await?,
        Command::Recent { limit } => print_records(&store.fetch_recent(limit)?),
        Command::Pinned => print_records(&store.fetch_pinned()?),
        Command::Search { query } => print_records(&store.search(&query)?),
        Command::Pin { id } => {
            let pinned = store.toggle_pin(&id)?;
            println!("{} {}", id, if pinned { "pinned" } else { "unpinned" });
        }
        Command::Delete { id } => {
            store.delete(&id)?;
            println!("Deleted {}", id);
        }
        Command::Clear => {
            let deleted = store.clear_history()?;
            println!("Deleted {} unpinned records", deleted);
        }
        Command::Export { path } => export(&store, path.as_deref())?,
        Command::Sweep => {
            let removed = store.sweep_orphans()?;
            println!("Removed {} orphaned files", removed);
        }
        Command::Stats => {
            let stats = store.stats()?;
            println!("Records:   {} ({} unpinned)", stats.total_records, stats.unpinned_records);
            println!("Database:  {} bytes", stats.database_bytes);
            println!("Images:    {} bytes", stats.blob_bytes);
        }
    }

    Ok(())
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not determine the platform data directory")?;
    Ok(base.join("clipstash"))
}

async fn watch(store: Arc<HistoryStore>, settings: Arc<Settings>) -> Result<()> {
    let reader = SystemClipboard::new().context("Clipboard is not available")?;
    let hashing = store.config().hashing;
    let settings: Arc<dyn SettingsProvider> = settings;

    let mut detector = Detector::new(reader, Arc::clone(&settings), hashing);
    let captures = detector.start().context("Detector failed to start")?;

    let coordinator = IngestionCoordinator::new(store, settings);
    let ingestion = tokio::spawn(async move { coordinator.run(captures).await });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("Interrupted, stopping");

    detector.stop().await;
    let summary = ingestion.await.context("Ingestion task failed")?;
    println!(
        "Stored {} captures ({} repeats skipped, {} failed)",
        summary.stored, summary.duplicates, summary.failed
    );
    Ok(())
}

fn export(store: &HistoryStore, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            let count = store.export_to_file(path)?;
            println!("Exported {} records to {}", count, path.display());
        }
        None => println!("{}", store.export_history()?),
    }
    Ok(())
}

fn print_records(records: &[HistoryRecord]) {
    for record in records {
        let preview: String = record
            .text_content
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(60)
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        println!(
            "{}  {}  {:<5} {}{}",
            record.id,
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.content_type,
            if record.is_pinned { "* " } else { "" },
            preview
        );
    }
}
