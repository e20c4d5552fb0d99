//! recordindex CLI: ingest record stream files and inspect ledger state.
//!
//! Usage:
//! ```bash
//! recordindex ingest  --dir ./records --db ./ledger.db [--config recordindex.json] [--node 0.0.3]
//! recordindex inspect --file ./records/2024-01-01T00_00_00.000000000Z.rcd [--events]
//! recordindex status  --db ./ledger.db
//! recordindex info
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use recordindex_core::codec::supported_versions;
use recordindex_core::entity::EntityId;
use recordindex_core::IngestConfig;
use recordindex_storage::sqlite::{SqliteStorage, TABLES};

mod cmd_ingest;
mod cmd_inspect;
mod config;
mod logging;
mod source;

use config::CliConfig;

#[derive(Parser)]
#[command(
    name = "recordindex",
    about = "Record stream ingestion for a distributed ledger",
    version
)]
struct Cli {
    /// JSON config file with `ingest` and `log` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every new record file in a directory
    Ingest {
        /// Directory holding `*.rcd` files
        #[arg(long)]
        dir: PathBuf,
        /// SQLite database path
        #[arg(long, default_value = "./recordindex.db")]
        db: String,
        /// Node that produced the files, e.g. 0.0.3
        #[arg(long)]
        node: Option<EntityId>,
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Keep everything in memory; the database is not opened
        #[arg(long)]
        dry_run: bool,
    },

    /// Decode a record file and print its summary
    Inspect {
        #[arg(short, long)]
        file: PathBuf,
        /// Also print the extracted events, one JSON object per line
        #[arg(long)]
        events: bool,
    },

    /// Show the processed-file ledger and table sizes
    Status {
        #[arg(long, default_value = "./recordindex.db")]
        db: String,
    },

    /// Show supported formats and defaults
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.log.json |= cli.json_logs;
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Ingest {
            dir,
            db,
            node,
            batch_size,
            dry_run,
        } => {
            if let Some(batch_size) = batch_size {
                config.ingest.batch_size = batch_size;
            }
            cmd_ingest::run(&dir, &db, node, dry_run, &config.ingest).await
        }

        Commands::Inspect { file, events } => cmd_inspect::run(&file, events).await,

        Commands::Status { db } => cmd_status(&db).await,

        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_status(db: &str) -> Result<()> {
    let store = SqliteStorage::open(db)
        .await
        .with_context(|| format!("opening database {db}"))?;
    let files = store.processed_files().await?;

    match files.last() {
        None => println!("No record files ingested yet"),
        Some(last) => {
            println!("Files ingested: {}", files.len());
            println!("  Last file:       {}", last.name);
            println!("  Index:           {}", last.index);
            println!("  Hash:            {}", last.hash);
            println!("  Consensus end:   {}", last.consensus_end);
            println!("  Loaded at:       {}", last.load_end);
        }
    }

    println!("Tables:");
    for table in TABLES {
        println!("  {:<24}{}", table, store.row_count(table).await?);
    }
    Ok(())
}

fn cmd_info() {
    let defaults = IngestConfig::default();
    println!("RecordIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Record file versions: {:?}", supported_versions());
    println!("  Default batch size: {} events per kind", defaults.batch_size);
    println!(
        "  Default retries: {} (backoff {}ms..{}ms)",
        defaults.retry.max_retries, defaults.retry.initial_backoff_ms, defaults.retry.max_backoff_ms
    );
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  File pattern: *.{}", source::EXTENSION);
}
