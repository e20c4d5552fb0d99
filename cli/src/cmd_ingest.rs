//! `recordindex ingest`: load a directory of record files into a database.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use recordindex_core::entity::EntityId;
use recordindex_core::{IngestConfig, IngestionController, StorageBackend};
use recordindex_storage::{InMemoryStorage, SqliteStorage};

use crate::source::DirectorySource;

pub async fn run(
    dir: &Path,
    db: &str,
    node: Option<EntityId>,
    dry_run: bool,
    config: &IngestConfig,
) -> Result<()> {
    let backend: Arc<dyn StorageBackend> = if dry_run {
        info!("Dry run, events are kept in memory only");
        Arc::new(InMemoryStorage::new())
    } else {
        Arc::new(
            SqliteStorage::open(db)
                .await
                .with_context(|| format!("opening database {db}"))?,
        )
    };

    let mut controller = IngestionController::new(config, backend)
        .await
        .context("starting ingestion")?;
    let after = controller.last_accepted().map(|l| l.name.clone());
    let mut source = DirectorySource::scan(dir, after.as_deref(), node)
        .with_context(|| format!("listing {}", dir.display()))?;
    if source.is_empty() {
        info!(dir = %dir.display(), "No new record files");
    } else {
        info!(dir = %dir.display(), pending = source.len(), "Starting ingestion");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing current file");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let summary = controller
        .run(&mut source, &shutdown)
        .await
        .context("ingestion stopped")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
