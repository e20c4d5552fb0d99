//! Batched, transactional persistence of one file's events.
//!
//! ```text
//!  events ──► per-kind batches ──(batch_size reached)──► write_batch
//!                              ──(end of file)─────────► write_batch (all kinds)
//!                                                        write_file_record
//!                                                        commit
//!  any error ──► rollback, nothing of the file remains
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::checkpoint::ProcessedFileRecord;
use crate::error::PersistenceError;
use crate::event::{DomainEvent, EventKind};

/// A store the pipeline can persist into.
///
/// Implementations live in `recordindex-storage` (in-memory and SQLite).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Newest entry of the processed-file ledger.
    async fn last_processed(&self) -> Result<Option<ProcessedFileRecord>, PersistenceError>;

    async fn find_processed(
        &self,
        name: &str,
    ) -> Result<Option<ProcessedFileRecord>, PersistenceError>;

    /// Open the transaction that will hold one file's writes.
    async fn begin(&self) -> Result<Box<dyn StorageTransaction>, PersistenceError>;
}

/// One open storage transaction. Dropping it without `commit` discards it.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Write events that all share `kind`.
    ///
    /// Entity upserts merge present attributes into existing rows; every
    /// other kind is insert-only and fails with
    /// [`PersistenceError::Constraint`] on a key collision.
    async fn write_batch(
        &mut self,
        kind: EventKind,
        events: &[DomainEvent],
    ) -> Result<(), PersistenceError>;

    async fn write_file_record(
        &mut self,
        record: &ProcessedFileRecord,
    ) -> Result<(), PersistenceError>;

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;

    async fn rollback(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Counters for one persisted file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub events: usize,
    pub flushes: usize,
    pub by_kind: BTreeMap<EventKind, usize>,
}

#[derive(Debug, Clone)]
pub struct BatchWriter {
    batch_size: usize,
}

impl BatchWriter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Persist `events` and then `record` in a single transaction.
    ///
    /// `record.load_end` is stamped after the last batch, just before the
    /// ledger row is written.
    pub async fn persist(
        &self,
        backend: &dyn StorageBackend,
        events: Vec<DomainEvent>,
        record: &mut ProcessedFileRecord,
    ) -> Result<WriteStats, PersistenceError> {
        let mut tx = backend.begin().await?;
        match self.write_all(tx.as_mut(), events, record).await {
            Ok(stats) => {
                tx.commit().await?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(file = %record.name, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn write_all(
        &self,
        tx: &mut dyn StorageTransaction,
        events: Vec<DomainEvent>,
        record: &mut ProcessedFileRecord,
    ) -> Result<WriteStats, PersistenceError> {
        let mut stats = WriteStats::default();
        let mut batches: BTreeMap<EventKind, Vec<DomainEvent>> = BTreeMap::new();

        for event in events {
            let kind = event.kind();
            let batch = batches.entry(kind).or_default();
            batch.push(event);
            if batch.len() >= self.batch_size {
                let full = std::mem::take(batch);
                self.flush(tx, kind, &full, &mut stats).await?;
            }
        }

        for (kind, batch) in batches {
            if !batch.is_empty() {
                self.flush(tx, kind, &batch, &mut stats).await?;
            }
        }

        record.load_end = chrono::Utc::now().timestamp();
        tx.write_file_record(record).await?;
        Ok(stats)
    }

    async fn flush(
        &self,
        tx: &mut dyn StorageTransaction,
        kind: EventKind,
        batch: &[DomainEvent],
        stats: &mut WriteStats,
    ) -> Result<(), PersistenceError> {
        tx.write_batch(kind, batch).await?;
        debug!(kind = %kind, events = batch.len(), "Flushed batch");
        stats.events += batch.len();
        stats.flushes += 1;
        *stats.by_kind.entry(kind).or_default() += batch.len();
        Ok(())
    }
}
