//! Per-file ingestion state machine.
//!
//! ```text
//!  Pending ──(in ledger)──────────────────────────────────────► Committed (skip)
//!     │
//!     ▼
//!  Decoding ──► Verifying ──► Extracting ──► Persisting ──► Committed
//!     │            │              ▲              │
//!     │            │              └──(transient, retries left)
//!     ▼            ▼                             ▼
//!  Aborted ◄───────┴─────────────────────────────┘
//! ```
//!
//! Files are handled one at a time. The last accepted ledger row is the only
//! state carried between files; it is loaded from storage on construction
//! and replaced only after a commit.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checkpoint::ProcessedFileRecord;
use crate::codec;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::extractor::EventExtractor;
use crate::retry::RetryPolicy;
use crate::stream::{StreamFile, StreamFileData};
use crate::verifier::HashChainVerifier;
use crate::writer::{BatchWriter, StorageBackend, WriteStats};

// ─── FileState ───────────────────────────────────────────────────────────────

/// Where the controller is with the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Pending,
    Decoding,
    Verifying,
    Extracting,
    Persisting,
    /// Written and committed, or already in the ledger.
    Committed,
    /// Rejected; nothing of the file was persisted.
    Aborted,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Decoding => "decoding",
            Self::Verifying => "verifying",
            Self::Extracting => "extracting",
            Self::Persisting => "persisting",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result of a successful [`IngestionController::ingest`].
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Committed {
        record: ProcessedFileRecord,
        stats: WriteStats,
        attempts: u32,
    },
    /// Already in the ledger; the bytes were not looked at.
    Skipped { name: String },
}

// ─── StreamFileSource ────────────────────────────────────────────────────────

/// Supplier of raw files, in ascending name order, each at most once.
#[async_trait]
pub trait StreamFileSource: Send {
    /// The next file, or `None` when the source is exhausted for now.
    async fn next_file(&mut self) -> Result<Option<StreamFileData>, IngestError>;
}

#[async_trait]
impl StreamFileSource for VecDeque<StreamFileData> {
    async fn next_file(&mut self) -> Result<Option<StreamFileData>, IngestError> {
        Ok(self.pop_front())
    }
}

/// Totals for one [`IngestionController::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub committed: usize,
    pub skipped: usize,
    /// Stopped by the shutdown flag rather than source exhaustion.
    pub interrupted: bool,
}

// ─── IngestionController ─────────────────────────────────────────────────────

pub struct IngestionController {
    backend: Arc<dyn StorageBackend>,
    verifier: HashChainVerifier,
    extractor: EventExtractor,
    writer: BatchWriter,
    retry: RetryPolicy,
    last: Option<ProcessedFileRecord>,
    state: FileState,
}

impl IngestionController {
    /// Validates `config` and loads the last accepted file from `backend`.
    pub async fn new(
        config: &IngestConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, IngestError> {
        let filter = config.validate()?;
        let last = backend
            .last_processed()
            .await
            .map_err(|source| IngestError::Persistence {
                file: String::new(),
                attempts: 1,
                source,
            })?;
        if let Some(last) = &last {
            info!(
                file = %last.name,
                index = last.index,
                hash = %last.hash,
                "Resuming after last accepted file"
            );
        }
        Ok(Self {
            backend,
            verifier: HashChainVerifier::new(config.bypass_hash_mismatch_until.clone()),
            extractor: EventExtractor::new(filter, config.persist.clone()),
            writer: BatchWriter::new(config.batch_size),
            retry: RetryPolicy::new(config.retry.clone()),
            last,
            state: FileState::Pending,
        })
    }

    pub fn last_accepted(&self) -> Option<&ProcessedFileRecord> {
        self.last.as_ref()
    }

    /// State reached by the most recent file.
    pub fn state(&self) -> FileState {
        self.state
    }

    /// Drive one file to `Committed` or `Aborted`.
    pub async fn ingest(&mut self, data: StreamFileData) -> Result<IngestOutcome, IngestError> {
        self.state = FileState::Pending;
        let result = self.ingest_inner(data).await;
        self.state = match &result {
            Ok(_) => FileState::Committed,
            Err(_) => FileState::Aborted,
        };
        result
    }

    async fn ingest_inner(&mut self, data: StreamFileData) -> Result<IngestOutcome, IngestError> {
        let started = Instant::now();
        let load_start = chrono::Utc::now().timestamp();
        let name = data.name.clone();

        let existing = self
            .backend
            .find_processed(&name)
            .await
            .map_err(|source| IngestError::Persistence {
                file: name.clone(),
                attempts: 1,
                source,
            })?;
        if existing.is_some() {
            debug!(file = %name, "Already processed, skipping");
            return Ok(IngestOutcome::Skipped { name });
        }
        if let Some(last) = &self.last {
            if name <= last.name {
                return Err(IngestError::OutOfOrder {
                    file: name,
                    reason: format!("name does not sort after last accepted file {}", last.name),
                });
            }
        }

        self.state = FileState::Decoding;
        let file = codec::decode(&data).map_err(|source| IngestError::Decode {
            file: name.clone(),
            source,
        })?;

        self.state = FileState::Verifying;
        self.verifier
            .verify(&file, self.last.as_ref().map(|l| l.hash.as_str()))?;
        if let Some(last) = &self.last {
            if file.consensus_start <= last.consensus_end {
                return Err(IngestError::OutOfOrder {
                    file: name,
                    reason: format!(
                        "consensus start {} is not after {} of {}",
                        file.consensus_start, last.consensus_end, last.name
                    ),
                });
            }
        }

        let (record, stats, attempts) = self.persist_with_retry(&file, load_start).await?;
        info!(
            file = %record.name,
            index = record.index,
            items = record.count,
            events = stats.events,
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Committed record file"
        );
        self.last = Some(record.clone());
        Ok(IngestOutcome::Committed {
            record,
            stats,
            attempts,
        })
    }

    /// Extract and persist, retrying the pair on transient storage errors.
    async fn persist_with_retry(
        &mut self,
        file: &StreamFile,
        load_start: i64,
    ) -> Result<(ProcessedFileRecord, WriteStats, u32), IngestError> {
        let mut attempt = 1;
        loop {
            self.state = FileState::Extracting;
            let events = self.extractor.extract_file(file);

            self.state = FileState::Persisting;
            let mut record =
                ProcessedFileRecord::for_file(file, self.last.as_ref(), load_start, load_start);
            match self.writer.persist(self.backend.as_ref(), events, &mut record).await {
                Ok(stats) => return Ok((record, stats, attempt)),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.next_delay(attempt).unwrap_or_default();
                    warn!(
                        file = %file.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage error, retrying file"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(IngestError::Persistence {
                        file: file.name.clone(),
                        attempts: attempt,
                        source,
                    })
                }
            }
        }
    }

    /// Ingest files from `source` until it is exhausted, a file fails, or
    /// `shutdown` is set. The flag is only checked between files.
    pub async fn run(
        &mut self,
        source: &mut dyn StreamFileSource,
        shutdown: &AtomicBool,
    ) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::default();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!(committed = summary.committed, "Shutdown requested, stopping between files");
                summary.interrupted = true;
                break;
            }
            let Some(data) = source.next_file().await? else {
                break;
            };
            match self.ingest(data).await? {
                IngestOutcome::Committed { .. } => summary.committed += 1,
                IngestOutcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        Ok(summary)
    }
}

impl fmt::Debug for IngestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionController")
            .field("last", &self.last.as_ref().map(|l| &l.name))
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::codec::{ItemBuilder, RecordFileBuilder};
    use crate::entity::EntityId;
    use crate::error::PersistenceError;
    use crate::event::{DomainEvent, EventKind};
    use crate::retry::RetryConfig;
    use crate::writer::StorageTransaction;

    /// Minimal backend: ledger rows only, with scripted transient failures.
    #[derive(Default)]
    struct Ledger {
        rows: Mutex<Vec<ProcessedFileRecord>>,
        failures: Mutex<u32>,
    }

    #[derive(Default, Clone)]
    struct LedgerOnly(Arc<Ledger>);

    struct LedgerTx {
        ledger: Arc<Ledger>,
        staged: Option<ProcessedFileRecord>,
    }

    #[async_trait]
    impl StorageBackend for LedgerOnly {
        async fn last_processed(&self) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
            Ok(self.0.rows.lock().unwrap().last().cloned())
        }

        async fn find_processed(
            &self,
            name: &str,
        ) -> Result<Option<ProcessedFileRecord>, PersistenceError> {
            Ok(self.0.rows.lock().unwrap().iter().find(|r| r.name == name).cloned())
        }

        async fn begin(&self) -> Result<Box<dyn StorageTransaction>, PersistenceError> {
            Ok(Box::new(LedgerTx {
                ledger: self.0.clone(),
                staged: None,
            }))
        }
    }

    #[async_trait]
    impl StorageTransaction for LedgerTx {
        async fn write_batch(
            &mut self,
            _kind: EventKind,
            _events: &[DomainEvent],
        ) -> Result<(), PersistenceError> {
            let mut failures = self.ledger.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PersistenceError::Transient("connection reset".into()));
            }
            Ok(())
        }

        async fn write_file_record(
            &mut self,
            record: &ProcessedFileRecord,
        ) -> Result<(), PersistenceError> {
            self.staged = Some(record.clone());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
            if let Some(row) = self.staged {
                self.ledger.rows.lock().unwrap().push(row);
            }
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn file(name: &str, previous: &str, start: i64) -> (StreamFileData, String) {
        let payer = EntityId::of_num(2).unwrap();
        let mut builder = RecordFileBuilder::new(5);
        if !previous.is_empty() {
            builder = builder.previous_hash_hex(previous).unwrap();
        }
        let bytes = builder
            .item(ItemBuilder::new(payer, start))
            .item(ItemBuilder::new(payer, start + 1))
            .build()
            .unwrap();
        let data = StreamFileData::new(name, bytes);
        let hash = codec::decode(&data).unwrap().hash;
        (data, hash)
    }

    fn fast_retry(max_retries: u32) -> IngestConfig {
        IngestConfig {
            retry: RetryConfig {
                max_retries,
                initial_backoff_ms: 1,
                max_backoff_ms: 1,
                multiplier: 1.0,
                jitter_fraction: 0.0,
            },
            ..Default::default()
        }
    }

    async fn controller(backend: &LedgerOnly, config: IngestConfig) -> IngestionController {
        IngestionController::new(&config, Arc::new(backend.clone()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commits_then_skips_same_name() {
        let backend = LedgerOnly::default();
        let mut c = controller(&backend, IngestConfig::default()).await;
        let (a, _) = file("a.rcd", "", 100);

        assert!(matches!(c.ingest(a.clone()).await.unwrap(), IngestOutcome::Committed { .. }));
        assert_eq!(c.state(), FileState::Committed);
        assert!(matches!(c.ingest(a).await.unwrap(), IngestOutcome::Skipped { .. }));
        assert_eq!(backend.0.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let backend = LedgerOnly::default();
        *backend.0.failures.lock().unwrap() = 2;
        let mut c = controller(&backend, fast_retry(3)).await;
        let (a, _) = file("a.rcd", "", 100);
        match c.ingest(a).await.unwrap() {
            IngestOutcome::Committed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_abort() {
        let backend = LedgerOnly::default();
        *backend.0.failures.lock().unwrap() = 10;
        let mut c = controller(&backend, fast_retry(2)).await;
        let (a, _) = file("a.rcd", "", 100);
        match c.ingest(a).await.unwrap_err() {
            IngestError::Persistence { attempts, source, .. } => {
                assert_eq!(attempts, 3);
                assert!(source.is_transient());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(c.state(), FileState::Aborted);
        assert!(c.last_accepted().is_none());
        assert!(backend.0.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn chain_is_reloaded_on_restart() {
        let backend = LedgerOnly::default();
        let (a, hash_a) = file("a.rcd", "", 100);
        controller(&backend, IngestConfig::default()).await.ingest(a).await.unwrap();

        let mut restarted = controller(&backend, IngestConfig::default()).await;
        assert_eq!(restarted.last_accepted().unwrap().hash, hash_a);

        let (bad, _) = file("b.rcd", &"00".repeat(48), 200);
        assert!(restarted.ingest(bad).await.unwrap_err().is_hash_mismatch());

        let (good, _) = file("b.rcd", &hash_a, 200);
        match restarted.ingest(good).await.unwrap() {
            IngestOutcome::Committed { record, .. } => assert_eq!(record.index, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_out_of_order_files() {
        let backend = LedgerOnly::default();
        let mut c = controller(&backend, IngestConfig::default()).await;
        let (b, hash_b) = file("b.rcd", "", 100);
        c.ingest(b).await.unwrap();

        let (a, _) = file("a.rcd", &hash_b, 200);
        assert!(matches!(c.ingest(a).await.unwrap_err(), IngestError::OutOfOrder { .. }));

        let (c_file, _) = file("c.rcd", &hash_b, 50);
        assert!(matches!(c.ingest(c_file).await.unwrap_err(), IngestError::OutOfOrder { .. }));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_flag() {
        let backend = LedgerOnly::default();
        let mut c = controller(&backend, IngestConfig::default()).await;
        let (a, hash_a) = file("a.rcd", "", 100);
        let (b, _) = file("b.rcd", &hash_a, 200);
        let mut source: VecDeque<StreamFileData> = VecDeque::from(vec![a, b]);

        let summary = c.run(&mut source, &AtomicBool::new(false)).await.unwrap();
        assert_eq!(summary.committed, 2);
        assert!(!summary.interrupted);

        let (c_file, _) = file("c.rcd", "", 300);
        let mut more = VecDeque::from(vec![c_file]);
        let summary = c.run(&mut more, &AtomicBool::new(true)).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.committed, 0);
        assert_eq!(more.len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let backend = LedgerOnly::default();
        let config = IngestConfig {
            batch_size: 0,
            ..Default::default()
        };
        let err = IngestionController::new(&config, Arc::new(backend)).await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}
