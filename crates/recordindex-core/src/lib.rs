//! recordindex-core: decoding, verification, extraction and ingestion control
//! for ledger record stream files.
//!
//! # Architecture
//!
//! ```text
//! StreamFileSource → IngestionController
//!                        ├── codec::decode       (versioned binary record files)
//!                        ├── HashChainVerifier   (previous-hash + self-hash checks)
//!                        ├── EventExtractor      (per-type mapping, non-fee transfers, filter)
//!                        ├── BatchWriter         (per-kind batches, one transaction per file)
//!                        └── StorageBackend      (memory / SQLite, in recordindex-storage)
//! ```

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod event;
pub mod extractor;
pub mod filter;
pub mod proto;
pub mod retry;
pub mod stream;
pub mod types;
pub mod verifier;
pub mod writer;

pub use checkpoint::ProcessedFileRecord;
pub use codec::{decode, ItemBuilder, RecordFileBuilder};
pub use config::{IngestConfig, PersistConfig};
pub use controller::{FileState, IngestOutcome, IngestionController, RunSummary, StreamFileSource};
pub use entity::{EntityId, EntityType};
pub use error::{
    DecodeError, EntityIdError, FilterConfigError, HashMismatchError, IngestError, PersistenceError,
};
pub use event::{DomainEvent, EventKind};
pub use extractor::EventExtractor;
pub use filter::{FilterConfig, FilterRuleConfig, IngestionFilter};
pub use retry::{RetryConfig, RetryPolicy};
pub use stream::{RecordItem, StreamFile, StreamFileData, StreamFileSummary};
pub use types::{HapiVersion, TransactionType};
pub use verifier::HashChainVerifier;
pub use writer::{BatchWriter, StorageBackend, StorageTransaction, WriteStats};
