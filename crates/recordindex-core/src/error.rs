//! Error types for the record stream ingestion pipeline.

use thiserror::Error;

/// Errors raised while decoding a raw record stream file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported record file version {version}")]
    UnsupportedVersion { version: i32 },

    #[error("Malformed record file: {reason}")]
    Malformed { reason: String },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

impl From<prost::DecodeError> for DecodeError {
    fn from(e: prost::DecodeError) -> Self {
        Self::malformed(format!("protobuf: {e}"))
    }
}

/// Hash-chain continuity failures.
#[derive(Debug, Error)]
pub enum HashMismatchError {
    #[error("Previous hash mismatch for {file}: expected {expected}, file declares {actual}")]
    PreviousHash {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Hash mismatch for {file}: declared {declared}, computed {computed}")]
    SelfHash {
        file: String,
        declared: String,
        computed: String,
    },
}

/// A filter rule that cannot be compiled.
#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("Invalid entity id in filter rule: {0}")]
    InvalidEntityId(#[from] EntityIdError),

    #[error("Unknown event kind '{0}'")]
    UnknownKind(String),

    #[error("Unknown transaction type '{0}'")]
    UnknownTransactionType(String),

    #[error("Filter rule #{index} in '{list}' matches everything")]
    EmptyRule { list: &'static str, index: usize },
}

/// Invalid entity identity components or encodings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("{component} {value} out of range (max {max})")]
    OutOfRange {
        component: &'static str,
        value: i64,
        max: i64,
    },

    #[error("Cannot parse entity id '{0}'")]
    Parse(String),
}

/// Storage failures surfaced by a [`StorageBackend`](crate::writer::StorageBackend).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Lost connection or exhausted pool; safe to retry.
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Key collision on an append-only table; the file was already persisted.
    #[error("Constraint violation on {table}: {detail}")]
    Constraint { table: String, detail: String },

    #[error("Storage error: {0}")]
    Other(String),
}

impl PersistenceError {
    /// Returns `true` if the controller may retry the file.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors surfaced by the ingestion controller.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to decode {file}: {source}")]
    Decode {
        file: String,
        #[source]
        source: DecodeError,
    },

    #[error(transparent)]
    HashMismatch(#[from] HashMismatchError),

    #[error("Failed to persist {file} after {attempts} attempt(s): {source}")]
    Persistence {
        file: String,
        attempts: u32,
        #[source]
        source: PersistenceError,
    },

    #[error("Out of order: {file} ({reason})")]
    OutOfOrder { file: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Filter(#[from] FilterConfigError),

    #[error("Source error: {0}")]
    Source(String),
}

impl IngestError {
    /// Returns `true` if the error was caused by a hash-chain break.
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, Self::HashMismatch(_))
    }
}
