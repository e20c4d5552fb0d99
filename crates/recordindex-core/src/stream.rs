//! Decoded record stream files and the items they carry.

use bytes::Bytes;
use serde::Serialize;

use crate::entity::EntityId;
use crate::proto::{self, TransactionBody, TransactionRecord};
use crate::types::{HapiVersion, TransactionType};

/// Raw input handed to the pipeline by the file-discovery side.
#[derive(Debug, Clone)]
pub struct StreamFileData {
    /// File name; encodes a sortable consensus timestamp.
    pub name: String,
    pub bytes: Bytes,
    /// Node that produced the file, when the source knows it.
    pub node: Option<EntityId>,
}

impl StreamFileData {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            node: None,
        }
    }

    pub fn with_node(mut self, node: EntityId) -> Self {
        self.node = Some(node);
        self
    }
}

/// One decoded ingest unit. Built once by the decoder, immutable afterwards.
#[derive(Debug, Clone)]
pub struct StreamFile {
    pub name: String,
    pub version: i32,
    pub hapi_version: HapiVersion,
    /// Consensus timestamp of the first item (ns since epoch).
    pub consensus_start: i64,
    /// Consensus timestamp of the last item (ns since epoch).
    pub consensus_end: i64,
    /// Hex hash of the file this one claims to follow.
    pub previous_hash: String,
    /// Hex chain hash as declared inside the file.
    pub hash: String,
    /// Hex chain hash recomputed from the bytes.
    pub computed_hash: String,
    /// Hex SHA-384 of the whole file.
    pub file_hash: String,
    /// Hex hash over the header and running hashes (v5+).
    pub metadata_hash: Option<String>,
    pub node: Option<EntityId>,
    pub size: usize,
    pub items: Vec<RecordItem>,
}

impl StreamFile {
    pub fn count(&self) -> usize {
        self.items.len()
    }
}

/// One transaction and the ledger's record of its outcome.
#[derive(Debug, Clone)]
pub struct RecordItem {
    /// Position within the owning file.
    pub index: usize,
    pub consensus_timestamp: i64,
    pub transaction_type: TransactionType,
    pub transaction: proto::Transaction,
    pub body: TransactionBody,
    pub record: TransactionRecord,
    /// Exact bytes read from the file.
    pub transaction_bytes: Bytes,
    /// Exact bytes read from the file.
    pub record_bytes: Bytes,
}

impl RecordItem {
    pub fn status(&self) -> i32 {
        self.record.status()
    }

    pub fn is_successful(&self) -> bool {
        proto::status::is_success(self.status())
    }

    /// The account that paid for the transaction.
    pub fn payer(&self) -> Option<EntityId> {
        self.body
            .transaction_id
            .as_ref()
            .and_then(|id| EntityId::from_proto(id.account_id.as_ref()))
            .and_then(Result::ok)
    }

    pub fn receipt(&self) -> Option<&proto::TransactionReceipt> {
        self.record.receipt.as_ref()
    }
}

/// Serializable projection of a decoded file, used by tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StreamFileSummary {
    pub name: String,
    pub version: i32,
    pub hapi_version: String,
    pub consensus_start: i64,
    pub consensus_end: i64,
    pub count: usize,
    pub previous_hash: String,
    pub hash: String,
    pub file_hash: String,
    pub metadata_hash: Option<String>,
    pub size: usize,
}

impl From<&StreamFile> for StreamFileSummary {
    fn from(file: &StreamFile) -> Self {
        Self {
            name: file.name.clone(),
            version: file.version,
            hapi_version: file.hapi_version.to_string(),
            consensus_start: file.consensus_start,
            consensus_end: file.consensus_end,
            count: file.count(),
            previous_hash: file.previous_hash.clone(),
            hash: file.hash.clone(),
            file_hash: file.file_hash.clone(),
            metadata_hash: file.metadata_hash.clone(),
            size: file.size,
        }
    }
}
