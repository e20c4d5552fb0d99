//! The processed-file ledger.
//!
//! One row per committed record file. The controller reads the newest row on
//! startup to recover the last accepted hash, and looks rows up by name to
//! skip files it has already ingested.

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::stream::StreamFile;

/// Summary of a committed record file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFileRecord {
    /// File name; unique.
    pub name: String,
    pub version: i32,
    /// `major.minor.patch`.
    pub hapi_version: String,
    /// Sequential position in the ledger, starting at 0.
    pub index: i64,
    pub consensus_start: i64,
    pub consensus_end: i64,
    pub count: i64,
    pub previous_hash: String,
    pub hash: String,
    pub file_hash: String,
    pub metadata_hash: Option<String>,
    pub node: Option<EntityId>,
    pub size: i64,
    /// Unix seconds when processing of the file began.
    pub load_start: i64,
    /// Unix seconds when the file was committed.
    pub load_end: i64,
}

impl ProcessedFileRecord {
    /// Ledger row for `file`; `previous` is the last accepted row, if any.
    pub fn for_file(
        file: &StreamFile,
        previous: Option<&ProcessedFileRecord>,
        load_start: i64,
        load_end: i64,
    ) -> Self {
        Self {
            name: file.name.clone(),
            version: file.version,
            hapi_version: file.hapi_version.to_string(),
            index: previous.map_or(0, |p| p.index + 1),
            consensus_start: file.consensus_start,
            consensus_end: file.consensus_end,
            count: i64::try_from(file.count()).unwrap_or(i64::MAX),
            previous_hash: file.previous_hash.clone(),
            hash: file.hash.clone(),
            file_hash: file.file_hash.clone(),
            metadata_hash: file.metadata_hash.clone(),
            node: file.node,
            size: i64::try_from(file.size).unwrap_or(i64::MAX),
            load_start,
            load_end,
        }
    }
}
