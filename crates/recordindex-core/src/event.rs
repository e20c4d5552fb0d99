//! Normalized domain events produced by the extractor.
//!
//! Every event carries the consensus timestamp of the item it came from, so
//! events of different kinds still share one total order. Events are built
//! once and never mutated; the writer dispatches on [`EventKind`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityType};
use crate::types::TransactionType;

// ─── EventKind ───────────────────────────────────────────────────────────────

/// Discriminant of [`DomainEvent`]; also the batch key in the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transaction,
    EntityUpsert,
    Transfer,
    NonFeeTransfer,
    ContractResult,
    ContractLog,
    ContractStateChange,
    TopicMessage,
    LiveHash,
    FileData,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        Self::Transaction,
        Self::EntityUpsert,
        Self::Transfer,
        Self::NonFeeTransfer,
        Self::ContractResult,
        Self::ContractLog,
        Self::ContractStateChange,
        Self::TopicMessage,
        Self::LiveHash,
        Self::FileData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::EntityUpsert => "entity_upsert",
            Self::Transfer => "transfer",
            Self::NonFeeTransfer => "non_fee_transfer",
            Self::ContractResult => "contract_result",
            Self::ContractLog => "contract_log",
            Self::ContractStateChange => "contract_state_change",
            Self::TopicMessage => "topic_message",
            Self::LiveHash => "live_hash",
            Self::FileData => "file_data",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| s.to_string())
    }
}

// ─── Event payloads ──────────────────────────────────────────────────────────

/// One row per ingested item, whatever its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub consensus_timestamp: i64,
    pub transaction_type: TransactionType,
    pub result: i32,
    pub payer: Option<EntityId>,
    pub node: Option<EntityId>,
    /// Entity the transaction targets or created.
    pub entity: Option<EntityId>,
    pub charged_fee: i64,
    pub max_fee: i64,
    pub memo: String,
    pub valid_start_ns: Option<i64>,
    pub valid_duration_seconds: Option<i64>,
    pub transaction_hash: Vec<u8>,
    /// Position of the item within its file.
    pub index: i32,
    pub scheduled: bool,
    pub nonce: i32,
}

/// Create or partial update of an entity.
///
/// `None` fields are left untouched by the writer; only `Some` values
/// overwrite stored attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpsert {
    pub id: EntityId,
    pub entity_type: EntityType,
    /// Timestamp of the item that touched the entity.
    pub consensus_timestamp: i64,
    pub created_timestamp: Option<i64>,
    pub deleted: Option<bool>,
    pub key: Option<Vec<u8>>,
    pub memo: Option<String>,
    pub expiration_timestamp: Option<i64>,
    pub auto_renew_period: Option<i64>,
    pub auto_renew_account: Option<EntityId>,
    pub receiver_sig_required: Option<bool>,
    pub max_automatic_token_associations: Option<i32>,
    pub alias: Option<Vec<u8>>,
    pub submit_key: Option<Vec<u8>>,
    /// Bytecode file of a contract.
    pub file_id: Option<EntityId>,
    pub initcode: Option<Vec<u8>>,
    /// Beneficiary of a deleted entity's remaining balance.
    pub obtainer: Option<EntityId>,
}

impl EntityUpsert {
    /// An upsert that only records that the entity was touched.
    pub fn touch(id: EntityId, entity_type: EntityType, consensus_timestamp: i64) -> Self {
        Self {
            id,
            entity_type,
            consensus_timestamp,
            created_timestamp: None,
            deleted: None,
            key: None,
            memo: None,
            expiration_timestamp: None,
            auto_renew_period: None,
            auto_renew_account: None,
            receiver_sig_required: None,
            max_automatic_token_associations: None,
            alias: None,
            submit_key: None,
            file_id: None,
            initcode: None,
            obtainer: None,
        }
    }

    /// A freshly created entity.
    pub fn created(id: EntityId, entity_type: EntityType, consensus_timestamp: i64) -> Self {
        Self {
            created_timestamp: Some(consensus_timestamp),
            deleted: Some(false),
            ..Self::touch(id, entity_type, consensus_timestamp)
        }
    }
}

/// Balance movement; used for both explicit and non-fee transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub consensus_timestamp: i64,
    pub entity_id: EntityId,
    pub amount: i64,
    pub payer: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractResult {
    pub consensus_timestamp: i64,
    pub contract_id: Option<EntityId>,
    pub payer: Option<EntityId>,
    pub sender: Option<EntityId>,
    pub amount: i64,
    pub gas_limit: i64,
    pub gas_used: i64,
    pub function_parameters: Vec<u8>,
    pub call_result: Vec<u8>,
    pub error_message: Option<String>,
    pub bloom: Vec<u8>,
    pub created_contract_ids: Vec<EntityId>,
    pub transaction_result: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractLog {
    pub consensus_timestamp: i64,
    /// Position of the log within its result.
    pub index: i32,
    pub contract_id: Option<EntityId>,
    pub root_contract_id: Option<EntityId>,
    pub payer: Option<EntityId>,
    pub bloom: Vec<u8>,
    pub data: Vec<u8>,
    pub topics: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractStateChange {
    pub consensus_timestamp: i64,
    pub contract_id: EntityId,
    pub payer: Option<EntityId>,
    pub slot: Vec<u8>,
    pub value_read: Vec<u8>,
    pub value_written: Option<Vec<u8>>,
    /// `false` when the transaction failed; the write is recorded but the
    /// slot's current value is left alone.
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub consensus_timestamp: i64,
    pub topic_id: EntityId,
    pub payer: Option<EntityId>,
    pub message: Vec<u8>,
    pub sequence_number: i64,
    pub running_hash: Vec<u8>,
    pub running_hash_version: i32,
    pub chunk_num: Option<i32>,
    pub chunk_total: Option<i32>,
    /// Valid start of the first chunk's transaction.
    pub initial_valid_start_ns: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveHash {
    pub consensus_timestamp: i64,
    pub account_id: EntityId,
    pub hash: Vec<u8>,
}

/// Contents written by a file create, update or append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    pub consensus_timestamp: i64,
    pub file_id: EntityId,
    pub transaction_type: TransactionType,
    pub data: Vec<u8>,
}

// ─── DomainEvent ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Transaction(TransactionEvent),
    EntityUpsert(EntityUpsert),
    Transfer(Transfer),
    NonFeeTransfer(Transfer),
    ContractResult(ContractResult),
    ContractLog(ContractLog),
    ContractStateChange(ContractStateChange),
    TopicMessage(TopicMessage),
    LiveHash(LiveHash),
    FileData(FileData),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Transaction(_) => EventKind::Transaction,
            Self::EntityUpsert(_) => EventKind::EntityUpsert,
            Self::Transfer(_) => EventKind::Transfer,
            Self::NonFeeTransfer(_) => EventKind::NonFeeTransfer,
            Self::ContractResult(_) => EventKind::ContractResult,
            Self::ContractLog(_) => EventKind::ContractLog,
            Self::ContractStateChange(_) => EventKind::ContractStateChange,
            Self::TopicMessage(_) => EventKind::TopicMessage,
            Self::LiveHash(_) => EventKind::LiveHash,
            Self::FileData(_) => EventKind::FileData,
        }
    }

    pub fn consensus_timestamp(&self) -> i64 {
        match self {
            Self::Transaction(e) => e.consensus_timestamp,
            Self::EntityUpsert(e) => e.consensus_timestamp,
            Self::Transfer(e) | Self::NonFeeTransfer(e) => e.consensus_timestamp,
            Self::ContractResult(e) => e.consensus_timestamp,
            Self::ContractLog(e) => e.consensus_timestamp,
            Self::ContractStateChange(e) => e.consensus_timestamp,
            Self::TopicMessage(e) => e.consensus_timestamp,
            Self::LiveHash(e) => e.consensus_timestamp,
            Self::FileData(e) => e.consensus_timestamp,
        }
    }

    /// Identity the filter matches against.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::Transaction(e) => e.entity.or(e.payer),
            Self::EntityUpsert(e) => Some(e.id),
            Self::Transfer(e) | Self::NonFeeTransfer(e) => Some(e.entity_id),
            Self::ContractResult(e) => e.contract_id,
            Self::ContractLog(e) => e.contract_id,
            Self::ContractStateChange(e) => Some(e.contract_id),
            Self::TopicMessage(e) => Some(e.topic_id),
            Self::LiveHash(e) => Some(e.account_id),
            Self::FileData(e) => Some(e.file_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("balance".parse::<EventKind>().is_err());
    }

    #[test]
    fn accessors() {
        let id = EntityId::of_num(98).unwrap();
        let event = DomainEvent::NonFeeTransfer(Transfer {
            consensus_timestamp: 7,
            entity_id: id,
            amount: -500,
            payer: None,
        });
        assert_eq!(event.kind(), EventKind::NonFeeTransfer);
        assert_eq!(event.consensus_timestamp(), 7);
        assert_eq!(event.entity_id(), Some(id));
    }

    #[test]
    fn created_upsert_sets_creation_fields() {
        let id = EntityId::of_num(1002).unwrap();
        let upsert = EntityUpsert::created(id, EntityType::Account, 10);
        assert_eq!(upsert.created_timestamp, Some(10));
        assert_eq!(upsert.deleted, Some(false));
        assert!(upsert.key.is_none());
    }
}
