//! Wire messages carried inside record stream files.
//!
//! A subset of the ledger's public protobuf schema, declared with `prost`
//! derives. Field numbers follow the upstream schema so real items decode;
//! fields this pipeline has no use for are simply not declared and are
//! skipped on decode (the raw bytes stay on the [`RecordItem`](crate::stream::RecordItem)).

/// Response codes the extractor distinguishes. Everything else is a failure.
pub mod status {
    pub const SUCCESS: i32 = 22;
    pub const FEE_SCHEDULE_FILE_PART_UPLOADED: i32 = 104;
    pub const SUCCESS_BUT_MISSING_EXPECTED_OPERATION: i32 = 220;
    pub const INSUFFICIENT_PAYER_BALANCE: i32 = 10;
    pub const CONTRACT_REVERT_EXECUTED: i32 = 33;

    /// Returns `true` if the ledger applied the transaction's effects.
    pub fn is_success(code: i32) -> bool {
        matches!(
            code,
            SUCCESS | FEE_SCHEDULE_FILE_PART_UPLOADED | SUCCESS_BUT_MISSING_EXPECTED_OPERATION
        )
    }
}

// ─── Primitives ──────────────────────────────────────────────────────────────

/// Shard/realm/number triple shared by accounts, contracts, files and topics.
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct EntityNum {
    #[prost(int64, tag = "1")]
    pub shard: i64,
    #[prost(int64, tag = "2")]
    pub realm: i64,
    #[prost(int64, tag = "3")]
    pub num: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    /// Nanoseconds since epoch; `None` on overflow or out-of-range nanos.
    pub fn to_nanos(&self) -> Option<i64> {
        if !(0..1_000_000_000).contains(&self.nanos) {
            return None;
        }
        self.seconds
            .checked_mul(1_000_000_000)?
            .checked_add(i64::from(self.nanos))
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            seconds: nanos.div_euclid(1_000_000_000),
            nanos: nanos.rem_euclid(1_000_000_000) as i32,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct Duration {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionId {
    #[prost(message, optional, tag = "1")]
    pub transaction_valid_start: Option<Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub account_id: Option<EntityNum>,
    #[prost(bool, tag = "3")]
    pub scheduled: bool,
    #[prost(int32, tag = "4")]
    pub nonce: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AccountAmount {
    #[prost(message, optional, tag = "1")]
    pub account_id: Option<EntityNum>,
    #[prost(sint64, tag = "2")]
    pub amount: i64,
    #[prost(bool, tag = "3")]
    pub is_approval: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransferList {
    #[prost(message, repeated, tag = "1")]
    pub account_amounts: Vec<AccountAmount>,
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// The signed envelope as it appears in a record file.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transaction {
    #[prost(bytes = "vec", tag = "1")]
    pub body_bytes: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub sig_map: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionBody {
    #[prost(message, optional, tag = "1")]
    pub transaction_id: Option<TransactionId>,
    #[prost(message, optional, tag = "2")]
    pub node_account_id: Option<EntityNum>,
    #[prost(uint64, tag = "3")]
    pub transaction_fee: u64,
    #[prost(message, optional, tag = "4")]
    pub transaction_valid_duration: Option<Duration>,
    #[prost(string, tag = "6")]
    pub memo: String,
    #[prost(
        oneof = "transaction_body::Data",
        tags = "7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 22, 24, 25, 26, 27"
    )]
    pub data: Option<transaction_body::Data>,
}

pub mod transaction_body {
    /// Functional payload; the tag doubles as the transaction type code.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Data {
        #[prost(message, tag = "7")]
        ContractCall(super::ContractCallTransactionBody),
        #[prost(message, tag = "8")]
        ContractCreateInstance(super::ContractCreateTransactionBody),
        #[prost(message, tag = "9")]
        ContractUpdateInstance(super::ContractUpdateTransactionBody),
        #[prost(message, tag = "10")]
        CryptoAddLiveHash(super::CryptoAddLiveHashTransactionBody),
        #[prost(message, tag = "11")]
        CryptoCreateAccount(super::CryptoCreateTransactionBody),
        #[prost(message, tag = "12")]
        CryptoDelete(super::CryptoDeleteTransactionBody),
        #[prost(message, tag = "13")]
        CryptoDeleteLiveHash(super::CryptoDeleteLiveHashTransactionBody),
        #[prost(message, tag = "14")]
        CryptoTransfer(super::CryptoTransferTransactionBody),
        #[prost(message, tag = "15")]
        CryptoUpdateAccount(super::CryptoUpdateTransactionBody),
        #[prost(message, tag = "16")]
        FileAppend(super::FileAppendTransactionBody),
        #[prost(message, tag = "17")]
        FileCreate(super::FileCreateTransactionBody),
        #[prost(message, tag = "18")]
        FileDelete(super::FileDeleteTransactionBody),
        #[prost(message, tag = "19")]
        FileUpdate(super::FileUpdateTransactionBody),
        #[prost(message, tag = "22")]
        ContractDeleteInstance(super::ContractDeleteTransactionBody),
        #[prost(message, tag = "24")]
        ConsensusCreateTopic(super::ConsensusCreateTopicTransactionBody),
        #[prost(message, tag = "25")]
        ConsensusUpdateTopic(super::ConsensusUpdateTopicTransactionBody),
        #[prost(message, tag = "26")]
        ConsensusDeleteTopic(super::ConsensusDeleteTopicTransactionBody),
        #[prost(message, tag = "27")]
        ConsensusSubmitMessage(super::ConsensusSubmitMessageTransactionBody),
    }
}

// ─── Crypto ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoCreateTransactionBody {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub initial_balance: u64,
    #[prost(bool, tag = "6")]
    pub receiver_sig_required: bool,
    #[prost(message, optional, tag = "8")]
    pub auto_renew_period: Option<Duration>,
    #[prost(string, tag = "13")]
    pub memo: String,
    #[prost(int32, tag = "14")]
    pub max_automatic_token_associations: i32,
    #[prost(bytes = "vec", tag = "18")]
    pub alias: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoUpdateTransactionBody {
    #[prost(message, optional, tag = "2")]
    pub account_id_to_update: Option<EntityNum>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub key: Option<Vec<u8>>,
    #[prost(message, optional, tag = "9")]
    pub expiration_time: Option<Timestamp>,
    #[prost(message, optional, tag = "10")]
    pub auto_renew_period: Option<Duration>,
    #[prost(bool, optional, tag = "11")]
    pub receiver_sig_required: Option<bool>,
    #[prost(string, optional, tag = "14")]
    pub memo: Option<String>,
    #[prost(int32, optional, tag = "15")]
    pub max_automatic_token_associations: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoDeleteTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub transfer_account_id: Option<EntityNum>,
    #[prost(message, optional, tag = "2")]
    pub delete_account_id: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoTransferTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub transfers: Option<TransferList>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveHash {
    #[prost(message, optional, tag = "1")]
    pub account_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "2")]
    pub hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub keys: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub duration: Option<Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoAddLiveHashTransactionBody {
    #[prost(message, optional, tag = "3")]
    pub live_hash: Option<LiveHash>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CryptoDeleteLiveHashTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub account_of_live_hash: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "2")]
    pub live_hash_to_delete: Vec<u8>,
}

// ─── Smart contracts ─────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractCreateTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub file_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "3")]
    pub admin_key: Vec<u8>,
    #[prost(int64, tag = "4")]
    pub gas: i64,
    #[prost(int64, tag = "5")]
    pub initial_balance: i64,
    #[prost(message, optional, tag = "8")]
    pub auto_renew_period: Option<Duration>,
    #[prost(bytes = "vec", tag = "9")]
    pub constructor_parameters: Vec<u8>,
    #[prost(string, tag = "13")]
    pub memo: String,
    #[prost(bytes = "vec", tag = "16")]
    pub initcode: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractUpdateTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(message, optional, tag = "2")]
    pub expiration_time: Option<Timestamp>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub admin_key: Option<Vec<u8>>,
    #[prost(message, optional, tag = "7")]
    pub auto_renew_period: Option<Duration>,
    #[prost(string, optional, tag = "9")]
    pub memo: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractDeleteTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(message, optional, tag = "2")]
    pub transfer_account_id: Option<EntityNum>,
    #[prost(message, optional, tag = "3")]
    pub transfer_contract_id: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractCallTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(int64, tag = "2")]
    pub gas: i64,
    #[prost(int64, tag = "3")]
    pub amount: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub function_parameters: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractLoginfo {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "2")]
    pub bloom: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "3")]
    pub topic: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "4")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageChange {
    #[prost(bytes = "vec", tag = "1")]
    pub slot: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value_read: Vec<u8>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub value_written: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractStateChange {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(message, repeated, tag = "2")]
    pub storage_changes: Vec<StorageChange>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContractFunctionResult {
    #[prost(message, optional, tag = "1")]
    pub contract_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "2")]
    pub contract_call_result: Vec<u8>,
    #[prost(string, tag = "3")]
    pub error_message: String,
    #[prost(bytes = "vec", tag = "4")]
    pub bloom: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub gas_used: u64,
    #[prost(message, repeated, tag = "6")]
    pub log_info: Vec<ContractLoginfo>,
    #[prost(message, repeated, tag = "7")]
    pub created_contract_ids: Vec<EntityNum>,
    #[prost(message, repeated, tag = "8")]
    pub state_changes: Vec<ContractStateChange>,
    #[prost(int64, tag = "10")]
    pub gas: i64,
    #[prost(int64, tag = "11")]
    pub amount: i64,
    #[prost(bytes = "vec", tag = "12")]
    pub function_parameters: Vec<u8>,
    #[prost(message, optional, tag = "13")]
    pub sender_id: Option<EntityNum>,
}

// ─── Files ───────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileAppendTransactionBody {
    #[prost(message, optional, tag = "2")]
    pub file_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "4")]
    pub contents: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileCreateTransactionBody {
    #[prost(message, optional, tag = "2")]
    pub expiration_time: Option<Timestamp>,
    #[prost(bytes = "vec", tag = "3")]
    pub keys: Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub contents: Vec<u8>,
    #[prost(string, tag = "8")]
    pub memo: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileDeleteTransactionBody {
    #[prost(message, optional, tag = "2")]
    pub file_id: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileUpdateTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub file_id: Option<EntityNum>,
    #[prost(message, optional, tag = "2")]
    pub expiration_time: Option<Timestamp>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub keys: Option<Vec<u8>>,
    #[prost(bytes = "vec", tag = "4")]
    pub contents: Vec<u8>,
    #[prost(string, optional, tag = "5")]
    pub memo: Option<String>,
}

// ─── Consensus topics ────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusCreateTopicTransactionBody {
    #[prost(string, tag = "1")]
    pub memo: String,
    #[prost(bytes = "vec", tag = "2")]
    pub admin_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub submit_key: Vec<u8>,
    #[prost(message, optional, tag = "6")]
    pub auto_renew_period: Option<Duration>,
    #[prost(message, optional, tag = "7")]
    pub auto_renew_account: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusUpdateTopicTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub topic_id: Option<EntityNum>,
    #[prost(string, optional, tag = "2")]
    pub memo: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub expiration_time: Option<Timestamp>,
    #[prost(bytes = "vec", optional, tag = "6")]
    pub admin_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub submit_key: Option<Vec<u8>>,
    #[prost(message, optional, tag = "8")]
    pub auto_renew_period: Option<Duration>,
    #[prost(message, optional, tag = "9")]
    pub auto_renew_account: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusDeleteTopicTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub topic_id: Option<EntityNum>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusMessageChunkInfo {
    #[prost(message, optional, tag = "1")]
    pub initial_transaction_id: Option<TransactionId>,
    #[prost(int32, tag = "2")]
    pub total: i32,
    #[prost(int32, tag = "3")]
    pub number: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConsensusSubmitMessageTransactionBody {
    #[prost(message, optional, tag = "1")]
    pub topic_id: Option<EntityNum>,
    #[prost(bytes = "vec", tag = "2")]
    pub message: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub chunk_info: Option<ConsensusMessageChunkInfo>,
}

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionReceipt {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(message, optional, tag = "2")]
    pub account_id: Option<EntityNum>,
    #[prost(message, optional, tag = "3")]
    pub file_id: Option<EntityNum>,
    #[prost(message, optional, tag = "4")]
    pub contract_id: Option<EntityNum>,
    #[prost(message, optional, tag = "6")]
    pub topic_id: Option<EntityNum>,
    #[prost(uint64, tag = "7")]
    pub topic_sequence_number: u64,
    #[prost(bytes = "vec", tag = "8")]
    pub topic_running_hash: Vec<u8>,
    #[prost(uint64, tag = "9")]
    pub topic_running_hash_version: u64,
}

/// The ledger's outcome for one transaction.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionRecord {
    #[prost(message, optional, tag = "1")]
    pub receipt: Option<TransactionReceipt>,
    #[prost(bytes = "vec", tag = "2")]
    pub transaction_hash: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub consensus_timestamp: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub transaction_id: Option<TransactionId>,
    #[prost(string, tag = "5")]
    pub memo: String,
    #[prost(uint64, tag = "6")]
    pub transaction_fee: u64,
    #[prost(oneof = "transaction_record::Body", tags = "7, 8")]
    pub body: Option<transaction_record::Body>,
    #[prost(message, optional, tag = "10")]
    pub transfer_list: Option<TransferList>,
}

pub mod transaction_record {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "7")]
        ContractCallResult(super::ContractFunctionResult),
        #[prost(message, tag = "8")]
        ContractCreateResult(super::ContractFunctionResult),
    }
}

impl TransactionRecord {
    /// The contract call or create result, whichever is present.
    pub fn contract_result(&self) -> Option<&ContractFunctionResult> {
        match &self.body {
            Some(transaction_record::Body::ContractCallResult(r))
            | Some(transaction_record::Body::ContractCreateResult(r)) => Some(r),
            None => None,
        }
    }

    pub fn status(&self) -> i32 {
        self.receipt.as_ref().map(|r| r.status).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn timestamp_nanos_roundtrip() {
        let ts = Timestamp {
            seconds: 1_700_000_000,
            nanos: 123,
        };
        let nanos = ts.to_nanos().unwrap();
        assert_eq!(nanos, 1_700_000_000_000_000_123);
        assert_eq!(Timestamp::from_nanos(nanos), ts);
    }

    #[test]
    fn timestamp_rejects_overflow() {
        let ts = Timestamp {
            seconds: i64::MAX,
            nanos: 0,
        };
        assert!(ts.to_nanos().is_none());
        assert!(Timestamp { seconds: 1, nanos: -1 }.to_nanos().is_none());
    }

    #[test]
    fn unknown_body_fields_are_skipped() {
        let body = TransactionBody {
            memo: "hello".into(),
            ..Default::default()
        };
        let mut bytes = body.encode_to_vec();
        // field 42, length-delimited, 2 bytes: not declared above
        bytes.extend_from_slice(&[0xd2, 0x02, 0x02, 0xaa, 0xbb]);
        let decoded = TransactionBody::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded.memo, "hello");
        assert!(decoded.data.is_none());
    }

    #[test]
    fn success_statuses() {
        assert!(status::is_success(status::SUCCESS));
        assert!(status::is_success(status::FEE_SCHEDULE_FILE_PART_UPLOADED));
        assert!(!status::is_success(status::INSUFFICIENT_PAYER_BALANCE));
        assert!(!status::is_success(0));
    }
}
