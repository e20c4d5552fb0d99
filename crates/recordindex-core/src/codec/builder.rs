//! Record file encoder, the inverse of [`decode`](super::decode).
//!
//! Used by the test suites and the CLI's fixture tooling to produce
//! well-formed (or deliberately broken) files.

use prost::Message;

use super::v2::{chain_hash_v2, MARKER_HASH, MARKER_PREV_HASH, MARKER_RECORD, MARKER_SIGNATURE};
use super::v5::{
    fold, DIGEST_TYPE_SHA384, HASH_CLASS_ID, HASH_CLASS_VERSION, OBJECT_STREAM_VERSION,
    RECORD_STREAM_OBJECT_CLASS_ID, RECORD_STREAM_OBJECT_CLASS_VERSION,
};
use super::{sha384, HASH_SIZE};
use crate::entity::EntityId;
use crate::error::DecodeError;
use crate::proto::{
    self, status, transaction_body::Data, transaction_record, AccountAmount,
    ContractFunctionResult, TransactionBody, TransactionId, TransactionReceipt, TransactionRecord,
    TransferList,
};
use crate::types::HapiVersion;

// ─── RecordFileBuilder ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordFileBuilder {
    version: i32,
    hapi_version: HapiVersion,
    previous_hash: Vec<u8>,
    declared_hash: Option<Vec<u8>>,
    items: Vec<(Vec<u8>, Vec<u8>)>,
    signature: Option<Vec<u8>>,
}

impl RecordFileBuilder {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            hapi_version: HapiVersion::default(),
            previous_hash: vec![0u8; HASH_SIZE],
            declared_hash: None,
            items: Vec::new(),
            signature: None,
        }
    }

    pub fn hapi_version(mut self, hapi_version: HapiVersion) -> Self {
        self.hapi_version = hapi_version;
        self
    }

    pub fn previous_hash(mut self, hash: &[u8]) -> Self {
        self.previous_hash = hash.to_vec();
        self
    }

    /// Chain onto a file whose hash is known in hex form.
    pub fn previous_hash_hex(self, hash: &str) -> Result<Self, DecodeError> {
        let bytes = hex::decode(hash)
            .map_err(|e| DecodeError::malformed(format!("previous hash: {e}")))?;
        Ok(self.previous_hash(&bytes))
    }

    /// Overrides the declared self-hash instead of computing it.
    pub fn declared_hash(mut self, hash: &[u8]) -> Self {
        self.declared_hash = Some(hash.to_vec());
        self
    }

    pub fn item(self, item: ItemBuilder) -> Self {
        let (tx, record) = item.build();
        self.item_parts(&tx, &record)
    }

    pub fn item_parts(self, tx: &proto::Transaction, record: &TransactionRecord) -> Self {
        self.raw_item(tx.encode_to_vec(), record.encode_to_vec())
    }

    /// Appends already-serialized transaction and record bytes verbatim.
    pub fn raw_item(mut self, tx: impl Into<Vec<u8>>, record: impl Into<Vec<u8>>) -> Self {
        self.items.push((tx.into(), record.into()));
        self
    }

    /// Trailing signature block (versions 1 and 2 only).
    pub fn signature(mut self, signature: impl Into<Vec<u8>>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn build(&self) -> Result<Vec<u8>, DecodeError> {
        self.check_hash_len(&self.previous_hash)?;
        if let Some(declared) = &self.declared_hash {
            self.check_hash_len(declared)?;
        }
        match self.version {
            1 | 2 => Ok(self.build_v2()),
            5 => Ok(self.build_v5()),
            version => Err(DecodeError::UnsupportedVersion { version }),
        }
    }

    fn check_hash_len(&self, hash: &[u8]) -> Result<(), DecodeError> {
        if hash.len() != HASH_SIZE {
            return Err(DecodeError::malformed(format!(
                "hash must be {HASH_SIZE} bytes, got {}",
                hash.len()
            )));
        }
        Ok(())
    }

    fn build_v2(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.hapi_version.major.to_be_bytes());
        out.push(MARKER_PREV_HASH);
        out.extend_from_slice(&self.previous_hash);
        let header_end = out.len();

        for (tx, record) in &self.items {
            out.push(MARKER_RECORD);
            put_len_prefixed(&mut out, tx);
            put_len_prefixed(&mut out, record);
        }

        let computed = if self.version == 1 {
            sha384(&out)
        } else {
            chain_hash_v2(&out[..header_end], &out[header_end..])
        };
        out.push(MARKER_HASH);
        out.extend_from_slice(self.declared_hash.as_deref().unwrap_or(&computed[..]));

        if let Some(signature) = &self.signature {
            out.push(MARKER_SIGNATURE);
            put_len_prefixed(&mut out, signature);
        }
        out
    }

    fn build_v5(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.hapi_version.major.to_be_bytes());
        out.extend_from_slice(&self.hapi_version.minor.to_be_bytes());
        out.extend_from_slice(&self.hapi_version.patch.to_be_bytes());
        out.extend_from_slice(&OBJECT_STREAM_VERSION.to_be_bytes());
        put_hash_object(&mut out, &self.previous_hash);

        let mut running = [0u8; HASH_SIZE];
        running.copy_from_slice(&self.previous_hash);
        for (tx, record) in &self.items {
            let start = out.len();
            out.extend_from_slice(&RECORD_STREAM_OBJECT_CLASS_ID.to_be_bytes());
            out.extend_from_slice(&RECORD_STREAM_OBJECT_CLASS_VERSION.to_be_bytes());
            put_len_prefixed(&mut out, record);
            put_len_prefixed(&mut out, tx);
            running = fold(&running, &out[start..]);
        }

        put_hash_object(&mut out, self.declared_hash.as_deref().unwrap_or(&running[..]));
        out
    }
}

fn put_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    // saturates; a 2 GiB item cannot be framed anyway
    let len = i32::try_from(bytes.len()).unwrap_or(i32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
}

fn put_hash_object(out: &mut Vec<u8>, digest: &[u8]) {
    out.extend_from_slice(&HASH_CLASS_ID.to_be_bytes());
    out.extend_from_slice(&HASH_CLASS_VERSION.to_be_bytes());
    out.extend_from_slice(&DIGEST_TYPE_SHA384.to_be_bytes());
    out.extend_from_slice(&(HASH_SIZE as i32).to_be_bytes());
    out.extend_from_slice(digest);
}

// ─── ItemBuilder ─────────────────────────────────────────────────────────────

/// Builds a transaction and its record with sensible defaults:
/// node `0.0.3`, status `SUCCESS`, no transfers.
#[derive(Debug, Clone)]
pub struct ItemBuilder {
    payer: EntityId,
    consensus_ns: i64,
    node: proto::EntityNum,
    max_fee: u64,
    charged_fee: u64,
    memo: String,
    data: Option<Data>,
    receipt: TransactionReceipt,
    transfers: Vec<AccountAmount>,
    result: Option<transaction_record::Body>,
}

impl ItemBuilder {
    pub fn new(payer: EntityId, consensus_ns: i64) -> Self {
        Self {
            payer,
            consensus_ns,
            node: proto::EntityNum {
                shard: 0,
                realm: 0,
                num: 3,
            },
            max_fee: 100_000_000,
            charged_fee: 83_417,
            memo: String::new(),
            data: None,
            receipt: TransactionReceipt {
                status: status::SUCCESS,
                ..Default::default()
            },
            transfers: Vec::new(),
            result: None,
        }
    }

    pub fn data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn status(mut self, status: i32) -> Self {
        self.receipt.status = status;
        self
    }

    pub fn receipt(mut self, edit: impl FnOnce(&mut TransactionReceipt)) -> Self {
        edit(&mut self.receipt);
        self
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn charged_fee(mut self, fee: u64) -> Self {
        self.charged_fee = fee;
        self
    }

    /// Adds an entry to the record's transfer list.
    pub fn transfer(mut self, account: EntityId, amount: i64) -> Self {
        self.transfers.push(AccountAmount {
            account_id: Some(account.to_proto()),
            amount,
            is_approval: false,
        });
        self
    }

    pub fn call_result(mut self, result: ContractFunctionResult) -> Self {
        self.result = Some(transaction_record::Body::ContractCallResult(result));
        self
    }

    pub fn create_result(mut self, result: ContractFunctionResult) -> Self {
        self.result = Some(transaction_record::Body::ContractCreateResult(result));
        self
    }

    pub fn build(self) -> (proto::Transaction, TransactionRecord) {
        let transaction_id = TransactionId {
            transaction_valid_start: Some(proto::Timestamp::from_nanos(
                self.consensus_ns.saturating_sub(1).max(0),
            )),
            account_id: Some(self.payer.to_proto()),
            scheduled: false,
            nonce: 0,
        };
        let body = TransactionBody {
            transaction_id: Some(transaction_id.clone()),
            node_account_id: Some(self.node),
            transaction_fee: self.max_fee,
            transaction_valid_duration: Some(proto::Duration { seconds: 120 }),
            memo: self.memo.clone(),
            data: self.data,
        };
        let tx = proto::Transaction {
            body_bytes: body.encode_to_vec(),
            sig_map: Vec::new(),
        };
        let record = TransactionRecord {
            receipt: Some(self.receipt),
            transaction_hash: sha384(&tx.encode_to_vec()).to_vec(),
            consensus_timestamp: Some(proto::Timestamp::from_nanos(self.consensus_ns)),
            transaction_id: Some(transaction_id),
            memo: self.memo,
            transaction_fee: self.charged_fee,
            body: self.result,
            transfer_list: (!self.transfers.is_empty()).then(|| TransferList {
                account_amounts: self.transfers,
            }),
        };
        (tx, record)
    }
}
