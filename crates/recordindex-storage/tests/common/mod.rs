//! Record file fixtures shared by the ingestion tests.

#![allow(dead_code)]

use recordindex_core::codec::{decode, ItemBuilder, RecordFileBuilder};
use recordindex_core::entity::EntityId;
use recordindex_core::proto::transaction_body::Data;
use recordindex_core::proto::{CryptoCreateTransactionBody, CryptoTransferTransactionBody};
use recordindex_core::{IngestConfig, RetryConfig, StreamFileData};

pub const PAYER: i64 = 2;
pub const NODE: i64 = 3;
pub const FEE_COLLECTOR: i64 = 98;

/// Nanoseconds between consecutive files.
pub const FILE_SPAN: i64 = 1_000;

pub fn id(num: i64) -> EntityId {
    EntityId::of_num(num).unwrap()
}

pub fn name(i: i64) -> String {
    format!("2024-01-01T00_00_{i:02}.000000000Z.rcd")
}

/// Account created by file `i`.
pub fn created_account(i: i64) -> EntityId {
    id(1_000 + i)
}

/// Consensus timestamp of the transfer item in file `i`.
pub fn transfer_ts(i: i64) -> i64 {
    (i + 1) * FILE_SPAN + 1
}

/// File `i`: an account creation followed by a fee-paying transfer to it.
pub fn file(i: i64, previous_hash: Option<&str>) -> (StreamFileData, String) {
    let start = (i + 1) * FILE_SPAN;
    let account = created_account(i);

    let create = ItemBuilder::new(id(PAYER), start)
        .data(Data::CryptoCreateAccount(CryptoCreateTransactionBody {
            key: vec![0xaa, i as u8],
            initial_balance: 500,
            memo: format!("account {i}"),
            ..Default::default()
        }))
        .receipt(|r| r.account_id = Some(account.to_proto()))
        .transfer(id(PAYER), -510)
        .transfer(account, 500)
        .transfer(id(NODE), 2)
        .transfer(id(FEE_COLLECTOR), 8);

    let transfer = ItemBuilder::new(id(PAYER), start + 1)
        .data(Data::CryptoTransfer(CryptoTransferTransactionBody::default()))
        .transfer(id(PAYER), -110)
        .transfer(account, 100)
        .transfer(id(NODE), 2)
        .transfer(id(FEE_COLLECTOR), 8);

    let mut builder = RecordFileBuilder::new(5);
    if let Some(previous) = previous_hash {
        builder = builder.previous_hash_hex(previous).unwrap();
    }
    let bytes = builder.item(create).item(transfer).build().unwrap();
    let data = StreamFileData::new(name(i), bytes).with_node(id(NODE));
    let hash = decode(&data).unwrap().hash;
    (data, hash)
}

/// `n` files, each linked to the one before.
pub fn chain(n: i64) -> Vec<StreamFileData> {
    let mut files = Vec::new();
    let mut previous: Option<String> = None;
    for i in 0..n {
        let (data, hash) = file(i, previous.as_deref());
        files.push(data);
        previous = Some(hash);
    }
    files
}

/// Config with millisecond backoff.
pub fn fast_retry(max_retries: u32) -> IngestConfig {
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
