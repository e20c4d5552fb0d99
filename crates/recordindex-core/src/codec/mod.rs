//! Record file decoding.
//!
//! Every layout is a plain function `&StreamFileData -> Result<StreamFile>`
//! registered in a version table; [`decode`] reads the leading version tag
//! and dispatches.
//!
//! ```text
//! version 1, 2   header | 0x02 items ... | 0x03 declared hash [| 0x04 signature]
//! version 5      header | start hash object | record objects ... | end hash object
//! ```

mod builder;
mod reader;
mod v2;
mod v5;

use bytes::{Buf, Bytes};
use prost::Message;
use sha2::{Digest, Sha384};

use crate::error::DecodeError;
use crate::proto::{self, TransactionBody, TransactionRecord};
use crate::stream::{RecordItem, StreamFile, StreamFileData};
use crate::types::{HapiVersion, TransactionType};

pub use builder::{ItemBuilder, RecordFileBuilder};
pub use v5::{
    DIGEST_TYPE_SHA384, HASH_CLASS_ID, HASH_CLASS_VERSION, OBJECT_STREAM_VERSION,
    RECORD_STREAM_OBJECT_CLASS_ID, RECORD_STREAM_OBJECT_CLASS_VERSION,
};

/// Digest length in bytes (SHA-384).
pub const HASH_SIZE: usize = 48;

type DecodeFn = fn(&StreamFileData) -> Result<StreamFile, DecodeError>;

struct VersionCodec {
    version: i32,
    decode: DecodeFn,
}

const CODECS: &[VersionCodec] = &[
    VersionCodec {
        version: 1,
        decode: v2::decode_v1,
    },
    VersionCodec {
        version: 2,
        decode: v2::decode_v2,
    },
    VersionCodec {
        version: 5,
        decode: v5::decode,
    },
];

/// Record file versions this crate can decode.
pub fn supported_versions() -> Vec<i32> {
    CODECS.iter().map(|c| c.version).collect()
}

/// Decode a raw record file. Pure: no I/O, no shared state.
pub fn decode(data: &StreamFileData) -> Result<StreamFile, DecodeError> {
    let mut r = reader::Reader::new(&data.bytes);
    let version = r.read_i32()?;
    let codec = CODECS
        .iter()
        .find(|c| c.version == version)
        .ok_or(DecodeError::UnsupportedVersion { version })?;
    (codec.decode)(data)
}

// ─── Shared helpers ──────────────────────────────────────────────────────────

pub(crate) fn sha384(data: &[u8]) -> [u8; HASH_SIZE] {
    Sha384::digest(data).into()
}

/// Parse one transaction/record pair, keeping the raw bytes alongside.
pub(crate) fn parse_item(
    index: usize,
    transaction_bytes: Bytes,
    record_bytes: Bytes,
) -> Result<RecordItem, DecodeError> {
    let transaction = proto::Transaction::decode(transaction_bytes.as_ref())?;
    let body = TransactionBody::decode(transaction.body_bytes.as_slice())?;
    let record = TransactionRecord::decode(record_bytes.as_ref())?;

    let consensus_timestamp = record
        .consensus_timestamp
        .as_ref()
        .and_then(proto::Timestamp::to_nanos)
        .ok_or_else(|| {
            DecodeError::malformed(format!("item {index}: missing or invalid consensus timestamp"))
        })?;

    let transaction_type = match &body.data {
        Some(data) => TransactionType::from_data(data),
        None => TransactionType::Unknown(undeclared_payload_tag(&transaction.body_bytes)),
    };

    Ok(RecordItem {
        index,
        consensus_timestamp,
        transaction_type,
        transaction,
        body,
        record,
        transaction_bytes,
        record_bytes,
    })
}

/// First body field past the common header; `-1` if there is none.
fn undeclared_payload_tag(body_bytes: &[u8]) -> i32 {
    let mut buf = body_bytes;
    while buf.has_remaining() {
        let Ok((tag, wire_type)) = prost::encoding::decode_key(&mut buf) else {
            break;
        };
        if tag >= 7 {
            return i32::try_from(tag).unwrap_or(-1);
        }
        if prost::encoding::skip_field(wire_type, tag, &mut buf, Default::default()).is_err() {
            break;
        }
    }
    -1
}

/// Single parsed item, bypassing file framing.
#[cfg(test)]
pub(crate) fn item_from(index: usize, builder: ItemBuilder) -> RecordItem {
    let (tx, record) = builder.build();
    parse_item(index, tx.encode_to_vec().into(), record.encode_to_vec().into())
        .expect("builder output parses")
}

/// Layout-independent parts of a decoded file.
pub(crate) struct Frame {
    pub version: i32,
    pub hapi_version: HapiVersion,
    pub previous_hash: Bytes,
    pub declared_hash: Bytes,
    pub computed_hash: [u8; HASH_SIZE],
    pub metadata_hash: Option<[u8; HASH_SIZE]>,
    pub items: Vec<RecordItem>,
}

/// Validate item ordering and build the final [`StreamFile`].
pub(crate) fn assemble(data: &StreamFileData, frame: Frame) -> Result<StreamFile, DecodeError> {
    let (Some(first), Some(last)) = (frame.items.first(), frame.items.last()) else {
        return Err(DecodeError::malformed("record file contains no items"));
    };
    let (consensus_start, consensus_end) = (first.consensus_timestamp, last.consensus_timestamp);

    for pair in frame.items.windows(2) {
        if pair[1].consensus_timestamp <= pair[0].consensus_timestamp {
            return Err(DecodeError::malformed(format!(
                "consensus timestamp {} of item {} does not follow {}",
                pair[1].consensus_timestamp, pair[1].index, pair[0].consensus_timestamp
            )));
        }
    }

    Ok(StreamFile {
        name: data.name.clone(),
        version: frame.version,
        hapi_version: frame.hapi_version,
        consensus_start,
        consensus_end,
        previous_hash: hex::encode(&frame.previous_hash),
        hash: hex::encode(&frame.declared_hash),
        computed_hash: hex::encode(frame.computed_hash),
        file_hash: hex::encode(sha384(&data.bytes)),
        metadata_hash: frame.metadata_hash.map(hex::encode),
        node: data.node,
        size: data.bytes.len(),
        items: frame.items,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::proto::transaction_body::Data;

    fn account(num: i64) -> EntityId {
        EntityId::of_num(num).unwrap()
    }

    fn transfer_item(ts: i64) -> ItemBuilder {
        ItemBuilder::new(account(1001), ts)
            .data(Data::CryptoTransfer(Default::default()))
            .transfer(account(1001), -10)
            .transfer(account(3), 10)
    }

    fn build(version: i32, items: &[i64]) -> Vec<u8> {
        let mut builder = RecordFileBuilder::new(version);
        for ts in items {
            builder = builder.item(transfer_item(*ts));
        }
        builder.build().unwrap()
    }

    #[test]
    fn decodes_every_supported_version() {
        for version in supported_versions() {
            let bytes = build(version, &[1_000, 2_000, 3_000]);
            let file = decode(&StreamFileData::new("f.rcd", bytes)).unwrap();
            assert_eq!(file.version, version);
            assert_eq!(file.count(), 3);
            assert_eq!(file.consensus_start, 1_000);
            assert_eq!(file.consensus_end, 3_000);
            assert_eq!(file.hash, file.computed_hash, "version {version}");
            assert_eq!(file.items[1].transaction_type, TransactionType::CryptoTransfer);
            assert_eq!(file.metadata_hash.is_some(), version >= 5);
        }
    }

    #[test]
    fn unsupported_version() {
        let mut bytes = build(2, &[1_000]);
        bytes[..4].copy_from_slice(&7i32.to_be_bytes());
        let err = decode(&StreamFileData::new("f.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedVersion { version: 7 }));
    }

    #[test]
    fn truncated_inputs() {
        for version in supported_versions() {
            let bytes = build(version, &[1_000, 2_000]);
            for cut in [2, 10, bytes.len() / 2, bytes.len() - 1] {
                let err = decode(&StreamFileData::new("f.rcd", bytes[..cut].to_vec())).unwrap_err();
                assert!(
                    matches!(err, DecodeError::Truncated { .. } | DecodeError::Malformed { .. }),
                    "version {version} cut {cut}: {err:?}"
                );
            }
        }
        let err = decode(&StreamFileData::new("f.rcd", vec![0, 0])).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn items_keep_exact_bytes() {
        let (tx, record) = transfer_item(5_000).build();
        let tx_bytes = tx.encode_to_vec();
        let mut record_bytes = record.encode_to_vec();
        // undeclared field 99 (varint) must survive untouched
        record_bytes.extend_from_slice(&[0x98, 0x06, 0x01]);

        for version in supported_versions() {
            let bytes = RecordFileBuilder::new(version)
                .raw_item(tx_bytes.clone(), record_bytes.clone())
                .build()
                .unwrap();
            let file = decode(&StreamFileData::new("f.rcd", bytes)).unwrap();
            assert_eq!(file.items[0].transaction_bytes.as_ref(), tx_bytes.as_slice());
            assert_eq!(file.items[0].record_bytes.as_ref(), record_bytes.as_slice());
            assert_eq!(file.items[0].consensus_timestamp, 5_000);
        }
    }

    #[test]
    fn unknown_payload_keeps_its_code() {
        let (mut tx, record) = ItemBuilder::new(account(1001), 1_000).build();
        // field 42, length-delimited, empty payload
        tx.body_bytes.extend_from_slice(&[0xd2, 0x02, 0x00]);
        let bytes = RecordFileBuilder::new(5).item_parts(&tx, &record).build().unwrap();
        let file = decode(&StreamFileData::new("f.rcd", bytes)).unwrap();
        assert_eq!(file.items[0].transaction_type, TransactionType::Unknown(42));
    }

    #[test]
    fn rejects_non_increasing_timestamps() {
        let bytes = build(2, &[2_000, 2_000]);
        let err = decode(&StreamFileData::new("f.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn rejects_empty_file() {
        let bytes = RecordFileBuilder::new(5).build().unwrap();
        let err = decode(&StreamFileData::new("f.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn garbage_protobuf_is_malformed() {
        let bytes = RecordFileBuilder::new(2)
            .raw_item(vec![0xff, 0xff, 0xff], vec![0x0a])
            .build()
            .unwrap();
        let err = decode(&StreamFileData::new("f.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn file_hash_covers_all_bytes() {
        let bytes = build(5, &[1_000]);
        let file = decode(&StreamFileData::new("f.rcd", bytes.clone())).unwrap();
        assert_eq!(file.file_hash, hex::encode(sha384(&bytes)));
        assert_eq!(file.size, bytes.len());
    }
}
