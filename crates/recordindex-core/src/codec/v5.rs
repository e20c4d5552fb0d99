//! Record file version 5: a self-describing object stream bracketed by
//! running-hash objects.

use super::reader::Reader;
use super::{assemble, parse_item, sha384, Frame, HASH_SIZE};
use crate::error::DecodeError;
use crate::stream::{StreamFile, StreamFileData};
use crate::types::HapiVersion;

pub const OBJECT_STREAM_VERSION: i32 = 1;
pub const HASH_CLASS_ID: i64 = 0xf422_da83_a251_741e_u64 as i64;
pub const HASH_CLASS_VERSION: i32 = 1;
pub const DIGEST_TYPE_SHA384: i32 = 0x58ff_811b;
pub const RECORD_STREAM_OBJECT_CLASS_ID: i64 = 0xe370_929b_a542_9d8b_u64 as i64;
pub const RECORD_STREAM_OBJECT_CLASS_VERSION: i32 = 1;

/// Serialized size of a hash object.
pub(crate) const HASH_OBJECT_SIZE: usize = 8 + 4 + 4 + 4 + HASH_SIZE;

pub(crate) fn decode(data: &StreamFileData) -> Result<StreamFile, DecodeError> {
    let bytes = &data.bytes;
    let mut r = Reader::new(bytes);

    let version = r.read_i32()?;
    let hapi_version = HapiVersion::new(r.read_i32()?, r.read_i32()?, r.read_i32()?);
    let stream_version = r.read_i32()?;
    if stream_version != OBJECT_STREAM_VERSION {
        return Err(DecodeError::malformed(format!(
            "unsupported object stream version {stream_version}"
        )));
    }
    let header_end = r.position();

    let start_at = r.position();
    let start_hash = read_hash_object(&mut r)?;
    let start_object = &bytes[start_at..r.position()];

    let mut running = to_array(&start_hash);
    let mut items = Vec::new();
    let (end_hash, end_object) = loop {
        let at = r.position();
        let class_id = r.read_i64()?;
        match class_id {
            RECORD_STREAM_OBJECT_CLASS_ID => {
                expect_class_version(&mut r, RECORD_STREAM_OBJECT_CLASS_VERSION, at)?;
                let record = r.read_len_prefixed("record")?;
                let tx = r.read_len_prefixed("transaction")?;
                running = fold(&running, &bytes[at..r.position()]);
                items.push(parse_item(items.len(), tx, record)?);
            }
            HASH_CLASS_ID => {
                let digest = read_hash_body(&mut r, at)?;
                break (digest, &bytes[at..r.position()]);
            }
            other => {
                return Err(DecodeError::malformed(format!(
                    "unknown class id {other:#018x} at offset {at}"
                )))
            }
        }
    };

    if !r.is_empty() {
        return Err(DecodeError::malformed(format!(
            "{} trailing bytes after end running hash",
            r.remaining()
        )));
    }

    let mut metadata = Vec::with_capacity(header_end + HASH_OBJECT_SIZE * 2);
    metadata.extend_from_slice(&bytes[..header_end]);
    metadata.extend_from_slice(start_object);
    metadata.extend_from_slice(end_object);

    assemble(
        data,
        Frame {
            version,
            hapi_version,
            previous_hash: start_hash,
            declared_hash: end_hash,
            computed_hash: running,
            metadata_hash: Some(sha384(&metadata)),
            items,
        },
    )
}

/// `SHA384(running ‖ SHA384(object))`.
pub(crate) fn fold(running: &[u8; HASH_SIZE], object: &[u8]) -> [u8; HASH_SIZE] {
    let mut buf = Vec::with_capacity(HASH_SIZE * 2);
    buf.extend_from_slice(running);
    buf.extend_from_slice(&sha384(object));
    sha384(&buf)
}

fn to_array(hash: &[u8]) -> [u8; HASH_SIZE] {
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(hash);
    out
}

fn read_hash_object(r: &mut Reader<'_>) -> Result<bytes::Bytes, DecodeError> {
    let at = r.position();
    let class_id = r.read_i64()?;
    if class_id != HASH_CLASS_ID {
        return Err(DecodeError::malformed(format!(
            "expected hash object at offset {at}, found class id {class_id:#018x}"
        )));
    }
    read_hash_body(r, at)
}

fn read_hash_body(r: &mut Reader<'_>, at: usize) -> Result<bytes::Bytes, DecodeError> {
    expect_class_version(r, HASH_CLASS_VERSION, at)?;
    let digest_type = r.read_i32()?;
    if digest_type != DIGEST_TYPE_SHA384 {
        return Err(DecodeError::malformed(format!(
            "unsupported digest type {digest_type:#x} at offset {at}"
        )));
    }
    let len = r.read_i32()?;
    if usize::try_from(len).ok() != Some(HASH_SIZE) {
        return Err(DecodeError::malformed(format!(
            "hash length {len} at offset {at}, expected {HASH_SIZE}"
        )));
    }
    r.take(HASH_SIZE)
}

fn expect_class_version(r: &mut Reader<'_>, expected: i32, at: usize) -> Result<(), DecodeError> {
    let found = r.read_i32()?;
    if found != expected {
        return Err(DecodeError::malformed(format!(
            "class version {found} at offset {at}, expected {expected}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode as decode_any, ItemBuilder, RecordFileBuilder};
    use crate::entity::EntityId;
    use crate::stream::StreamFileData;

    fn file(previous: [u8; HASH_SIZE], timestamps: &[i64]) -> Vec<u8> {
        let payer = EntityId::of_num(2).unwrap();
        let mut builder = RecordFileBuilder::new(5)
            .hapi_version(HapiVersion::new(0, 11, 0))
            .previous_hash(&previous);
        for ts in timestamps {
            builder = builder.item(ItemBuilder::new(payer, *ts));
        }
        builder.build().unwrap()
    }

    #[test]
    fn header_and_hashes() {
        let bytes = file([1u8; HASH_SIZE], &[10, 20]);
        let decoded = decode_any(&StreamFileData::new("b.rcd", bytes)).unwrap();
        assert_eq!(decoded.hapi_version, HapiVersion::new(0, 11, 0));
        assert_eq!(decoded.previous_hash, hex::encode([1u8; HASH_SIZE]));
        assert_eq!(decoded.hash, decoded.computed_hash);
        assert_ne!(decoded.hash, decoded.previous_hash);
    }

    #[test]
    fn metadata_hash_tracks_end_hash() {
        let a = decode_any(&StreamFileData::new("a", file([0u8; HASH_SIZE], &[10]))).unwrap();
        let b = decode_any(&StreamFileData::new("b", file([0u8; HASH_SIZE], &[11]))).unwrap();
        // different items produce different end hashes, hence different metadata
        assert_ne!(a.metadata_hash, b.metadata_hash);
        assert_ne!(a.file_hash, b.file_hash);
    }

    #[test]
    fn tampered_end_hash_is_detected() {
        let mut bytes = file([0u8; HASH_SIZE], &[10]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let decoded = decode_any(&StreamFileData::new("c.rcd", bytes)).unwrap();
        assert_ne!(decoded.hash, decoded.computed_hash);
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = file([0u8; HASH_SIZE], &[10]);
        bytes.extend_from_slice(&[0, 0]);
        let err = decode_any(&StreamFileData::new("d.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn wrong_digest_type_is_malformed() {
        let mut bytes = file([0u8; HASH_SIZE], &[10]);
        // start hash object follows the 20-byte header; digest type after class id + version
        let at = 20 + 8 + 4;
        bytes[at..at + 4].copy_from_slice(&0i32.to_be_bytes());
        let err = decode_any(&StreamFileData::new("e.rcd", bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn fold_is_order_sensitive() {
        let start = [0u8; HASH_SIZE];
        let ab = fold(&fold(&start, b"a"), b"b");
        let ba = fold(&fold(&start, b"b"), b"a");
        assert_ne!(ab, ba);
    }
}
