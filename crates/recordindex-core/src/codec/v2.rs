//! Record file versions 1 and 2: marker-delimited items with a trailing hash.

use bytes::Bytes;

use super::reader::Reader;
use super::{assemble, parse_item, sha384, Frame, HASH_SIZE};
use crate::error::DecodeError;
use crate::stream::{StreamFile, StreamFileData};
use crate::types::HapiVersion;

pub(crate) const MARKER_PREV_HASH: u8 = 0x01;
pub(crate) const MARKER_RECORD: u8 = 0x02;
pub(crate) const MARKER_HASH: u8 = 0x03;
pub(crate) const MARKER_SIGNATURE: u8 = 0x04;

pub(crate) fn decode_v1(data: &StreamFileData) -> Result<StreamFile, DecodeError> {
    decode_with(data, |content, _, _| sha384(content))
}

pub(crate) fn decode_v2(data: &StreamFileData) -> Result<StreamFile, DecodeError> {
    decode_with(data, |_, header, items| chain_hash_v2(header, items))
}

/// `SHA384(SHA384(header) ‖ SHA384(items))`.
pub(crate) fn chain_hash_v2(header: &[u8], items: &[u8]) -> [u8; HASH_SIZE] {
    let mut buf = Vec::with_capacity(HASH_SIZE * 2);
    buf.extend_from_slice(&sha384(header));
    buf.extend_from_slice(&sha384(items));
    sha384(&buf)
}

/// Shared layout; `hash` receives (content, header, items) slices.
fn decode_with(
    data: &StreamFileData,
    hash: impl Fn(&[u8], &[u8], &[u8]) -> [u8; HASH_SIZE],
) -> Result<StreamFile, DecodeError> {
    let bytes = &data.bytes;
    let mut r = Reader::new(bytes);

    let version = r.read_i32()?;
    let hapi_major = r.read_i32()?;
    expect_marker(&mut r, MARKER_PREV_HASH)?;
    let previous_hash = r.take(HASH_SIZE)?;
    let header_end = r.position();

    let mut items = Vec::new();
    let content_end = loop {
        let at = r.position();
        match r.read_u8()? {
            MARKER_RECORD => {
                let tx = r.read_len_prefixed("transaction")?;
                let record = r.read_len_prefixed("record")?;
                items.push(parse_item(items.len(), tx, record)?);
            }
            MARKER_HASH => break at,
            other => {
                return Err(DecodeError::malformed(format!(
                    "unexpected marker {other:#04x} at offset {at}"
                )))
            }
        }
    };

    let declared_hash = r.take(HASH_SIZE)?;
    read_signature(&mut r)?;
    if !r.is_empty() {
        return Err(DecodeError::malformed(format!(
            "{} trailing bytes after signature",
            r.remaining()
        )));
    }

    let computed_hash = hash(
        &bytes[..content_end],
        &bytes[..header_end],
        &bytes[header_end..content_end],
    );

    assemble(
        data,
        Frame {
            version,
            hapi_version: HapiVersion::new(hapi_major, 0, 0),
            previous_hash,
            declared_hash,
            computed_hash,
            metadata_hash: None,
            items,
        },
    )
}

fn expect_marker(r: &mut Reader<'_>, marker: u8) -> Result<(), DecodeError> {
    let at = r.position();
    let found = r.read_u8()?;
    if found != marker {
        return Err(DecodeError::malformed(format!(
            "expected marker {marker:#04x} at offset {at}, found {found:#04x}"
        )));
    }
    Ok(())
}

/// Optional trailing signature block. Verifying it belongs to the signature
/// pipeline, so the bytes are only skipped.
fn read_signature(r: &mut Reader<'_>) -> Result<Option<Bytes>, DecodeError> {
    if r.is_empty() {
        return Ok(None);
    }
    expect_marker(r, MARKER_SIGNATURE)?;
    r.read_len_prefixed("signature").map(Some)
}
