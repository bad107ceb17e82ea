//! Index map files (`*_idmap.map`, `*_indexmap.map`, `spec.md` §4.B): a flat
//! concatenation of `(u32, u32)` records, with no header — size is inferred
//! from file length. An id→offset map is terminated by a sentinel record
//! `(UINT32_MAX, num_descriptors)`; an offset→id map is terminated by
//! `(num_descriptors, 0)`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::FormatError;

const RECORD_LEN: usize = 8;

/// One `(key, value)` record.
pub type Record = (u32, u32);

/// Encode an id→offset map: `entries` followed by the sentinel
/// `(u32::MAX, num_descriptors)`.
pub fn encode_id_to_offset(entries: &[Record], num_descriptors: u32) -> Vec<u8> {
    encode_with_sentinel(entries, (u32::MAX, num_descriptors))
}

/// Encode an offset→id map: `entries` followed by the sentinel
/// `(num_descriptors, 0)`.
pub fn encode_offset_to_id(entries: &[Record], num_descriptors: u32) -> Vec<u8> {
    encode_with_sentinel(entries, (num_descriptors, 0))
}

fn encode_with_sentinel(entries: &[Record], sentinel: Record) -> Vec<u8> {
    let mut out = Vec::with_capacity((entries.len() + 1) * RECORD_LEN);
    for &(a, b) in entries.iter().chain(std::iter::once(&sentinel)) {
        out.write_u32::<LittleEndian>(a).unwrap();
        out.write_u32::<LittleEndian>(b).unwrap();
    }
    out
}

/// Decode the raw records of a map file, including its trailing sentinel.
/// A file whose length is not a multiple of 8 bytes is corrupt
/// (`spec.md` §4.B / §8 "Corrupt cache file").
pub fn decode_records(bytes: &[u8], path: &std::path::Path) -> Result<Vec<Record>, FormatError> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("length {} is not a multiple of {RECORD_LEN}", bytes.len()),
        });
    }
    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::with_capacity(bytes.len() / RECORD_LEN);
    while (cursor.position() as usize) < bytes.len() {
        let a = cursor.read_u32::<LittleEndian>().unwrap();
        let b = cursor.read_u32::<LittleEndian>().unwrap();
        records.push((a, b));
    }
    Ok(records)
}

/// Decode an id→offset map, stripping and validating its sentinel.
pub fn decode_id_to_offset(
    bytes: &[u8],
    path: &std::path::Path,
) -> Result<(Vec<Record>, u32), FormatError> {
    let mut records = decode_records(bytes, path)?;
    match records.pop() {
        Some((u32::MAX, num_descriptors)) => Ok((records, num_descriptors)),
        _ => Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: "missing id-to-offset sentinel record".to_string(),
        }),
    }
}

/// Decode an offset→id map, stripping and validating its sentinel against
/// the expected descriptor count.
pub fn decode_offset_to_id(
    bytes: &[u8],
    path: &std::path::Path,
) -> Result<Vec<Record>, FormatError> {
    let mut records = decode_records(bytes, path)?;
    match records.pop() {
        Some((_, 0)) => Ok(records),
        _ => Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            reason: "missing offset-to-id sentinel record".to_string(),
        }),
    }
}
