//! Video-index file format (`*.vdx`, `spec.md` §4.B): version 1 is a 2-byte
//! `u16 count`, then `count` `u16` frame numbers, then `count` `u64` hashes.
//! Files shorter than their declared length are treated as empty rather than
//! an error (`spec.md` §4.B, §8 "Corrupt cache file... falls back").

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::media::VideoIndex;

/// The only version this codec writes. A future version must be
/// self-describing by magic (`spec.md` §4.B); none is needed yet.
pub const VERSION: u16 = 1;

/// Serialize a [`VideoIndex`] to its version-1 byte layout.
pub fn encode(index: &VideoIndex) -> Vec<u8> {
    debug_assert_eq!(index.frames.len(), index.hashes.len());
    let count = index.frames.len() as u16;
    let mut out = Vec::with_capacity(2 + index.frames.len() * 2 + index.hashes.len() * 8);
    out.write_u16::<LittleEndian>(count).unwrap();
    for &frame in &index.frames {
        out.write_u16::<LittleEndian>(frame).unwrap();
    }
    for &hash in &index.hashes {
        out.write_u64::<LittleEndian>(hash).unwrap();
    }
    out
}

/// Deserialize a `.vdx` file. Per `spec.md` §4.B, a file that is too short
/// for its own declared `count` is treated as empty, not an error — the
/// index is simply regenerated on the next pass.
pub fn decode(bytes: &[u8]) -> VideoIndex {
    let mut cursor = Cursor::new(bytes);
    let Ok(count) = cursor.read_u16::<LittleEndian>() else {
        return VideoIndex::default();
    };
    let count = count as usize;

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        match cursor.read_u16::<LittleEndian>() {
            Ok(f) => frames.push(f),
            Err(_) => return VideoIndex::default(),
        }
    }
    let mut hashes = Vec::with_capacity(count);
    for _ in 0..count {
        match cursor.read_u64::<LittleEndian>() {
            Ok(h) => hashes.push(h),
            Err(_) => return VideoIndex::default(),
        }
    }
    VideoIndex { frames, hashes }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let idx = VideoIndex { frames: vec![0, 10, 25], hashes: vec![1, 2, 3] };
        let bytes = encode(&idx);
        assert_eq!(decode(&bytes), idx);
    }

    #[test]
    fn empty_index_round_trips() {
        let idx = VideoIndex::default();
        let bytes = encode(&idx);
        assert_eq!(decode(&bytes), idx);
    }

    #[test]
    fn truncated_file_decodes_as_empty() {
        let idx = VideoIndex { frames: vec![1, 2, 3], hashes: vec![9, 9, 9] };
        let mut bytes = encode(&idx);
        bytes.truncate(bytes.len() - 4);
        assert_eq!(decode(&bytes), VideoIndex::default());
    }

    #[test]
    fn empty_byte_slice_decodes_as_empty() {
        assert_eq!(decode(&[]), VideoIndex::default());
    }
}
