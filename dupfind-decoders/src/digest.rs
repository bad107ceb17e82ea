//! Canonical content digest (`spec.md` §3 digest rule).
//!
//! For JPEGs, hashed over the payload starting at the first scan-start
//! marker (`0xFFDA`); every marker segment before it — including the EXIF
//! `APPn` segments the rule calls out by name — lives in the header and is
//! therefore already excluded. Every other format hashes the whole file.

use std::path::Path;

use dupfind::error::FingerprintError;
use md5::{Digest, Md5};

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] == 0xD8
}

/// The byte range of a JPEG file starting at its first scan-start marker,
/// or `None` if the marker chain runs off the end of the file first.
fn jpeg_payload(bytes: &[u8]) -> Option<&[u8]> {
    let mut i = 2usize;
    while i + 3 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xDA {
            return Some(&bytes[i..]);
        }
        // Markers with no length field: restart markers and the lone TEM.
        if marker == 0x01 || (0xD0..=0xD9).contains(&marker) {
            i += 2;
            continue;
        }
        let seg_len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if seg_len < 2 {
            return None;
        }
        i += 2 + seg_len;
    }
    None
}

/// Hex MD5 of `bytes` under the canonical digest rule, attributing a
/// truncation failure to `path`.
pub fn digest_bytes(bytes: &[u8], path: &Path) -> Result<String, FingerprintError> {
    let mut hasher = Md5::new();
    if looks_like_jpeg(bytes) {
        let payload = jpeg_payload(bytes)
            .ok_or_else(|| FingerprintError::JpegTruncated { path: path.to_path_buf() })?;
        hasher.update(payload);
    } else {
        hasher.update(bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}
