//! EXIF tag reads (`dupfind::media::exif_cache::ExifReader`).
//!
//! Walks the raw TIFF blob the `image` crate's decoders already expose
//! (`ImageDecoder::exif_metadata`) rather than pulling in a separate EXIF
//! crate: a small IFD0 walk covering the handful of tags `property.rs`
//! queries (`Make`, `Model`, `DateTimeOriginal`, ...), following the `Exif`
//! sub-IFD pointer for the tags that live there.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;

use dupfind::media::exif_cache::ExifReader;
use image::ImageDecoder;

const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
const TAG_MAKE: u16 = 0x010F;
const TAG_MODEL: u16 = 0x0110;
const TAG_ORIENTATION: u16 = 0x0112;
const TAG_SOFTWARE: u16 = 0x0131;
const TAG_DATE_TIME: u16 = 0x0132;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;

fn tag_id(name: &str) -> Option<u16> {
    Some(match name {
        "ImageDescription" => TAG_IMAGE_DESCRIPTION,
        "Make" => TAG_MAKE,
        "Model" => TAG_MODEL,
        "Orientation" => TAG_ORIENTATION,
        "Software" => TAG_SOFTWARE,
        "DateTime" => TAG_DATE_TIME,
        "DateTimeOriginal" => TAG_DATE_TIME_ORIGINAL,
        _ => return None,
    })
}

struct Endian {
    big: bool,
}

impl Endian {
    fn u16(&self, b: &[u8]) -> u16 {
        if self.big { u16::from_be_bytes([b[0], b[1]]) } else { u16::from_le_bytes([b[0], b[1]]) }
    }

    fn u32(&self, b: &[u8]) -> u32 {
        if self.big {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }
    }
}

/// Walk one IFD at `offset`, returning its entries as tag id -> rendered
/// string value. Numeric Exif-IFD-pointer values render as plain decimal
/// text so the caller can re-parse and follow them.
fn read_ifd(tiff: &[u8], offset: usize, endian: &Endian) -> HashMap<u16, String> {
    let mut values = HashMap::new();
    if offset + 2 > tiff.len() {
        return values;
    }
    let count = endian.u16(&tiff[offset..]) as usize;
    let mut pos = offset + 2;
    for _ in 0..count {
        if pos + 12 > tiff.len() {
            break;
        }
        let entry = &tiff[pos..pos + 12];
        let tag = endian.u16(&entry[0..2]);
        let field_type = endian.u16(&entry[2..4]);
        let num_values = endian.u32(&entry[4..8]) as usize;
        let inline_or_offset = &entry[8..12];

        let size_per = match field_type {
            2 => 1, // ASCII
            3 => 2, // SHORT
            4 => 4, // LONG
            _ => 0,
        };
        let total = size_per * num_values;
        pos += 12;
        if total == 0 {
            continue;
        }
        let data = if total <= 4 {
            &inline_or_offset[..total]
        } else {
            let value_offset = endian.u32(inline_or_offset) as usize;
            if value_offset + total > tiff.len() {
                continue;
            }
            &tiff[value_offset..value_offset + total]
        };

        let rendered = match field_type {
            2 => String::from_utf8_lossy(data).trim_end_matches('\0').to_string(),
            3 => endian.u16(data).to_string(),
            4 => endian.u32(data).to_string(),
            _ => continue,
        };
        values.insert(tag, rendered);
    }
    values
}

/// Parse a raw EXIF/TIFF blob into a tag-id -> string table, merging in the
/// `Exif` sub-IFD (tag `0x8769`) when present.
fn parse_exif_blob(blob: &[u8]) -> HashMap<u16, String> {
    if blob.len() < 8 {
        return HashMap::new();
    }
    let endian = match &blob[0..2] {
        b"II" => Endian { big: false },
        b"MM" => Endian { big: true },
        _ => return HashMap::new(),
    };
    let ifd0_offset = endian.u32(&blob[4..8]) as usize;
    let mut values = read_ifd(blob, ifd0_offset, &endian);
    if let Some(sub_offset) = values.get(&TAG_EXIF_IFD_POINTER).and_then(|s| s.parse::<usize>().ok()) {
        values.extend(read_ifd(blob, sub_offset, &endian));
    }
    values
}

/// Reads EXIF tags through the `image` crate's decoder-exposed raw blob.
#[derive(Default)]
pub struct ImageExifReader;

impl ImageExifReader {
    /// A fresh reader with no state to share across calls.
    pub fn new() -> Self {
        ImageExifReader
    }
}

impl ExifReader for ImageExifReader {
    fn read_exif_keys(&self, path: &str, keys: &[String]) -> Vec<Option<String>> {
        let blob = File::open(path)
            .ok()
            .and_then(|f| image::ImageReader::new(BufReader::new(f)).with_guessed_format().ok())
            .and_then(|r| r.into_decoder().ok())
            .and_then(|mut d| d.exif_metadata().ok().flatten());

        let values = blob.as_deref().map(parse_exif_blob).unwrap_or_default();
        keys.iter().map(|key| tag_id(key).and_then(|id| values.get(&id).cloned())).collect()
    }
}
