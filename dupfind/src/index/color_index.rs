//! Dominant-color descriptor index (`color`, `spec.md` §4.C): a flat array
//! of `(id, ColorDescriptor)`, linear scan, `color_distance` does the work.

use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::db::{Database, Row, Value};
use crate::error::{FormatError, IndexError};
use crate::fingerprint::color::color_distance;
use crate::format::{atomic, touch};
use crate::index::{SearchIndex, SearchParams};
use crate::media::{ColorDescriptor, ColorEntry, Match, Media};

const TABLE: &str = "color";

struct Entry {
    id: u32,
    descriptor: ColorDescriptor,
}

/// Linear-scan color-distance index.
#[derive(Default)]
pub struct ColorIndex {
    entries: Vec<Entry>,
    loaded: bool,
}

impl ColorIndex {
    /// An empty, unloaded index.
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_descriptor(d: &ColorDescriptor) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + d.colors.len() * 8);
        out.write_u16::<LittleEndian>(d.colors.len() as u16).unwrap();
        for c in &d.colors {
            out.write_u16::<LittleEndian>(c.l).unwrap();
            out.write_u16::<LittleEndian>(c.u).unwrap();
            out.write_u16::<LittleEndian>(c.v).unwrap();
            out.write_u16::<LittleEndian>(c.w).unwrap();
        }
        out
    }

    fn decode_descriptor(bytes: &[u8]) -> Option<ColorDescriptor> {
        let mut cursor = std::io::Cursor::new(bytes);
        let count = cursor.read_u16::<LittleEndian>().ok()? as usize;
        let mut colors = Vec::with_capacity(count);
        for _ in 0..count {
            let l = cursor.read_u16::<LittleEndian>().ok()?;
            let u = cursor.read_u16::<LittleEndian>().ok()?;
            let v = cursor.read_u16::<LittleEndian>().ok()?;
            let w = cursor.read_u16::<LittleEndian>().ok()?;
            colors.push(ColorEntry { l, u, v, w });
        }
        Some(ColorDescriptor { colors })
    }

    fn load_from_db(&mut self, db: &dyn Database) -> Result<(), IndexError> {
        let rows = db.query_rows(TABLE).map_err(IndexError::from)?;
        self.entries = rows
            .iter()
            .filter_map(|r| {
                let id = r.get_int("media_id") as u32;
                let descriptor = Self::decode_descriptor(r.get_blob("color_desc"))?;
                Some(Entry { id, descriptor })
            })
            .collect();
        self.loaded = true;
        Ok(())
    }

    fn encode_cache(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for e in &self.entries {
            out.write_u32::<LittleEndian>(e.id).unwrap();
            let encoded = Self::encode_descriptor(&e.descriptor);
            out.write_u32::<LittleEndian>(encoded.len() as u32).unwrap();
            out.extend_from_slice(&encoded);
        }
        out
    }

    fn decode_cache(bytes: &[u8], path: &Path) -> Result<Vec<Entry>, FormatError> {
        let mut cursor = std::io::Cursor::new(bytes);
        let mut entries = Vec::new();
        while (cursor.position() as usize) < bytes.len() {
            let id = cursor.read_u32::<LittleEndian>().map_err(|_| FormatError::Corrupt {
                path: path.to_path_buf(),
                reason: "truncated entry id".to_string(),
            })?;
            let len = cursor.read_u32::<LittleEndian>().map_err(|_| FormatError::Corrupt {
                path: path.to_path_buf(),
                reason: "truncated entry length".to_string(),
            })? as usize;
            let start = cursor.position() as usize;
            let end = start + len;
            if end > bytes.len() {
                return Err(FormatError::Corrupt {
                    path: path.to_path_buf(),
                    reason: "descriptor payload runs past end of file".to_string(),
                });
            }
            let descriptor = Self::decode_descriptor(&bytes[start..end]).ok_or_else(|| {
                FormatError::Corrupt { path: path.to_path_buf(), reason: "bad descriptor bytes".to_string() }
            })?;
            cursor.set_position(end as u64);
            entries.push(Entry { id, descriptor });
        }
        Ok(entries)
    }
}

impl SearchIndex for ColorIndex {
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError> {
        db.create_table_if_not_exists(TABLE, "media_id INTEGER, color_desc BLOB")
            .map_err(IndexError::from)
    }

    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError> {
        for m in media {
            if m.color_descriptor.is_empty() {
                continue;
            }
            let mut row = Row::default();
            row.set("media_id", Value::Int(m.id as i64));
            row.set("color_desc", Value::Blob(Self::encode_descriptor(&m.color_descriptor)));
            db.insert(TABLE, row).map_err(IndexError::from)?;
        }
        Ok(())
    }

    fn remove_records(&self, db: &dyn Database, ids: &[u32]) -> Result<(), IndexError> {
        db.delete(TABLE, ids).map_err(IndexError::from)
    }

    fn count(&self) -> usize {
        self.entries.len()
    }

    fn memory_usage(&self) -> usize {
        self.entries.iter().map(|e| e.descriptor.colors.len() * 8 + 8).sum()
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(
        &mut self,
        db: &dyn Database,
        cache_path: &Path,
        data_path: &Path,
    ) -> Result<(), IndexError> {
        if touch::is_fresh(cache_path, data_path) {
            if let Ok(bytes) = std::fs::read(cache_path) {
                if let Ok(entries) = Self::decode_cache(&bytes, cache_path) {
                    self.entries = entries;
                    self.loaded = true;
                    return Ok(());
                }
            }
        }
        self.load_from_db(db)
    }

    fn save(&self, cache_path: &Path) -> Result<(), IndexError> {
        atomic::write_atomic(cache_path, &self.encode_cache()).map_err(IndexError::from)?;
        touch::touch(cache_path).map_err(IndexError::from)
    }

    fn add(&mut self, media: &[Media]) {
        for m in media {
            if !m.color_descriptor.is_empty() {
                self.entries.push(Entry { id: m.id, descriptor: m.color_descriptor.clone() });
            }
        }
        self.loaded = true;
    }

    fn remove(&mut self, ids: &[u32]) {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        for e in &mut self.entries {
            if id_set.contains(&e.id) {
                e.id = 0;
            }
        }
    }

    fn find(&self, needle: &Media, params: &SearchParams) -> Vec<Match> {
        let mut matches: Vec<Match> = self
            .entries
            .iter()
            .filter(|e| e.id != 0 && e.id != needle.id)
            .filter_map(|e| {
                let dist = color_distance(&needle.color_descriptor, &e.descriptor);
                (dist.is_finite()).then_some(Match { media_id: e.id, score: dist.round() as i32 })
            })
            .collect();
        matches.sort_by_key(|m| m.score);
        matches.truncate(params.max_matches);
        matches
    }

    fn find_index_data(&self, media: &mut Media) -> bool {
        if let Some(entry) = self.entries.iter().find(|e| e.id == media.id && e.id != 0) {
            media.color_descriptor = entry.descriptor.clone();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;

    fn media_with_descriptor(id: u32, l: u16) -> Media {
        let mut m = Media::new(format!("m{id}.jpg"), MediaType::Image);
        m.id = id;
        m.color_descriptor = ColorDescriptor { colors: vec![ColorEntry { l, u: 0, v: 0, w: 65535 }] };
        m
    }

    #[test]
    fn empty_index_finds_nothing() {
        let idx = ColorIndex::new();
        let needle = media_with_descriptor(1, 0);
        assert!(idx.find(&needle, &SearchParams::default()).is_empty());
    }

    #[test]
    fn finds_closest_color_and_excludes_self() {
        let mut idx = ColorIndex::new();
        idx.add(&[media_with_descriptor(1, 100), media_with_descriptor(2, 101), media_with_descriptor(3, 5000)]);
        let needle = media_with_descriptor(1, 100);
        let results = idx.find(&needle, &SearchParams::default());
        assert_eq!(results.first().unwrap().media_id, 2);
    }

    #[test]
    fn cache_round_trips() {
        let mut idx = ColorIndex::new();
        idx.add(&[media_with_descriptor(1, 100), media_with_descriptor(2, 200)]);
        let bytes = idx.encode_cache();
        let decoded = ColorIndex::decode_cache(&bytes, Path::new("x")).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].id, 1);
    }
}
