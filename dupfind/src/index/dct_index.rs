//! Whole-image DCT-64 hash index (`dct`, `spec.md` §4.C): a linear scan
//! over a packed `(id, hash)` array.

use std::path::Path;

use crate::db::{Database, Row, Value};
use crate::error::{FormatError, IndexError};
use crate::fingerprint::dct::hamming_distance;
use crate::format::{atomic, touch};
use crate::index::{SearchIndex, SearchParams};
use crate::media::{Match, Media};

const TABLE: &str = "hash";

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: u32,
    hash: u64,
}

/// Linear-scan Hamming index over whole-image DCT hashes.
#[derive(Default)]
pub struct DctIndex {
    entries: Vec<Entry>,
    loaded: bool,
}

impl DctIndex {
    /// An empty, unloaded index.
    pub fn new() -> Self {
        Self::default()
    }

    fn load_from_db(&mut self, db: &dyn Database) -> Result<(), IndexError> {
        let rows = db.query_rows(TABLE).map_err(IndexError::from)?;
        self.entries = rows
            .iter()
            .map(|r| Entry { id: r.get_int("media_id") as u32, hash: r.get_int("dct_hash") as u64 })
            .collect();
        self.loaded = true;
        Ok(())
    }

    fn encode_cache(&self) -> Vec<u8> {
        use byteorder::{LittleEndian, WriteBytesExt};
        let mut out = Vec::with_capacity(self.entries.len() * 12);
        for e in &self.entries {
            out.write_u32::<LittleEndian>(e.id).unwrap();
            out.write_u64::<LittleEndian>(e.hash).unwrap();
        }
        out
    }

    fn decode_cache(bytes: &[u8], path: &Path) -> Result<Vec<Entry>, FormatError> {
        use byteorder::{LittleEndian, ReadBytesExt};
        use std::io::Cursor;
        if bytes.len() % 12 != 0 {
            return Err(FormatError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("length {} not a multiple of 12", bytes.len()),
            });
        }
        let mut cursor = Cursor::new(bytes);
        let mut entries = Vec::with_capacity(bytes.len() / 12);
        while (cursor.position() as usize) < bytes.len() {
            let id = cursor.read_u32::<LittleEndian>().unwrap();
            let hash = cursor.read_u64::<LittleEndian>().unwrap();
            entries.push(Entry { id, hash });
        }
        Ok(entries)
    }
}

impl SearchIndex for DctIndex {
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError> {
        db.create_table_if_not_exists(TABLE, "media_id INTEGER, dct_hash INTEGER")
            .map_err(IndexError::from)
    }

    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError> {
        for m in media {
            if m.dct_hash == 0 {
                continue;
            }
            let mut row = Row::default();
            row.set("media_id", Value::Int(m.id as i64));
            row.set("dct_hash", Value::Int(m.dct_hash as i64));
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
        self.entries.len() * std::mem::size_of::<Entry>()
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
            if m.dct_hash != 0 {
                self.entries.push(Entry { id: m.id, hash: m.dct_hash });
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
                let dist = hamming_distance(e.hash, needle.dct_hash);
                (dist <= params.dct_thresh).then_some(Match { media_id: e.id, score: dist as i32 })
            })
            .collect();
        matches.sort_by_key(|m| m.score);
        matches.truncate(params.max_matches);
        matches
    }

    fn find_index_data(&self, media: &mut Media) -> bool {
        if let Some(entry) = self.entries.iter().find(|e| e.id == media.id && e.id != 0) {
            media.dct_hash = entry.hash;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::index::test_support::media_with_dct_hash;

    #[test]
    fn empty_index_finds_nothing() {
        let idx = DctIndex::new();
        let needle = media_with_dct_hash(1, 0);
        assert!(idx.find(&needle, &SearchParams::default()).is_empty());
        assert_eq!(idx.memory_usage(), 0);
    }

    #[test]
    fn finds_within_threshold_and_excludes_self() {
        let mut idx = DctIndex::new();
        idx.add(&[
            media_with_dct_hash(1, 0b0000),
            media_with_dct_hash(2, 0b0001),
            media_with_dct_hash(3, 0b1111),
        ]);
        let needle = media_with_dct_hash(1, 0b0000);
        let mut params = SearchParams::default();
        params.dct_thresh = 1;
        let results = idx.find(&needle, &params);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].media_id, 2);
    }

    #[test]
    fn removed_entries_are_not_found() {
        let mut idx = DctIndex::new();
        idx.add(&[media_with_dct_hash(1, 0), media_with_dct_hash(2, 0)]);
        idx.remove(&[2]);
        let needle = media_with_dct_hash(1, 0);
        let mut params = SearchParams::default();
        params.dct_thresh = 64;
        assert!(idx.find(&needle, &params).is_empty());
    }

    #[test]
    fn add_records_persists_only_computed_hashes() {
        let db = MemoryDatabase::new();
        let idx = DctIndex::new();
        idx.create_tables(&db).unwrap();
        idx.add_records(&db, &[media_with_dct_hash(1, 42), media_with_dct_hash(2, 0)]).unwrap();
        assert_eq!(db.query_rows("hash").unwrap().len(), 1);
    }
}
