//! ORB binary-descriptor index (`orb`, `spec.md` §4.C): a single
//! row-concatenated matrix of 32-byte descriptors, two sentinel-terminated
//! parallel maps (`media_id -> first_row`, `first_row -> media_id`), and a
//! single-table LSH bucketing of the matrix rows by their leading bits.

use std::path::Path;

use crate::db::{Database, Row, Value};
use crate::error::IndexError;
use crate::fingerprint::orb::descriptor_distance;
use crate::format::{atomic, idmap, touch};
use crate::index::{SearchIndex, SearchParams};
use crate::media::{Match, Media};

const TABLE: &str = "orb";
/// Target bucket occupancy used to size the LSH key (`spec.md` §4.C).
const DESCRIPTORS_PER_BUCKET: usize = 128;
/// Incremental-build chunk size (`spec.md` §4.C).
const BUILD_CHUNK_ROWS: usize = 10_000;
/// kNN fan-out per needle descriptor (`spec.md` §4.C).
const K_NEIGHBORS: usize = 10;

/// One media's descriptor row range, `[first_row, first_row + len)`.
#[derive(Debug, Clone, Copy)]
struct Span {
    media_id: u32,
    first_row: u32,
    len: u32,
}

/// LSH-bucketed matrix of ORB descriptors.
#[derive(Default)]
pub struct OrbIndex {
    descriptors: Vec<[u8; 32]>,
    /// Which media owns each row, parallel to `descriptors`; `0` means
    /// tombstoned.
    row_owner: Vec<u32>,
    spans: Vec<Span>,
    buckets: std::collections::HashMap<u32, Vec<u32>>,
    key_bits: u32,
    loaded: bool,
}

fn bucket_key(descriptor: &[u8; 32], key_bits: u32) -> u32 {
    if key_bits == 0 {
        return 0;
    }
    let word = u32::from_be_bytes([descriptor[0], descriptor[1], descriptor[2], descriptor[3]]);
    word >> (32 - key_bits.min(32))
}

impl OrbIndex {
    /// An empty, unloaded index.
    pub fn new() -> Self {
        Self::default()
    }

    fn key_bits_for(rows: usize) -> u32 {
        if rows <= DESCRIPTORS_PER_BUCKET {
            return 0;
        }
        let target_buckets = (rows / DESCRIPTORS_PER_BUCKET).max(1);
        (usize::BITS - target_buckets.leading_zeros()).saturating_sub(1)
    }

    fn rebuild_buckets(&mut self) {
        self.key_bits = Self::key_bits_for(self.descriptors.len());
        self.buckets.clear();
        for (row, (desc, &owner)) in self.descriptors.iter().zip(&self.row_owner).enumerate() {
            if owner == 0 {
                continue;
            }
            let key = bucket_key(desc, self.key_bits);
            self.buckets.entry(key).or_default().push(row as u32);
        }
    }

    fn append_media(&mut self, media_id: u32, descs: &[[u8; 32]]) {
        if descs.is_empty() {
            return;
        }
        let first_row = self.descriptors.len() as u32;
        self.descriptors.extend_from_slice(descs);
        self.row_owner.extend(std::iter::repeat(media_id).take(descs.len()));
        self.spans.push(Span { media_id, first_row, len: descs.len() as u32 });
        if self.descriptors.len() % BUILD_CHUNK_ROWS == 0 {
            self.rebuild_buckets();
        }
    }

    fn row_to_media(&self, row: u32) -> u32 {
        self.row_owner.get(row as usize).copied().unwrap_or(0)
    }

    fn encode_cache(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let matrix = self.descriptors.iter().flatten().copied().collect::<Vec<u8>>();
        let id_to_offset: Vec<(u32, u32)> =
            self.spans.iter().map(|s| (s.media_id, s.first_row)).collect();
        let offset_to_id: Vec<(u32, u32)> =
            self.spans.iter().map(|s| (s.first_row, s.media_id)).collect();
        let total_rows = self.descriptors.len() as u32;
        (
            matrix,
            idmap::encode_id_to_offset(&id_to_offset, total_rows),
            idmap::encode_offset_to_id(&offset_to_id, total_rows),
        )
    }

    fn load_from_db(&mut self, db: &dyn Database) -> Result<(), IndexError> {
        let rows = db.query_rows(TABLE).map_err(IndexError::from)?;
        self.descriptors.clear();
        self.row_owner.clear();
        self.spans.clear();
        for r in &rows {
            let media_id = r.get_int("media_id") as u32;
            let blob = r.get_blob("descriptors");
            let descs: Vec<[u8; 32]> =
                blob.chunks_exact(32).map(|c| c.try_into().unwrap()).collect();
            self.append_media(media_id, &descs);
        }
        self.rebuild_buckets();
        self.loaded = true;
        Ok(())
    }
}

impl SearchIndex for OrbIndex {
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError> {
        db.create_table_if_not_exists(TABLE, "media_id INTEGER, descriptors BLOB")
            .map_err(IndexError::from)
    }

    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError> {
        for m in media {
            if m.descriptors.is_empty() {
                continue;
            }
            let mut row = Row::default();
            row.set("media_id", Value::Int(m.id as i64));
            let blob: Vec<u8> = m.descriptors.iter().flatten().copied().collect();
            row.set("descriptors", Value::Blob(blob));
            db.insert(TABLE, row).map_err(IndexError::from)?;
        }
        Ok(())
    }

    fn remove_records(&self, db: &dyn Database, ids: &[u32]) -> Result<(), IndexError> {
        db.delete(TABLE, ids).map_err(IndexError::from)
    }

    fn count(&self) -> usize {
        self.descriptors.len()
    }

    fn memory_usage(&self) -> usize {
        self.descriptors.len() * 32 + self.row_owner.len() * 4
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
            if let Ok(matrix_bytes) = std::fs::read(cache_path) {
                let id_map_path = cache_path.with_extension("idmap.map");
                if let Ok(id_map_bytes) = std::fs::read(&id_map_path) {
                    if let Ok((records, _)) = idmap::decode_id_to_offset(&id_map_bytes, &id_map_path)
                    {
                        let descriptors: Vec<[u8; 32]> = matrix_bytes
                            .chunks_exact(32)
                            .map(|c| c.try_into().unwrap())
                            .collect();
                        self.descriptors = descriptors;
                        self.row_owner = vec![0; self.descriptors.len()];
                        self.spans.clear();
                        for window in records.windows(2) {
                            let (media_id, first_row) = window[0];
                            let (_, next_row) = window[1];
                            self.spans.push(Span {
                                media_id,
                                first_row,
                                len: next_row - first_row,
                            });
                        }
                        if let Some(&(media_id, first_row)) = records.last() {
                            let len = self.descriptors.len() as u32 - first_row;
                            self.spans.push(Span { media_id, first_row, len });
                        }
                        for span in &self.spans {
                            for row in span.first_row..span.first_row + span.len {
                                self.row_owner[row as usize] = span.media_id;
                            }
                        }
                        self.rebuild_buckets();
                        self.loaded = true;
                        return Ok(());
                    }
                }
            }
        }
        self.load_from_db(db)
    }

    fn save(&self, cache_path: &Path) -> Result<(), IndexError> {
        let (matrix, id_map, offset_map) = self.encode_cache();
        atomic::write_atomic(cache_path, &matrix).map_err(IndexError::from)?;
        atomic::write_atomic(&cache_path.with_extension("idmap.map"), &id_map)
            .map_err(IndexError::from)?;
        atomic::write_atomic(&cache_path.with_extension("indexmap.map"), &offset_map)
            .map_err(IndexError::from)?;
        touch::touch(cache_path).map_err(IndexError::from)
    }

    fn add(&mut self, media: &[Media]) {
        for m in media {
            self.append_media(m.id, &m.descriptors);
        }
        self.rebuild_buckets();
        self.loaded = true;
    }

    fn remove(&mut self, ids: &[u32]) {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        for owner in &mut self.row_owner {
            if id_set.contains(owner) {
                *owner = 0;
            }
        }
        for span in &mut self.spans {
            if id_set.contains(&span.media_id) {
                span.media_id = 0;
            }
        }
        self.rebuild_buckets();
    }

    fn find(&self, needle: &Media, params: &SearchParams) -> Vec<Match> {
        use std::collections::HashMap;
        let mut hits: HashMap<u32, Vec<u32>> = HashMap::new();

        for needle_desc in &needle.descriptors {
            let key = bucket_key(needle_desc, self.key_bits);
            let Some(rows) = self.buckets.get(&key) else { continue };

            let mut neighbors: Vec<(u32, u32)> = rows
                .iter()
                .map(|&row| (descriptor_distance(needle_desc, &self.descriptors[row as usize]), row))
                .filter(|&(dist, _)| dist < params.cv_thresh)
                .collect();
            neighbors.sort_by_key(|&(dist, _)| dist);
            neighbors.truncate(K_NEIGHBORS);

            for (dist, row) in neighbors {
                let owner = self.row_to_media(row);
                if owner != 0 && owner != needle.id {
                    hits.entry(owner).or_default().push(dist);
                }
            }
        }

        let mut matches: Vec<Match> = hits
            .into_iter()
            .map(|(media_id, mut distances)| {
                distances.sort_unstable();
                let median = distances[distances.len() / 2];
                let score = (median as u64 * 1000 / distances.len() as u64) as i32;
                Match { media_id, score }
            })
            .collect();
        matches.sort_by_key(|m| m.score);
        matches.truncate(params.max_matches);
        matches
    }

    fn find_index_data(&self, media: &mut Media) -> bool {
        if let Some(span) = self.spans.iter().find(|s| s.media_id == media.id && s.media_id != 0) {
            let start = span.first_row as usize;
            let end = start + span.len as usize;
            media.descriptors = self.descriptors[start..end].to_vec();
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

    fn media_with_descriptors(id: u32, descs: Vec<[u8; 32]>) -> Media {
        let mut m = Media::new(format!("m{id}.jpg"), MediaType::Image);
        m.id = id;
        m.descriptors = descs;
        m
    }

    fn desc(seed: u8) -> [u8; 32] {
        let mut d = [0u8; 32];
        d[0] = seed;
        d
    }

    #[test]
    fn empty_index_finds_nothing() {
        let idx = OrbIndex::new();
        let needle = media_with_descriptors(1, vec![desc(0)]);
        assert!(idx.find(&needle, &SearchParams::default()).is_empty());
    }

    #[test]
    fn finds_close_descriptor_and_excludes_self() {
        let mut idx = OrbIndex::new();
        idx.add(&[
            media_with_descriptors(1, vec![desc(0b0000_0000)]),
            media_with_descriptors(2, vec![desc(0b0000_0001)]),
            media_with_descriptors(3, vec![desc(0b1111_1111)]),
        ]);
        let needle = media_with_descriptors(1, vec![desc(0b0000_0000)]);
        let mut params = SearchParams::default();
        params.cv_thresh = 4;
        let results = idx.find(&needle, &params);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].media_id, 2);
    }

    #[test]
    fn removed_media_rows_are_excluded() {
        let mut idx = OrbIndex::new();
        idx.add(&[media_with_descriptors(1, vec![desc(5)])]);
        idx.remove(&[1]);
        let needle = media_with_descriptors(9, vec![desc(5)]);
        let mut params = SearchParams::default();
        params.cv_thresh = 64;
        assert!(idx.find(&needle, &params).is_empty());
    }

    #[test]
    fn find_index_data_returns_stored_descriptors() {
        let mut idx = OrbIndex::new();
        idx.add(&[media_with_descriptors(1, vec![desc(1), desc(2)])]);
        let mut m = Media::new("m1.jpg", MediaType::Image);
        m.id = 1;
        assert!(idx.find_index_data(&mut m));
        assert_eq!(m.descriptors.len(), 2);
    }
}
