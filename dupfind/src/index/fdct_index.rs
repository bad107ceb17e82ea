//! Per-keypoint DCT hash index (`fdct`, `spec.md` §4.C): a Hamming tree over
//! all `(media_id, keypoint_hash)` pairs. A needle with several keypoint
//! hashes accumulates per-candidate hit counts; the score is the median hit
//! distance scaled down by the hit count, so candidates hit more often (and
//! more precisely) score better (lower).

use std::collections::HashMap;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::db::{Database, Row, Value};
use crate::error::{FormatError, IndexError};
use crate::format::{atomic, touch};
use crate::index::hamming_tree::BkTree;
use crate::index::{SearchIndex, SearchParams};
use crate::media::{Match, Media};

const TABLE: &str = "kphash";
/// Per needle-hash, how many nearest neighbors to keep (`spec.md` §4.C).
const NEIGHBORS_PER_HASH: usize = 10;

/// Hamming-tree index over per-keypoint DCT-64 hashes.
#[derive(Default)]
pub struct FeatureDctIndex {
    tree: BkTree<u32>,
    loaded: bool,
}

impl FeatureDctIndex {
    /// An empty, unloaded index.
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_hashes(hashes: &[u64]) -> Vec<u8> {
        let mut out = Vec::with_capacity(hashes.len() * 8);
        for &h in hashes {
            out.write_u64::<LittleEndian>(h).unwrap();
        }
        out
    }

    fn decode_hashes(bytes: &[u8]) -> Option<Vec<u64>> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let mut cursor = std::io::Cursor::new(bytes);
        let mut hashes = Vec::with_capacity(bytes.len() / 8);
        while (cursor.position() as usize) < bytes.len() {
            hashes.push(cursor.read_u64::<LittleEndian>().ok()?);
        }
        Some(hashes)
    }

    fn load_from_db(&mut self, db: &dyn Database) -> Result<(), IndexError> {
        let rows = db.query_rows(TABLE).map_err(IndexError::from)?;
        let mut tree = BkTree::new();
        for row in &rows {
            let id = row.get_int("media_id") as u32;
            if let Some(hashes) = Self::decode_hashes(row.get_blob("hashes")) {
                tree.add_all(hashes.into_iter().map(|h| (h, id)));
            }
        }
        self.tree = tree;
        self.loaded = true;
        Ok(())
    }

    fn encode_cache(&self, pairs: &[(u64, u32)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(pairs.len() * 12);
        for &(hash, id) in pairs {
            out.write_u64::<LittleEndian>(hash).unwrap();
            out.write_u32::<LittleEndian>(id).unwrap();
        }
        out
    }

    fn decode_cache(bytes: &[u8], path: &Path) -> Result<BkTree<u32>, FormatError> {
        if bytes.len() % 12 != 0 {
            return Err(FormatError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("length {} not a multiple of 12", bytes.len()),
            });
        }
        let mut cursor = std::io::Cursor::new(bytes);
        let mut tree = BkTree::new();
        while (cursor.position() as usize) < bytes.len() {
            let hash = cursor.read_u64::<LittleEndian>().unwrap();
            let id = cursor.read_u32::<LittleEndian>().unwrap();
            tree.add(hash, id);
        }
        Ok(tree)
    }
}

impl SearchIndex for FeatureDctIndex {
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError> {
        db.create_table_if_not_exists(TABLE, "media_id INTEGER, hashes BLOB")
            .map_err(IndexError::from)
    }

    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError> {
        for m in media {
            if m.keypoint_hashes.is_empty() {
                continue;
            }
            let mut row = Row::default();
            row.set("media_id", Value::Int(m.id as i64));
            row.set("hashes", Value::Blob(Self::encode_hashes(&m.keypoint_hashes)));
            db.insert(TABLE, row).map_err(IndexError::from)?;
        }
        Ok(())
    }

    fn remove_records(&self, db: &dyn Database, ids: &[u32]) -> Result<(), IndexError> {
        db.delete(TABLE, ids).map_err(IndexError::from)
    }

    fn count(&self) -> usize {
        self.tree.len()
    }

    fn memory_usage(&self) -> usize {
        self.tree.memory_usage()
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
                if let Ok(tree) = Self::decode_cache(&bytes, cache_path) {
                    self.tree = tree;
                    self.loaded = true;
                    return Ok(());
                }
            }
        }
        self.load_from_db(db)
    }

    fn save(&self, cache_path: &Path) -> Result<(), IndexError> {
        let mut pairs = Vec::with_capacity(self.tree.len());
        self.tree.for_each_with_key(|hash, &id| pairs.push((hash, id)));
        atomic::write_atomic(cache_path, &self.encode_cache(&pairs)).map_err(IndexError::from)?;
        touch::touch(cache_path).map_err(IndexError::from)
    }

    fn add(&mut self, media: &[Media]) {
        for m in media {
            self.tree.add_all(m.keypoint_hashes.iter().map(|&h| (h, m.id)));
        }
        self.loaded = true;
    }

    fn remove(&mut self, ids: &[u32]) {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        self.tree.remove_any_of(|id| id_set.contains(id));
    }

    fn find(&self, needle: &Media, params: &SearchParams) -> Vec<Match> {
        let mut hits: HashMap<u32, Vec<u32>> = HashMap::new();
        for &needle_hash in &needle.keypoint_hashes {
            let mut neighbors: Vec<(u32, u32)> = Vec::new();
            self.tree.find_within(needle_hash, params.dct_thresh, |dist, &id| {
                neighbors.push((dist, id));
            });
            neighbors.sort_by_key(|&(dist, _)| dist);
            neighbors.truncate(NEIGHBORS_PER_HASH);
            for (dist, id) in neighbors {
                if id != needle.id && id != 0 {
                    hits.entry(id).or_default().push(dist);
                }
            }
        }

        let mut matches: Vec<Match> = hits
            .into_iter()
            .map(|(id, mut distances)| {
                distances.sort_unstable();
                let median = distances[distances.len() / 2];
                let score = (median as u64 * 1000 / distances.len() as u64) as i32;
                Match { media_id: id, score }
            })
            .collect();
        matches.sort_by_key(|m| m.score);
        matches.truncate(params.max_matches);
        matches
    }

    fn find_index_data(&self, _media: &mut Media) -> bool {
        // Keypoint hashes live on `Media` directly once computed by the
        // fingerprint stage; this index has no additional owned field to
        // backfill beyond what `add_records`/`find` already consume.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaType;

    fn media_with_hashes(id: u32, hashes: Vec<u64>) -> Media {
        let mut m = Media::new(format!("m{id}.jpg"), MediaType::Image);
        m.id = id;
        m.keypoint_hashes = hashes;
        m
    }

    #[test]
    fn empty_index_finds_nothing() {
        let idx = FeatureDctIndex::new();
        let needle = media_with_hashes(1, vec![0]);
        assert!(idx.find(&needle, &SearchParams::default()).is_empty());
    }

    #[test]
    fn more_hits_score_better() {
        let mut idx = FeatureDctIndex::new();
        idx.add(&[
            media_with_hashes(1, vec![0, 1, 2]),
            media_with_hashes(2, vec![0]),
        ]);
        let needle = media_with_hashes(9, vec![0, 1, 2]);
        let mut params = SearchParams::default();
        params.dct_thresh = 2;
        let results = idx.find(&needle, &params);
        let best = results.iter().min_by_key(|m| m.score).unwrap();
        assert_eq!(best.media_id, 1);
    }

    #[test]
    fn cache_round_trips() {
        let mut idx = FeatureDctIndex::new();
        idx.add(&[media_with_hashes(1, vec![10, 20]), media_with_hashes(2, vec![30])]);
        let mut pairs = Vec::new();
        idx.tree.for_each_with_key(|h, &id| pairs.push((h, id)));
        let bytes = idx.encode_cache(&pairs);
        let tree = FeatureDctIndex::decode_cache(&bytes, Path::new("x")).unwrap();
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn removed_media_is_excluded() {
        let mut idx = FeatureDctIndex::new();
        idx.add(&[media_with_hashes(1, vec![5])]);
        idx.remove(&[1]);
        let needle = media_with_hashes(9, vec![5]);
        let mut params = SearchParams::default();
        params.dct_thresh = 0;
        assert!(idx.find(&needle, &params).is_empty());
    }
}
