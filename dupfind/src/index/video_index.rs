//! Per-frame video hash index (`video`, `spec.md` §4.C): a per-media `.vdx`
//! blob in SQL plus an aggregate in-memory Hamming tree over every
//! `(frame_hash) -> (media_id, frame_number)` pair from every indexed video.

use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::db::{Database, Row, Value};
use crate::error::{FormatError, IndexError};
use crate::format::{atomic, touch, vdx};
use crate::index::hamming_tree::BkTree;
use crate::index::{SearchIndex, SearchParams};
use crate::media::{Match, MatchRange, Media, VideoIndex};

const TABLE: &str = "video_index";

struct Entry {
    id: u32,
    index: VideoIndex,
}

/// Aggregate Hamming-tree index over sampled video frame hashes.
#[derive(Default)]
pub struct VideoSearchIndex {
    entries: Vec<Entry>,
    /// `frame_hash -> (media_id, frame_number)`.
    tree: BkTree<(u32, u16)>,
    loaded: bool,
}

/// Longest run of hits whose destination frame number does not regress as
/// the source frame number advances, used to estimate `MatchRange` for a
/// video-needle candidate (`spec.md` §4.C "Record the best MatchRange").
fn longest_contiguous_run(hits: &[(u16, u16, u32)]) -> MatchRange {
    let mut sorted = hits.to_vec();
    sorted.sort_by_key(|&(src, _, _)| src);

    let mut best_start = 0usize;
    let mut best_len = 0usize;
    let mut run_start = 0usize;
    for i in 1..=sorted.len() {
        let broke = i == sorted.len() || sorted[i].1 < sorted[i - 1].1;
        if broke {
            let len = i - run_start;
            if len > best_len {
                best_len = len;
                best_start = run_start;
            }
            run_start = i;
        }
    }
    if best_len == 0 {
        return MatchRange::none();
    }
    let (src_in, dst_in, _) = sorted[best_start];
    let (src_end, _, _) = sorted[best_start + best_len - 1];
    MatchRange {
        src_in: src_in as i32,
        dst_in: dst_in as i32,
        len: (src_end as i32 - src_in as i32 + 1).max(best_len as i32),
    }
}

impl VideoSearchIndex {
    /// An empty, unloaded index.
    pub fn new() -> Self {
        Self::default()
    }

    /// The best temporal alignment between `needle` (a video) and the
    /// candidate `media_id`, for query-engine post-processing
    /// (`spec.md` §4.C "Record the best MatchRange per candidate").
    pub fn match_range_for(&self, needle: &Media, media_id: u32, params: &SearchParams) -> MatchRange {
        let mut hits = Vec::new();
        for (&src_frame, &hash) in needle.video_index.frames.iter().zip(&needle.video_index.hashes) {
            self.tree.find_within(hash, params.dct_thresh, |dist, &(id, dst_frame)| {
                if id == media_id {
                    hits.push((src_frame, dst_frame, dist));
                }
            });
        }
        longest_contiguous_run(&hits)
    }

    fn encode_cache(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for e in &self.entries {
            out.write_u32::<LittleEndian>(e.id).unwrap();
            let encoded = vdx::encode(&e.index);
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
                    reason: "vdx payload runs past end of file".to_string(),
                });
            }
            entries.push(Entry { id, index: vdx::decode(&bytes[start..end]) });
            cursor.set_position(end as u64);
        }
        Ok(entries)
    }

    fn rebuild_tree(&mut self) {
        let mut tree = BkTree::new();
        for e in &self.entries {
            if e.id == 0 {
                continue;
            }
            tree.add_all(
                e.index
                    .frames
                    .iter()
                    .zip(&e.index.hashes)
                    .map(|(&frame, &hash)| (hash, (e.id, frame))),
            );
        }
        self.tree = tree;
    }

    fn load_from_db(&mut self, db: &dyn Database) -> Result<(), IndexError> {
        let rows = db.query_rows(TABLE).map_err(IndexError::from)?;
        self.entries = rows
            .iter()
            .map(|r| Entry {
                id: r.get_int("media_id") as u32,
                index: vdx::decode(r.get_blob("vdx")),
            })
            .collect();
        self.rebuild_tree();
        self.loaded = true;
        Ok(())
    }
}

impl SearchIndex for VideoSearchIndex {
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError> {
        db.create_table_if_not_exists(TABLE, "media_id INTEGER, vdx BLOB")
            .map_err(IndexError::from)
    }

    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError> {
        for m in media {
            if m.video_index.frames.is_empty() {
                continue;
            }
            let mut row = Row::default();
            row.set("media_id", Value::Int(m.id as i64));
            row.set("vdx", Value::Blob(vdx::encode(&m.video_index)));
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
        self.tree.memory_usage() + self.entries.iter().map(|e| e.index.frames.len() * 10).sum::<usize>()
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
                    self.rebuild_tree();
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
            if !m.video_index.frames.is_empty() {
                self.entries.push(Entry { id: m.id, index: m.video_index.clone() });
            }
        }
        self.rebuild_tree();
        self.loaded = true;
    }

    fn remove(&mut self, ids: &[u32]) {
        let id_set: std::collections::HashSet<u32> = ids.iter().copied().collect();
        for e in &mut self.entries {
            if id_set.contains(&e.id) {
                e.id = 0;
            }
        }
        self.tree.remove_any_of(|&(id, _)| id_set.contains(&id));
    }

    fn find(&self, needle: &Media, params: &SearchParams) -> Vec<Match> {
        use std::collections::HashMap;

        if needle.video_index.frames.is_empty() {
            // Image needle: a near whole-image hash is enough to surface a
            // candidate video; no hit-count thresholds apply.
            if needle.dct_hash == 0 {
                return Vec::new();
            }
            let mut best: HashMap<u32, u32> = HashMap::new();
            self.tree.find_within(needle.dct_hash, params.dct_thresh, |dist, &(id, _frame)| {
                if id != needle.id && id != 0 {
                    best.entry(id).and_modify(|d| *d = (*d).min(dist)).or_insert(dist);
                }
            });
            let mut matches: Vec<Match> =
                best.into_iter().map(|(id, dist)| Match { media_id: id, score: dist as i32 }).collect();
            matches.sort_by_key(|m| m.score);
            matches.truncate(params.max_matches);
            return matches;
        }

        // Video needle: accumulate per-candidate hit counts across every
        // sampled needle frame, then require both absolute and contiguous
        // coverage thresholds (`spec.md` §4.C).
        let mut hits: HashMap<u32, Vec<(u16, u16, u32)>> = HashMap::new();
        for (&src_frame, &hash) in needle.video_index.frames.iter().zip(&needle.video_index.hashes) {
            self.tree.find_within(hash, params.dct_thresh, |dist, &(id, dst_frame)| {
                if id != needle.id && id != 0 {
                    hits.entry(id).or_default().push((src_frame, dst_frame, dist));
                }
            });
        }

        let mut matches = Vec::new();
        for (media_id, pairs) in hits {
            let hit_count = pairs.len() as u32;
            if hit_count < params.min_frames_matched {
                continue;
            }
            let range = longest_contiguous_run(&pairs);
            let near_pct = if hit_count == 0 { 0 } else { range.len.max(0) as u32 * 100 / hit_count };
            if near_pct < params.min_frames_near {
                continue;
            }
            // More hits is a better match; negate so ascending sort (lower
            // score wins, matching every other index) ranks it first.
            matches.push(Match { media_id, score: -(hit_count as i32) });
        }
        matches.sort_by_key(|m| m.score);
        matches.truncate(params.max_matches);
        matches
    }

    fn find_index_data(&self, media: &mut Media) -> bool {
        if let Some(entry) = self.entries.iter().find(|e| e.id == media.id && e.id != 0) {
            media.video_index = entry.index.clone();
            true
        } else {
            false
        }
    }
}
