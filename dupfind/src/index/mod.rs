//! The five search indexes and their common contract (`spec.md` §4.C).
//!
//! Mirrors the teacher's one-file-per-metric layout (`psnr.rs`, `ssim.rs`,
//! `psnr_hvs.rs`, `ciede/mod.rs` each implement one `VideoMetric`): each
//! index here lives in its own file and implements the same [`SearchIndex`]
//! trait, sharing no storage with its siblings (`spec.md` §9 "Polymorphism
//! over five index kinds... do not share storage").

pub mod color_index;
pub mod dct_index;
pub mod fdct_index;
pub mod hamming_tree;
pub mod orb_index;
pub mod video_index;

use crate::db::Database;
use crate::error::IndexError;
use crate::media::{Match, Media};
use std::path::Path;

/// Which of the five algorithms a query or a cache file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Whole-image DCT-64 hash, linear scan.
    Dct,
    /// Per-keypoint DCT-64 hashes, via a Hamming tree.
    FeatureDct,
    /// ORB binary descriptors, via an LSH index.
    Orb,
    /// Dominant-color descriptor, linear scan.
    Color,
    /// Per-frame video hash sequence, via an aggregate Hamming tree.
    Video,
}

/// Tunables shared across index implementations and the query engine,
/// named after `original_source/index.h`'s `SearchParams`
/// (`spec.md` §9 SPEC_FULL [SUPPLEMENT]).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Which algorithm to query.
    pub algo: Algorithm,
    /// Media types the needle is allowed to have (`spec.md` §4.F step 2).
    /// `None` means any type is allowed.
    pub query_types: Option<Vec<crate::media::MediaType>>,
    /// DCT Hamming-distance threshold (`dct`/`fdct`), default 5.
    pub dct_thresh: u32,
    /// ORB descriptor Hamming-distance threshold (`orb`), default 25.
    pub cv_thresh: u32,
    /// Minimum number of frame hits for a video match, default 30.
    pub min_frames_matched: u32,
    /// Minimum percent of hits within a contiguous range, default 60.
    pub min_frames_near: u32,
    /// ORB keypoints computed for a query needle, default 100.
    pub needle_features: usize,
    /// ORB keypoints computed for a candidate haystack image, default 1000.
    pub haystack_features: usize,
    /// Upper bound on returned matches.
    pub max_matches: usize,
    /// Lower bound below which a search is considered to have failed.
    pub min_matches: usize,
    /// Decoded-video frames to skip between sampled frames, 0 = every frame.
    pub skip_frames: u32,
    /// How often (in candidates examined) to emit a progress log line.
    pub progress_interval: usize,
    /// Whether to run the template matcher over index results.
    pub template_match: bool,
    /// Which mirror variants of the needle to additionally search.
    pub mirror_mask: MirrorMask,
}

/// Which mirrored variants of a needle to search in addition to the
/// original (`spec.md` §4.F step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MirrorMask {
    /// Search the horizontally-mirrored needle.
    pub horizontal: bool,
    /// Search the vertically-mirrored needle.
    pub vertical: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            algo: Algorithm::Dct,
            query_types: None,
            dct_thresh: 5,
            cv_thresh: 25,
            min_frames_matched: 30,
            min_frames_near: 60,
            needle_features: 100,
            haystack_features: 1000,
            max_matches: 100,
            min_matches: 0,
            skip_frames: 0,
            progress_interval: 1000,
            template_match: false,
            mirror_mask: MirrorMask::default(),
        }
    }
}

/// Uniform lifecycle contract implemented by each of the five search
/// indexes (`spec.md` §4.C common contract table).
pub trait SearchIndex: Send + Sync {
    /// Idempotently create this index's backing SQL schema.
    fn create_tables(&self, db: &dyn Database) -> Result<(), IndexError>;

    /// Persist the descriptors of every item in `media` that has the data
    /// this index needs (`spec.md` §3 invariant 5).
    fn add_records(&self, db: &dyn Database, media: &[Media]) -> Result<(), IndexError>;

    /// Delete rows for `ids` from the backing SQL store.
    fn remove_records(&self, db: &dyn Database, ids: &[u32]) -> Result<(), IndexError>;

    /// Number of in-memory entries, including tombstones.
    fn count(&self) -> usize;

    /// Approximate bytes held by the in-memory structures.
    fn memory_usage(&self) -> usize;

    /// Whether the in-memory structures have been built.
    fn is_loaded(&self) -> bool;

    /// Populate in-memory structures from `cache_path` if fresh, else
    /// rebuild from SQL and rewrite the cache.
    fn load(
        &mut self,
        db: &dyn Database,
        cache_path: &Path,
        data_path: &Path,
    ) -> Result<(), IndexError>;

    /// Persist the in-memory form to `cache_path`, if it is stale.
    fn save(&self, cache_path: &Path) -> Result<(), IndexError>;

    /// Merge new entries into the in-memory form without touching SQL.
    fn add(&mut self, media: &[Media]);

    /// Tombstone `ids` in the in-memory form without touching SQL.
    fn remove(&mut self, ids: &[u32]);

    /// Find candidates for `needle` under `params`.
    fn find(&self, needle: &Media, params: &SearchParams) -> Vec<Match>;

    /// Populate missing index-owned fields on `media` (e.g. descriptors),
    /// returning whether any data was found.
    fn find_index_data(&self, media: &mut Media) -> bool;
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::media::{Media, MediaType};

    pub fn media_with_dct_hash(id: u32, hash: u64) -> Media {
        let mut m = Media::new(format!("m{id}.jpg"), MediaType::Image);
        m.id = id;
        m.dct_hash = hash;
        m
    }
}
