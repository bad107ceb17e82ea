//! Directory scanner: walks a root, fingerprints new or changed media
//! through a bounded thread pool, and reports what to add and what to
//! drop from the indexes (`spec.md` §4.D).

pub mod cancel;
pub mod config;
pub mod decode;
pub mod error_map;
pub mod fingerprint;
pub mod pipeline;
pub mod walk;

use std::collections::HashSet;
use std::path::Path;
use std::time::SystemTime;

use crate::media::Media;
use cancel::CancelToken;
use config::ScanConfig;
use decode::{ImageSource, VideoSource};
use error_map::ErrorMap;
use pipeline::PipelineOutcome;
use walk::{sort_video_queue_by_cost, video_cost_estimate, walk, ArchiveReader, WalkOutcome};

/// A completed scan: fingerprinted media, paths to retire, and any
/// per-file errors encountered along the way.
pub struct ScanReport {
    /// Newly fingerprinted (or re-fingerprinted) media, in completion order.
    pub media: Vec<Media>,
    /// Paths that used to be indexed but are gone from disk.
    pub missing: Vec<String>,
    /// Per-path failures.
    pub errors: ErrorMap,
}

/// Drive one full scan of `root`: walk, classify, cost-sort the video
/// queue, and run the fingerprint pipeline (`spec.md` §4.D steps 1-6).
///
/// `on_batch` is forwarded to [`pipeline::run_pipeline`] so a caller can
/// persist fingerprints to the indexes as they complete rather than
/// waiting for the whole scan to finish.
#[allow(clippy::too_many_arguments)]
pub fn scan(
    root: &Path,
    config: &ScanConfig,
    expected: &mut HashSet<String>,
    modified_since: Option<SystemTime>,
    archive_reader: Option<&dyn ArchiveReader>,
    image_source: &(dyn ImageSource + Sync),
    video_source: &(dyn VideoSource + Sync),
    cancel: &CancelToken,
    on_batch: impl FnMut(&[Media]),
) -> ScanReport {
    let WalkOutcome { image_jobs, mut video_jobs, missing } =
        walk(root, config, expected, modified_since, archive_reader);

    let thread_count = config.gpu_threads.max(0) + config.index_threads.max(1);
    sort_video_queue_by_cost(&mut video_jobs, |path| {
        let area = video_source
            .file_size(path)
            .map(|size| size.max(1))
            .unwrap_or(1);
        video_cost_estimate(1.0, 1.0, area, thread_count)
    });

    let PipelineOutcome { media, errors } =
        pipeline::run_pipeline(image_jobs, video_jobs, image_source, video_source, config, cancel, on_batch);

    ScanReport { media, missing, errors }
}
