//! Job scheduler: bounded thread pools draining the image and video queues
//! produced by [`crate::scan::walk`], emitting fingerprinted [`Media`]
//! records to a batched sink (`spec.md` §4.D steps 4-6).
//!
//! Grounded on `other_examples/erikvader-imgdup`'s worker-pool pattern:
//! `std::thread::scope` for scoped spawns plus a bounded
//! `crossbeam_channel` for completed work, generalized from that crate's
//! single video pool into the three pools `spec.md` §4.D.4 names
//! (`gpu_pool`, `video_pool`, and a global image pool).

use std::thread;

use crate::media::Media;
use crate::scan::cancel::CancelToken;
use crate::scan::config::ScanConfig;
use crate::scan::decode::{ImageSource, VideoSource};
use crate::scan::error_map::ErrorMap;
use crate::scan::fingerprint::{fingerprint_image, fingerprint_video};

/// Keypoints computed per image during batch indexing (`spec.md` §4.A,
/// distinct from the lower-density needle/haystack counts used at query
/// time).
const INDEXING_FEATURES: usize = 400;
/// A video job is attempted at most this many times before its failure is
/// recorded for good (`spec.md` §4.D.4 "do not retry the same file
/// indefinitely... currently only tail rotation").
const MAX_VIDEO_ATTEMPTS: u32 = 2;

enum JobResult {
    Image(Result<Media, (String, String)>),
    Video(Result<Media, (String, String)>),
}

struct VideoJob {
    path: String,
    attempts: u32,
}

/// Outcome of one pipeline run: every successfully fingerprinted record,
/// plus the per-path error log for anything that failed.
pub struct PipelineOutcome {
    /// Fingerprinted media, in completion order (`spec.md` §5 "Ordering
    /// guarantees: completion order, not enqueue order").
    pub media: Vec<Media>,
    /// Per-path failures recorded during the run.
    pub errors: ErrorMap,
}

/// Run the image and video pools to completion over `image_jobs` and
/// `video_jobs`, calling `on_batch` whenever the sink flushes
/// (`spec.md` §4.D step 5: batch size reached, or a video job completes).
pub fn run_pipeline(
    image_jobs: Vec<String>,
    video_jobs: Vec<String>,
    image_source: &(dyn ImageSource + Sync),
    video_source: &(dyn VideoSource + Sync),
    config: &ScanConfig,
    cancel: &CancelToken,
    mut on_batch: impl FnMut(&[Media]),
) -> PipelineOutcome {
    let errors = ErrorMap::new();
    let mut all_media = Vec::new();
    let mut pending_batch: Vec<Media> = Vec::new();

    thread::scope(|scope| {
        let (result_tx, result_rx) = crossbeam_channel::bounded::<JobResult>(config.write_batch_size.max(1));
        let (image_tx, image_rx) = crossbeam_channel::unbounded::<String>();
        let (video_tx, video_rx) = crossbeam_channel::unbounded::<VideoJob>();

        for path in image_jobs {
            image_tx.send(path).ok();
        }
        for path in video_jobs {
            video_tx.send(VideoJob { path, attempts: 0 }).ok();
        }
        drop(image_tx);

        let mut handles = Vec::new();

        for _ in 0..config.image_threads.max(1) {
            let image_rx = image_rx.clone();
            let result_tx = result_tx.clone();
            handles.push(thread::Builder::new().spawn_scoped(scope, move || {
                while let Ok(path) = image_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = fingerprint_image(&path, image_source, INDEXING_FEATURES)
                        .map_err(|e| (path.clone(), e.to_string()));
                    result_tx.send(JobResult::Image(outcome)).ok();
                }
            }).expect("failed to spawn image worker"));
        }

        let video_workers = config.gpu_threads.max(0) + config.index_threads.max(1);
        for _ in 0..video_workers.max(1) {
            let video_rx = video_rx.clone();
            let video_tx = video_tx.clone();
            let result_tx = result_tx.clone();
            handles.push(thread::Builder::new().spawn_scoped(scope, move || {
                while let Ok(job) = video_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match fingerprint_video(&job.path, video_source, 0, cancel) {
                        Ok(media) => {
                            result_tx.send(JobResult::Video(Ok(media))).ok();
                        }
                        Err(e) if job.attempts + 1 < MAX_VIDEO_ATTEMPTS => {
                            video_tx
                                .send(VideoJob { path: job.path, attempts: job.attempts + 1 })
                                .ok();
                            let _ = e;
                        }
                        Err(e) => {
                            result_tx
                                .send(JobResult::Video(Err((job.path, e.to_string()))))
                                .ok();
                        }
                    }
                }
            }).expect("failed to spawn video worker"));
        }

        drop(result_tx);
        drop(video_tx);

        while let Ok(job_result) = result_rx.recv() {
            let (record, is_video) = match job_result {
                JobResult::Image(Ok(m)) => (Some(m), false),
                JobResult::Image(Err((path, reason))) => {
                    errors.record(path, reason);
                    (None, false)
                }
                JobResult::Video(Ok(m)) => (Some(m), true),
                JobResult::Video(Err((path, reason))) => {
                    errors.record(path, reason);
                    (None, true)
                }
            };
            if let Some(media) = record {
                pending_batch.push(media);
            }
            if pending_batch.len() >= config.write_batch_size || is_video {
                if !pending_batch.is_empty() {
                    on_batch(&pending_batch);
                    all_media.append(&mut pending_batch);
                }
            }
        }

        for handle in handles {
            if handle.join().is_err() {
                log::error!("scanner worker thread panicked");
            }
        }
    });

    if !pending_batch.is_empty() {
        on_batch(&pending_batch);
        all_media.append(&mut pending_batch);
    }

    PipelineOutcome { media: all_media, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FingerprintError;
    use crate::image_buf::{GrayImage, RgbImage};

    struct StubImageSource;
    impl ImageSource for StubImageSource {
        fn load_rgb(&self, _path: &str) -> Result<RgbImage, FingerprintError> {
            Ok(RgbImage::new(16, 16))
        }
        fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
            Ok(100)
        }
        fn content_digest(&self, path: &str) -> Result<String, FingerprintError> {
            Ok(path.to_string())
        }
    }

    struct StubVideoSource;
    impl VideoSource for StubVideoSource {
        fn frames<'a>(
            &'a self,
            _path: &str,
            _skip_frames: u32,
            _cancel: &'a CancelToken,
        ) -> Result<Box<dyn Iterator<Item = (u32, GrayImage)> + 'a>, FingerprintError> {
            Ok(Box::new((0..3).map(|i| (i, GrayImage::new(8, 8)))))
        }
        fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
            Ok(200)
        }
        fn content_digest(&self, path: &str) -> Result<String, FingerprintError> {
            Ok(path.to_string())
        }
    }

    #[test]
    fn processes_image_and_video_jobs() {
        let cancel = CancelToken::new();
        let mut batches = 0;
        let outcome = run_pipeline(
            vec!["a.jpg".to_string(), "b.jpg".to_string()],
            vec!["c.mp4".to_string()],
            &StubImageSource,
            &StubVideoSource,
            &ScanConfig { write_batch_size: 10, ..ScanConfig::default() },
            &cancel,
            |_batch| batches += 1,
        );
        assert_eq!(outcome.media.len(), 3);
        assert!(outcome.errors.is_empty());
        // The video job always flushes on completion, so at least one batch fires.
        assert!(batches >= 1);
    }

    #[test]
    fn empty_job_lists_produce_nothing() {
        let cancel = CancelToken::new();
        let outcome = run_pipeline(
            vec![],
            vec![],
            &StubImageSource,
            &StubVideoSource,
            &ScanConfig::default(),
            &cancel,
            |_| {},
        );
        assert!(outcome.media.is_empty());
    }
}
