//! Video hash sequence sampling (`spec.md` §4.A "Video hash sequence").

use crate::fingerprint::dct::{dct_hash, hamming_distance};
use crate::image_buf::GrayImage;
use crate::media::VideoIndex;

/// Maximum indexable frame number, limited by the 16-bit frame index
/// (`spec.md` §4.A "Video hash sequence").
pub const MAX_INDEXED_FRAMES: u32 = u16::MAX as u32;

/// Build a [`VideoIndex`] from a sequence of decoded, already auto-cropped
/// grayscale frames (see [`crate::fingerprint::autocrop`]): keep a sliding
/// window of recently kept hashes and emit a frame iff no hash in the window
/// is within `threshold` Hamming distance of it; always emit the first and
/// last frame.
///
/// `frames` yields `(frame_number, frame)` pairs in increasing order, as
/// produced by a `FrameSource` (`spec.md` §4.D responsibility 1).
pub fn build_video_index(
    frames: impl Iterator<Item = (u32, GrayImage)>,
    threshold: u32,
    window_size: usize,
) -> VideoIndex {
    let mut out = VideoIndex::default();
    let mut window: Vec<u64> = Vec::with_capacity(window_size);
    let mut last_frame_number: Option<u32> = None;
    let mut last_hash: Option<u64> = None;
    let mut stopped_at_limit = false;

    for (frame_number, frame) in frames {
        if frame_number > MAX_INDEXED_FRAMES {
            log::warn!(
                "video exceeds {MAX_INDEXED_FRAMES} indexable frames, stopping at the limit"
            );
            stopped_at_limit = true;
            break;
        }
        let hash = dct_hash(&frame);
        let is_novel = window.iter().all(|&h| hamming_distance(h, hash) > threshold);
        if is_novel || out.frames.is_empty() {
            out.frames.push(frame_number as u16);
            out.hashes.push(hash);
            window.push(hash);
            if window.len() > window_size {
                window.remove(0);
            }
        }
        last_frame_number = Some(frame_number);
        last_hash = Some(hash);
    }

    // Always include the last decoded frame.
    if let (Some(number), Some(hash)) = (last_frame_number, last_hash) {
        if out.frames.last().copied() != Some(number as u16) {
            out.frames.push(number as u16);
            out.hashes.push(hash);
        }
    }

    if stopped_at_limit {
        log::warn!("video index truncated at frame {MAX_INDEXED_FRAMES}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: usize, height: usize, value: f32) -> GrayImage {
        GrayImage { width, height, data: vec![value; width * height] }
    }

    #[test]
    fn video_index_always_includes_first_and_last() {
        let frames = (0..10).map(|i| (i, solid(32, 32, (i * 20) as f32)));
        let idx = build_video_index(frames, 4, 16);
        assert_eq!(*idx.frames.first().unwrap(), 0);
        assert_eq!(*idx.frames.last().unwrap(), 9);
        assert!(idx.is_well_formed());
    }

    #[test]
    fn video_index_dedups_similar_frames() {
        let frames = (0..20).map(|i| (i, solid(32, 32, 50.0)));
        let idx = build_video_index(frames, 4, 16);
        // All frames are identical; only the first (and deduped last) is kept.
        assert!(idx.frames.len() <= 2);
    }

    #[test]
    fn video_index_stops_at_frame_limit() {
        let frames = (0..5u32).map(|i| (MAX_INDEXED_FRAMES - 2 + i, solid(16, 16, i as f32)));
        let idx = build_video_index(frames, 4, 16);
        assert!(idx.frames.iter().all(|&f| f as u32 <= MAX_INDEXED_FRAMES));
    }

    #[test]
    fn video_index_is_well_formed_for_strictly_increasing_frames() {
        let frames = (0..6).map(|i| (i * 3, solid(16, 16, i as f32 * 40.0)));
        let idx = build_video_index(frames, 2, 8);
        assert!(idx.is_well_formed());
    }
}
