//! Per-file fingerprint extraction (`spec.md` §4.D responsibilities 5-6):
//! ties the primitives in `crate::fingerprint` to a decoded image or video
//! and produces a populated [`Media`] record.

use std::path::PathBuf;

use crate::error::FingerprintError;
use crate::fingerprint::autocrop::{auto_crop, AutoCropParams};
use crate::fingerprint::color::compute_color_descriptor;
use crate::fingerprint::dct::dct_hash;
use crate::fingerprint::orb::{detect_orb, keypoint_hashes};
use crate::fingerprint::video::build_video_index;
use crate::image_buf::rgb_to_gray;
use crate::media::{Media, MediaType};
use crate::scan::cancel::CancelToken;
use crate::scan::decode::{ImageSource, VideoSource};

/// Hamming threshold below which a video frame is considered a near-repeat
/// of one still in the sliding window (`spec.md` §4.A "Video hash
/// sequence", default 8).
const VIDEO_DEDUP_THRESHOLD: u32 = 8;
/// Sliding-window size for near-duplicate-frame suppression. Not pinned by
/// `spec.md`'s prose; chosen to match the window used throughout
/// `fingerprint::video`'s own tests.
const VIDEO_WINDOW_SIZE: usize = 16;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Seed the color descriptor's k-means with the media id when known
/// (reproducible across re-indexing of the same record), falling back to a
/// hash of the content digest for a brand-new scan where no id has been
/// assigned yet (`spec.md` §9 open question).
fn color_seed(media: &Media) -> u64 {
    if media.id != 0 {
        media.id as u64
    } else {
        fnv1a(media.content_digest.as_bytes())
    }
}

/// Fingerprint a still image: DCT-64 hash, color descriptor, ORB
/// keypoints/descriptors, and per-keypoint DCT hashes (`spec.md` §4.A).
pub fn fingerprint_image(
    path: &str,
    source: &dyn ImageSource,
    max_keypoints: usize,
) -> Result<Media, FingerprintError> {
    let rgb = source.load_rgb(path)?;
    let gray = rgb_to_gray(&rgb);

    let mut media = Media::new(path.to_string(), MediaType::Image);
    media.width = gray.width as i32;
    media.height = gray.height as i32;
    media.original_size = source.file_size(path)?;
    media.content_digest = source.content_digest(path)?;
    media.compression_ratio = if media.original_size > 0 {
        (gray.width * gray.height * 3) as f64 / media.original_size as f64
    } else {
        1.0
    };

    media.dct_hash = dct_hash(&gray);
    media.color_descriptor = compute_color_descriptor(&rgb, color_seed(&media));
    let (keypoints, descriptors) = detect_orb(&gray, max_keypoints);
    media.keypoint_hashes = keypoint_hashes(&gray, &keypoints);
    media.keypoints = keypoints;
    media.descriptors = descriptors;
    Ok(media)
}

/// Fingerprint a video: sample frames (honoring `skip_frames` and
/// cancellation), auto-crop each to remove letterboxing, and build its
/// [`crate::media::VideoIndex`] (`spec.md` §4.A "Video hash sequence").
pub fn fingerprint_video(
    path: &str,
    source: &dyn VideoSource,
    skip_frames: u32,
    cancel: &CancelToken,
) -> Result<Media, FingerprintError> {
    let mut media = Media::new(path.to_string(), MediaType::Video);
    media.original_size = source.file_size(path)?;
    media.content_digest = source.content_digest(path)?;

    let crop_params = AutoCropParams::default();
    let mut cropped_frames = Vec::new();
    for (frame_number, frame) in source.frames(path, skip_frames, cancel)? {
        if cancel.is_cancelled() {
            return Err(FingerprintError::DecodeCancelled { path: PathBuf::from(path) });
        }
        cropped_frames.push((frame_number, auto_crop(&frame, &crop_params)));
    }
    media.video_index =
        build_video_index(cropped_frames.into_iter(), VIDEO_DEDUP_THRESHOLD, VIDEO_WINDOW_SIZE);
    Ok(media)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_buf::GrayImage;

    struct StubImageSource;
    impl ImageSource for StubImageSource {
        fn load_rgb(&self, _path: &str) -> Result<RgbImage, FingerprintError> {
            Ok(RgbImage::new(32, 32))
        }
        fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
            Ok(1024)
        }
        fn content_digest(&self, _path: &str) -> Result<String, FingerprintError> {
            Ok("deadbeef".to_string())
        }
    }
    use crate::image_buf::RgbImage;

    struct StubVideoSource;
    impl VideoSource for StubVideoSource {
        fn frames<'a>(
            &'a self,
            _path: &str,
            _skip_frames: u32,
            _cancel: &'a CancelToken,
        ) -> Result<Box<dyn Iterator<Item = (u32, GrayImage)> + 'a>, FingerprintError> {
            Ok(Box::new((0..5).map(|i| (i, GrayImage::new(16, 16)))))
        }
        fn file_size(&self, _path: &str) -> Result<u64, FingerprintError> {
            Ok(4096)
        }
        fn content_digest(&self, _path: &str) -> Result<String, FingerprintError> {
            Ok("cafebabe".to_string())
        }
    }

    #[test]
    fn fingerprints_a_still_image() {
        let media = fingerprint_image("a.jpg", &StubImageSource, 100).unwrap();
        assert_eq!(media.width, 32);
        assert_eq!(media.content_digest, "deadbeef");
    }

    #[test]
    fn fingerprints_a_video() {
        let cancel = CancelToken::new();
        let media = fingerprint_video("a.mp4", &StubVideoSource, 0, &cancel).unwrap();
        assert!(!media.video_index.frames.is_empty());
        assert_eq!(media.video_index.frames[0], 0);
    }

    #[test]
    fn cancelled_video_decode_stops() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fingerprint_video("a.mp4", &StubVideoSource, 0, &cancel).unwrap_err();
        assert!(matches!(err, FingerprintError::DecodeCancelled { .. }));
    }
}
