//! Decode interfaces the scanner consumes but never implements
//! (`spec.md` §1 "Out of scope: image/video codec libraries... specified
//! only by the primitive operations the core invokes"). `dupfind-decoders`
//! provides the real implementations.

use crate::error::FingerprintError;
use crate::image_buf::{GrayImage, RgbImage};
use crate::scan::cancel::CancelToken;

/// Decodes a still image into the primitives the fingerprint stage needs.
pub trait ImageSource: Send + Sync {
    /// Decode `path` to an RGB buffer.
    fn load_rgb(&self, path: &str) -> Result<RgbImage, FingerprintError>;
    /// Compressed size in bytes.
    fn file_size(&self, path: &str) -> Result<u64, FingerprintError>;
    /// Canonical content digest (`spec.md` §3 digest rule).
    fn content_digest(&self, path: &str) -> Result<String, FingerprintError>;
}

/// Decodes a video into a sequence of sampled, increasing-frame-number
/// grayscale frames.
pub trait VideoSource: Send + Sync {
    /// Iterate `(frame_number, frame)` pairs, skipping `skip_frames`
    /// decoded frames between samples. The iterator must stop promptly once
    /// `cancel` is set (`spec.md` §4.D "Cancellation").
    fn frames<'a>(
        &'a self,
        path: &str,
        skip_frames: u32,
        cancel: &'a CancelToken,
    ) -> Result<Box<dyn Iterator<Item = (u32, GrayImage)> + 'a>, FingerprintError>;
    /// Compressed size in bytes.
    fn file_size(&self, path: &str) -> Result<u64, FingerprintError>;
    /// Canonical content digest (`spec.md` §3 digest rule).
    fn content_digest(&self, path: &str) -> Result<String, FingerprintError>;
}
