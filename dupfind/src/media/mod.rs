//! The universal record passed between every component (`spec.md` §3, §4.G).

pub mod exif_cache;
pub mod property;

use std::collections::HashMap;
use std::path::Path;

#[cfg(feature = "serde1")]
use serde::{Deserialize, Serialize};

/// A list of media, typically needle followed by matches.
pub type MediaGroup = Vec<Media>;
/// A list of groups, typically a search result set.
pub type MediaGroupList = Vec<MediaGroup>;

/// Coarse media kind. Audio is modeled but not indexed by any of the five
/// search indexes (`spec.md` §1 scope is image/video/archives-of-images).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub enum MediaType {
    /// A still image.
    Image,
    /// A video clip.
    Video,
    /// An audio clip.
    Audio,
}

/// Flags set on a matching `Media`, relative to the needle it was found
/// against (`spec.md` §4.F "State machine for match classification").
pub mod match_flags {
    /// Content digests are identical.
    pub const EXACT: u32 = 1 << 0;
    /// Candidate has larger width*height than the needle.
    pub const BIGGER_DIMENSIONS: u32 = 1 << 1;
    /// Candidate's compressed size is larger than the needle's.
    pub const BIGGER_FILE: u32 = 1 << 2;
    /// Candidate's compression ratio is lower (less compressed) than the needle's.
    pub const LESS_COMPRESSED: u32 = 1 << 3;
    /// Candidate's content digest is in the user's "weed" set.
    pub const IS_WEED: u32 = 1 << 4;
}

/// One quantized color-cluster entry of a [`ColorDescriptor`]
/// (`spec.md` §4.A / §3).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct ColorEntry {
    /// Packed 16-bit L channel (CIE Luv).
    pub l: u16,
    /// Packed 16-bit u channel.
    pub u: u16,
    /// Packed 16-bit v channel.
    pub v: u16,
    /// Normalized weight, max value 65535.
    pub w: u16,
}

/// Up to 32 dominant colors of an image, sorted by weight descending
/// (`spec.md` §3, §4.A step 7).
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct ColorDescriptor {
    /// The clusters, `colors.len() == num_colors`.
    pub colors: Vec<ColorEntry>,
}

impl ColorDescriptor {
    /// Number of valid colors in this descriptor (0 for "not computed").
    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    /// Whether this descriptor carries any data.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// A single ORB keypoint location and scale (`spec.md` §4.A).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct KeyPoint {
    /// x coordinate in the source image.
    pub x: f32,
    /// y coordinate in the source image.
    pub y: f32,
    /// Keypoint diameter; determines the square extent used for
    /// per-keypoint DCT hashing.
    pub size: f32,
    /// Dominant orientation in radians, used to steer the descriptor.
    pub angle: f32,
}

/// Row-major 32-byte binary descriptors, one row per [`KeyPoint`].
pub type Descriptors = Vec<[u8; 32]>;

/// Parallel arrays of sampled-frame `(frame_number, dct_hash)` pairs
/// (`spec.md` §3 "VideoIndex"). Invariant: `frames.len() == hashes.len()`,
/// `frames` strictly increasing, first and last decoded frame included.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct VideoIndex {
    /// Sampled frame numbers, strictly increasing.
    pub frames: Vec<u16>,
    /// DCT-64 hash for each sampled frame, parallel to `frames`.
    pub hashes: Vec<u64>,
}

impl VideoIndex {
    /// An empty video index.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() || self.hashes.is_empty()
    }

    /// Validate the structural invariant: equal lengths and strictly
    /// increasing frame numbers.
    pub fn is_well_formed(&self) -> bool {
        self.frames.len() == self.hashes.len()
            && self.frames.windows(2).all(|w| w[0] < w[1])
    }
}

/// A single candidate hit from a [`crate::index::SearchIndex::find`] call:
/// the matching media's id and a score where lower is better (`spec.md` §3
/// "Match").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Match {
    /// Id of the matching media.
    pub media_id: u32,
    /// Score, lower is better.
    pub score: i32,
}

/// A matching interval, used only for video search where the units are
/// frame numbers (`spec.md` §3 "Match").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct MatchRange {
    /// Start frame in the needle video, or -1 if not applicable.
    pub src_in: i32,
    /// Start frame in the candidate video, or -1 if not applicable.
    pub dst_in: i32,
    /// Length of the matching interval, in frames.
    pub len: i32,
}

impl MatchRange {
    /// An empty/unset range.
    pub fn none() -> Self {
        MatchRange { src_in: -1, dst_in: -1, len: 0 }
    }
}

/// A 2x3 affine transform (needle -> candidate frame), and the four
/// warped corners of the needle rectangle in the candidate's coordinate
/// space (`spec.md` §4.E step 7).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct AffineTransform {
    /// Row-major 2x3 matrix: `[a, b, tx, c, d, ty]`.
    pub matrix: [f32; 6],
}

impl AffineTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        AffineTransform { matrix: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0] }
    }

    /// Apply the transform to a point.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.matrix;
        (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
    }
}

/// A region of interest: four corners of a quadrilateral in image space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Roi {
    /// The four corners, in order.
    pub corners: [(f32, f32); 4],
}

/// The universal record: an image, video, or audio item, at any point in
/// its lifecycle (freshly scanned, loaded from the database, or annotated
/// as a search result) (`spec.md` §3).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde1", derive(Serialize, Deserialize))]
pub struct Media {
    /// Database id. `0` means "not persisted".
    pub id: u32,
    /// Coarse media kind.
    pub media_type: MediaType,
    /// UTF-8 locator: local path, `archive:member` virtual path, or a
    /// `qimage://` synthetic path.
    pub path: String,
    /// Hex MD5 of the canonical byte stream (`spec.md` §3 digest rule).
    pub content_digest: String,
    /// Pixel width, or -1 if unknown.
    pub width: i32,
    /// Pixel height, or -1 if unknown.
    pub height: i32,
    /// Compressed size in bytes.
    pub original_size: u64,
    /// decompressed size / compressed size.
    pub compression_ratio: f64,
    /// Whole-image DCT-64 hash. 0 if not computed.
    pub dct_hash: u64,
    /// Dominant-color descriptor, empty if not computed (e.g. grayscale).
    pub color_descriptor: ColorDescriptor,
    /// ORB keypoints.
    pub keypoints: Vec<KeyPoint>,
    /// Row-major binary descriptors, parallel to `keypoints`.
    pub descriptors: Descriptors,
    /// Per-keypoint DCT-64 hashes, parallel to `keypoints`.
    pub keypoint_hashes: Vec<u64>,
    /// Per-sampled-frame video hash sequence (video media only).
    pub video_index: VideoIndex,
    /// Match classification flags, populated on query results only.
    pub match_flags: u32,
    /// Match score, lower is better. Populated on query results only.
    pub score: i32,
    /// Temporal alignment for video matches.
    pub match_range: MatchRange,
    /// Region of interest of a template match, if any.
    pub roi: Option<Roi>,
    /// Needle-to-candidate transform from the template matcher, if any.
    pub transform: Option<AffineTransform>,
    /// Open key -> string attribute map for client annotations.
    pub attributes: HashMap<String, String>,
}

impl Media {
    /// A fresh, unpersisted `Media` for a given path and type.
    pub fn new(path: impl Into<String>, media_type: MediaType) -> Self {
        Media {
            id: 0,
            media_type,
            path: path.into(),
            content_digest: String::new(),
            width: -1,
            height: -1,
            original_size: 0,
            compression_ratio: 1.0,
            dct_hash: 0,
            color_descriptor: ColorDescriptor::default(),
            keypoints: Vec::new(),
            descriptors: Vec::new(),
            keypoint_hashes: Vec::new(),
            video_index: VideoIndex::default(),
            match_flags: 0,
            score: 0,
            match_range: MatchRange::none(),
            roi: None,
            transform: None,
            attributes: HashMap::new(),
        }
    }

    /// Whether this record has been persisted to the database
    /// (`spec.md` §3 invariant 1).
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }

    /// Parent directory component of `path`, for `filterParent`
    /// (`spec.md` §4.F step 7) and `property_func("path")` chains.
    pub fn parent_path(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((parent, _)) => parent,
            None => "",
        }
    }

    /// File name component (last path segment, including extension).
    pub fn name(&self) -> &str {
        let after_colon = archive_member(&self.path).unwrap_or(&self.path);
        match after_colon.rsplit_once('/') {
            Some((_, name)) => name,
            None => after_colon,
        }
    }

    /// Suffix (extension without the dot), lowercased by convention at the
    /// call site; this returns the raw suffix as it appears in the path.
    pub fn suffix(&self) -> &str {
        match self.name().rsplit_once('.') {
            Some((_, suffix)) => suffix,
            None => "",
        }
    }

    /// File name without its final extension.
    pub fn complete_base_name(&self) -> &str {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((base, _)) => base,
            None => name,
        }
    }

    /// Whether `path` is an archive member path (`archive.zip:member`).
    pub fn is_archive_member(&self) -> bool {
        archive_parts(&self.path).is_some()
    }
}

/// Split a virtual path of the form `archive_path ":" member_path` at the
/// first case-insensitive `.zip:`/`.cbz:` boundary (`spec.md` §6, §4.G).
///
/// Returns `None` if `path` is not an archive member path.
pub fn archive_parts(path: &str) -> Option<(&str, &str)> {
    let lower = path.to_ascii_lowercase();
    for needle in [".zip:", ".cbz:"] {
        if let Some(idx) = lower.find(needle) {
            let split_at = idx + needle.len() - 1; // keep the colon as the boundary
            let (archive, rest) = path.split_at(split_at);
            return Some((archive, &rest[1..]));
        }
    }
    None
}

fn archive_member(path: &str) -> Option<&str> {
    archive_parts(path).map(|(_, member)| member)
}

/// Build a virtual archive-member path from its two parts.
pub fn virtual_path(archive_path: &str, member_path: &str) -> String {
    format!("{archive_path}:{member_path}")
}

/// Build a synthetic in-memory image path (`spec.md` §6).
pub fn synthetic_path(content_digest: &str) -> String {
    format!("qimage://{content_digest}")
}

/// Guess a [`MediaType`] from a file extension (case-insensitive, without
/// the leading dot). Returns `None` for unrecognized extensions
/// (`ErrorUnsupported`, `spec.md` §7).
pub fn media_type_for_extension(ext: &str) -> Option<MediaType> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "tif" | "tiff" => {
            Some(MediaType::Image)
        }
        "mp4" | "mkv" | "avi" | "mov" | "webm" | "m4v" | "wmv" | "y4m" => Some(MediaType::Video),
        "mp3" | "flac" | "wav" | "ogg" | "m4a" => Some(MediaType::Audio),
        _ => None,
    }
}

/// File extensions recognized as archives of images (`spec.md` §4.D.1).
pub fn is_archive_extension(ext: &str) -> bool {
    matches!(ext.to_ascii_lowercase().as_str(), "zip" | "cbz")
}

/// Path helper: extension without the leading dot, lowercase.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_round_trip() {
        let vp = virtual_path("comics/issue1.cbz", "page001.jpg");
        let (archive, member) = archive_parts(&vp).expect("should parse");
        assert_eq!(archive, "comics/issue1.cbz");
        assert_eq!(member, "page001.jpg");
    }

    #[test]
    fn archive_parts_case_insensitive() {
        let (archive, member) = archive_parts("a/b.ZIP:inner/c.png").unwrap();
        assert_eq!(archive, "a/b.ZIP");
        assert_eq!(member, "inner/c.png");
    }

    #[test]
    fn non_archive_path_has_no_parts() {
        assert_eq!(archive_parts("plain/path.jpg"), None);
    }

    #[test]
    fn media_path_helpers() {
        let m = Media::new("a/b/c.name.jpg", MediaType::Image);
        assert_eq!(m.parent_path(), "a/b");
        assert_eq!(m.name(), "c.name.jpg");
        assert_eq!(m.suffix(), "jpg");
        assert_eq!(m.complete_base_name(), "c.name");
    }

    #[test]
    fn fresh_media_is_not_valid() {
        let m = Media::new("x.jpg", MediaType::Image);
        assert!(!m.is_valid());
    }

    #[test]
    fn video_index_well_formed() {
        let v = VideoIndex { frames: vec![0, 5, 9], hashes: vec![1, 2, 3] };
        assert!(v.is_well_formed());
        let bad = VideoIndex { frames: vec![0, 5, 5], hashes: vec![1, 2, 3] };
        assert!(!bad.is_well_formed());
    }
}
